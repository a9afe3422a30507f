//! HTTP release source against a mock upstream.

use chrono::NaiveDate;
use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use compras_sync::config::UpstreamConfig;
use compras_sync::error::{SourceError, CONNECTIVITY_MESSAGE};
use compras_sync::source::{HttpReleaseSource, ReleaseSource};

fn upstream(base_url: String) -> UpstreamConfig {
    UpstreamConfig {
        base_url,
        api_key: None,
        timeout_secs: 5,
        ..Default::default()
    }
}

fn d(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

#[tokio::test]
async fn window_page_reads_data_array_and_pagination() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/date/2024-01-01/2024-01-07/2"))
        .and(query_param("limit", "50"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{ "ocid": "ocds-1" }, { "ocid": "ocds-2" }],
            "pagination": { "page": 2, "totalPages": 3, "totalReleases": 102, "releasesPerPage": 50 }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let source = HttpReleaseSource::new(&upstream(format!("{}/api", server.uri()))).unwrap();
    let page = source
        .fetch_window(d("2024-01-01"), d("2024-01-07"), 2, 50)
        .await
        .unwrap();

    assert_eq!(page.releases.len(), 2);
    assert_eq!(page.releases[1]["ocid"], "ocds-2");
    assert_eq!(page.pagination.page, 2);
    assert_eq!(page.pagination.total_pages, 3);
    assert_eq!(page.pagination.total_releases, 102);
}

#[tokio::test]
async fn trailing_slash_in_base_url_is_tolerated() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/date/2024-01-01/2024-01-01/1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "releases": [{ "ocid": "ocds-n" }] }
        })))
        .mount(&server)
        .await;

    let source = HttpReleaseSource::new(&upstream(format!("{}/api/", server.uri()))).unwrap();
    let page = source
        .fetch_window(d("2024-01-01"), d("2024-01-01"), 1, 100)
        .await
        .unwrap();

    assert_eq!(page.releases[0]["ocid"], "ocds-n");
    assert_eq!(page.pagination.total_pages, 1);
    assert_eq!(page.pagination.total_releases, 1);
}

#[tokio::test]
async fn body_without_release_array_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "items": [] })))
        .mount(&server)
        .await;

    let source = HttpReleaseSource::new(&upstream(format!("{}/api", server.uri()))).unwrap();
    let err = source
        .fetch_window(d("2024-01-01"), d("2024-01-07"), 1, 100)
        .await
        .unwrap_err();

    assert!(matches!(err, SourceError::MalformedResponse(_)));
}

#[tokio::test]
async fn non_json_body_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>mantenimiento</html>"))
        .mount(&server)
        .await;

    let source = HttpReleaseSource::new(&upstream(format!("{}/api", server.uri()))).unwrap();
    let err = source.fetch_detail("ocds-1").await.unwrap_err();

    assert!(matches!(err, SourceError::MalformedResponse(_)));
}

#[tokio::test]
async fn non_success_status_is_upstream_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let source = HttpReleaseSource::new(&upstream(format!("{}/api", server.uri()))).unwrap();
    let err = source
        .fetch_window(d("2024-01-01"), d("2024-01-07"), 1, 100)
        .await
        .unwrap_err();

    assert_eq!(
        err,
        SourceError::Upstream {
            status: 500,
            status_text: "Internal Server Error".to_string()
        }
    );
    assert_eq!(err.to_string(), "Upstream error: 500 Internal Server Error");
}

#[tokio::test]
async fn unreachable_host_is_connectivity_error() {
    let source = HttpReleaseSource::new(&upstream("http://127.0.0.1:9/api".to_string())).unwrap();
    let err = source.fetch_detail("ocds-1").await.unwrap_err();

    assert_eq!(err, SourceError::Connectivity);
    assert_eq!(err.to_string(), CONNECTIVITY_MESSAGE);
}

#[tokio::test]
async fn api_key_is_sent_as_bearer_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/release/ocds-1"))
        .and(header("authorization", "Bearer s3cret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ocid": "ocds-1" })))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = upstream(format!("{}/api", server.uri()));
    config.api_key = Some("s3cret".to_string());
    let source = HttpReleaseSource::new(&config).unwrap();

    let detail = source.fetch_detail("ocds-1").await.unwrap();
    assert_eq!(detail["ocid"], "ocds-1");
}

#[tokio::test]
async fn detail_key_is_a_single_escaped_segment() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/release/ocds-a%2Fb"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "releases": [{ "ocid": "ocds-a/b" }]
        })))
        .mount(&server)
        .await;

    let source = HttpReleaseSource::new(&upstream(format!("{}/api", server.uri()))).unwrap();
    let detail = source.fetch_detail("ocds-a/b").await.unwrap();

    assert_eq!(detail["releases"][0]["ocid"], "ocds-a/b");
}
