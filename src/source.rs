//! Remote release source: the DGCP OCDS API.
//!
//! Two endpoints are consumed:
//!
//! | Endpoint | Purpose |
//! |----------|---------|
//! | `GET {base}/date/{from}/{to}/{page}?limit=N` | One page of release summaries for a date window |
//! | `GET {base}/release/{ocid}` | Full detail for one release |
//!
//! The listing endpoint is not consistent about where it puts the release
//! array: `.data`, `.data.releases` and `.releases` are tried in that order.

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, Url};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use compras_core::RawRecord;

use crate::config::UpstreamConfig;
use crate::error::SourceError;

/// Pagination metadata for one window page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: u32,
    pub total_pages: u32,
    pub total_releases: u64,
    pub releases_per_page: u32,
}

/// One page of raw release summaries.
#[derive(Debug, Clone)]
pub struct WindowPage {
    pub releases: Vec<RawRecord>,
    pub pagination: Pagination,
}

/// Where raw releases come from.
///
/// Implementations only do network I/O; nothing is persisted here.
#[async_trait]
pub trait ReleaseSource: Send + Sync {
    /// One page (1-based) of releases published within the inclusive
    /// `[from, to]` window, at most `limit` per page.
    async fn fetch_window(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        page: u32,
        limit: u32,
    ) -> Result<WindowPage, SourceError>;

    /// Full detail for one release by ocid (or, lacking one, its id).
    async fn fetch_detail(&self, key: &str) -> Result<RawRecord, SourceError>;
}

/// [`ReleaseSource`] over HTTP with `reqwest`.
pub struct HttpReleaseSource {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
}

impl HttpReleaseSource {
    pub fn new(config: &UpstreamConfig) -> anyhow::Result<Self> {
        let base_url = Url::parse(&config.base_url)?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("upstream.base_url cannot carry a path: {}", config.base_url);
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url,
            api_key: config.resolved_api_key(),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, SourceError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| SourceError::MalformedResponse("base URL cannot carry a path".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_json(&self, url: Url) -> Result<Value, SourceError> {
        debug!(url = %url, "GET");
        let mut request = self.client.get(url.clone());
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            warn!(url = %url, error = %e, "upstream unreachable");
            SourceError::Connectivity
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Upstream {
                status: status.as_u16(),
                status_text: status.canonical_reason().unwrap_or("").to_string(),
            });
        }

        let body = response.text().await.map_err(|e| {
            warn!(url = %url, error = %e, "failed to read upstream body");
            SourceError::Connectivity
        })?;
        serde_json::from_str(&body)
            .map_err(|e| SourceError::MalformedResponse(format!("body is not JSON: {}", e)))
    }
}

#[async_trait]
impl ReleaseSource for HttpReleaseSource {
    async fn fetch_window(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        page: u32,
        limit: u32,
    ) -> Result<WindowPage, SourceError> {
        let from = from.format("%Y-%m-%d").to_string();
        let to = to.format("%Y-%m-%d").to_string();
        let page_str = page.to_string();
        let mut url = self.endpoint(&["date", &from, &to, &page_str])?;
        url.query_pairs_mut()
            .append_pair("limit", &limit.to_string());

        let body = self.get_json(url).await?;
        parse_window(body, page, limit)
    }

    async fn fetch_detail(&self, key: &str) -> Result<RawRecord, SourceError> {
        let url = self.endpoint(&["release", key])?;
        self.get_json(url).await
    }
}

/// Locate the release array in a listing response and read its pagination.
///
/// Missing pagination fields default to the requested page,
/// `ceil(len / limit)` pages (at least one), `len` releases and `limit`
/// per page.
pub fn parse_window(body: Value, page: u32, limit: u32) -> Result<WindowPage, SourceError> {
    let pagination = body.get("pagination").cloned().unwrap_or(Value::Null);

    let releases = ["/data", "/data/releases", "/releases"]
        .iter()
        .filter_map(|path| body.pointer(path))
        .find_map(Value::as_array)
        .cloned()
        .ok_or_else(|| {
            SourceError::MalformedResponse(
                "no release array at .data, .data.releases or .releases".into(),
            )
        })?;

    let count = releases.len() as u64;
    let limit = limit.max(1);
    let field = |name: &str| pagination.get(name).and_then(Value::as_u64).filter(|n| *n > 0);
    let default_pages = count.div_ceil(u64::from(limit)).max(1);

    Ok(WindowPage {
        pagination: Pagination {
            page: field("page").map_or(page, |p| p as u32),
            total_pages: field("totalPages").unwrap_or(default_pages) as u32,
            total_releases: field("totalReleases").unwrap_or(count),
            releases_per_page: field("releasesPerPage").map_or(limit, |n| n as u32),
        },
        releases,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn release_array_locations_in_priority_order() {
        let data = json!({ "data": [{ "ocid": "a" }], "releases": [{ "ocid": "z" }] });
        assert_eq!(parse_window(data, 1, 100).unwrap().releases[0]["ocid"], "a");

        let nested = json!({ "data": { "releases": [{ "ocid": "b" }] } });
        assert_eq!(parse_window(nested, 1, 100).unwrap().releases[0]["ocid"], "b");

        let flat = json!({ "data": {}, "releases": [{ "ocid": "c" }] });
        assert_eq!(parse_window(flat, 1, 100).unwrap().releases[0]["ocid"], "c");
    }

    #[test]
    fn unrecognized_shape_is_malformed() {
        let err = parse_window(json!({ "items": [] }), 1, 100).unwrap_err();
        assert!(matches!(err, SourceError::MalformedResponse(_)));
    }

    #[test]
    fn pagination_defaults_from_page_contents() {
        let body = json!({ "data": [{}, {}, {}] });
        let page = parse_window(body, 2, 2).unwrap();
        assert_eq!(
            page.pagination,
            Pagination {
                page: 2,
                total_pages: 2,
                total_releases: 3,
                releases_per_page: 2
            }
        );

        let empty = parse_window(json!({ "data": [] }), 1, 100).unwrap();
        assert_eq!(empty.pagination.total_pages, 1);
    }

    #[test]
    fn upstream_pagination_wins() {
        let body = json!({
            "data": [{}],
            "pagination": { "page": 1, "totalPages": 4, "totalReleases": 350, "releasesPerPage": 100 }
        });
        let page = parse_window(body, 1, 100).unwrap();
        assert_eq!(page.pagination.total_pages, 4);
        assert_eq!(page.pagination.total_releases, 350);
    }
}
