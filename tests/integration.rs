use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn compras_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("compras");
    path
}

fn setup_test_env(base_url: &str) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/compras.sqlite"

[upstream]
base_url = "{}"
timeout_secs = 5

[ingest]
delay_ms = 0

[server]
bind = "127.0.0.1:7341"

[logging]
level = "warn"
"#,
        root.display(),
        base_url
    );

    let config_path = config_dir.join("compras.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_compras(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = compras_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run compras binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env("http://127.0.0.1:9/api");

    let (stdout, stderr, success) = run_compras(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/compras.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env("http://127.0.0.1:9/api");

    let (_, _, success1) = run_compras(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_compras(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_search_empty_database() {
    let (_tmp, config_path) = setup_test_env("http://127.0.0.1:9/api");

    run_compras(&config_path, &["init"]);
    let (stdout, _, success) = run_compras(&config_path, &["search", "--keyword", "agua"]);
    assert!(success);
    assert!(stdout.contains("No results."));
}

#[test]
fn test_stats_on_empty_database() {
    let (_tmp, config_path) = setup_test_env("http://127.0.0.1:9/api");

    run_compras(&config_path, &["init"]);
    let (stdout, _, success) = run_compras(&config_path, &["stats"]);
    assert!(success);
    assert!(stdout.contains("Releases:    0"));
    assert!(stdout.contains("Last update: never"));
}

#[test]
fn test_get_missing_release_fails() {
    let (_tmp, config_path) = setup_test_env("http://127.0.0.1:9/api");

    run_compras(&config_path, &["init"]);
    let (_, stderr, success) = run_compras(&config_path, &["get", "ocds-missing"]);
    assert!(!success);
    assert!(stderr.contains("release not found"), "stderr: {}", stderr);
}

#[test]
fn test_sync_rejects_reversed_range() {
    let (_tmp, config_path) = setup_test_env("http://127.0.0.1:9/api");

    run_compras(&config_path, &["init"]);
    let (_, stderr, success) = run_compras(
        &config_path,
        &["sync", "--from", "2024-02-01", "--to", "2024-01-01"],
    );
    assert!(!success);
    assert!(stderr.contains("invalid ingestion options"), "stderr: {}", stderr);
}

#[test]
fn test_invalid_config_rejected() {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("bad.toml");
    fs::write(
        &config_path,
        "[db]\npath = \"x.sqlite\"\n[ingest]\nwindow_days = 0\n",
    )
    .unwrap();

    let (_, stderr, success) = run_compras(&config_path, &["init"]);
    assert!(!success);
    assert!(stderr.contains("window_days"));
}

#[test]
fn test_sync_unreachable_upstream_records_window_error() {
    // Port 9 (discard) is not listening: every window fails with the
    // connectivity error, and the run still completes.
    let (_tmp, config_path) = setup_test_env("http://127.0.0.1:9/api");

    run_compras(&config_path, &["init"]);
    let (stdout, stderr, success) = run_compras(
        &config_path,
        &["sync", "--from", "2024-01-01", "--to", "2024-01-03", "--progress", "off"],
    );
    assert!(success, "sync failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("processed: 0"));
    assert!(stdout.contains("batch-2024-01-01"));
    assert!(stdout.contains("Error de conexión"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_sync_then_search_and_get() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/date/2024-01-01/2024-01-03/1"))
        .and(query_param("limit", "100"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": [
                { "ocid": "ocds-a", "tender": { "title": "summary a" } },
                { "ocid": "ocds-b", "tender": { "title": "summary b" } }
            ],
            "pagination": { "page": 1, "totalPages": 1, "totalReleases": 2, "releasesPerPage": 100 }
        })))
        .mount(&server)
        .await;

    for (ocid, title) in [("ocds-a", "Compra de agua potable"), ("ocds-b", "Reparación de escuelas")] {
        Mock::given(method("GET"))
            .and(path(format!("/api/release/{}", ocid)))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "releases": [{
                    "ocid": ocid,
                    "id": format!("{}-01", ocid),
                    "date": "2024-01-02T10:00:00Z",
                    "buyer": { "id": "B1", "name": "Ministerio de Educación" },
                    "tender": {
                        "title": title,
                        "status": "active",
                        "value": { "amount": 1500000, "currency": "DOP" },
                        "documents": [{ "id": "d1", "url": "https://example.test/d1.pdf" }]
                    },
                    "parties": [{ "id": "B1", "name": "Ministerio de Educación", "roles": ["buyer"],
                                  "address": { "region": "Distrito Nacional" } }]
                }]
            })))
            .mount(&server)
            .await;
    }

    let base_url = format!("{}/api", server.uri());
    let (_tmp, config_path) = setup_test_env(&base_url);

    let config = config_path.clone();
    let out = tokio::task::spawn_blocking(move || {
        run_compras(&config, &["init"]);
        let sync = run_compras(
            &config,
            &["sync", "--from", "2024-01-01", "--to", "2024-01-03", "--progress", "off"],
        );
        let search = run_compras(&config, &["search", "--keyword", "AGUA", "--json"]);
        let get = run_compras(&config, &["get", "ocds-b"]);
        let filters = run_compras(&config, &["filters", "--json"]);
        (sync, search, get, filters)
    })
    .await
    .unwrap();

    let ((sync_out, sync_err, sync_ok), (search_out, _, search_ok), (get_out, _, get_ok), (filters_out, _, filters_ok)) =
        out;

    assert!(sync_ok, "sync failed: stdout={}, stderr={}", sync_out, sync_err);
    assert!(sync_out.contains("processed: 2"));
    assert!(sync_out.contains("successful: 2"));
    assert!(sync_out.contains("failed: 0"));

    assert!(search_ok);
    let page: serde_json::Value = serde_json::from_str(&search_out).unwrap();
    assert_eq!(page["total"], 1);
    assert_eq!(page["releases"][0]["ocid"], "ocds-a");
    assert_eq!(page["releases"][0]["buyer_region"], "Distrito Nacional");

    assert!(get_ok);
    assert!(get_out.contains("Reparación de escuelas"));

    assert!(filters_ok);
    let options: serde_json::Value = serde_json::from_str(&filters_out).unwrap();
    assert_eq!(options["entities"], serde_json::json!(["Ministerio de Educación"]));
    assert_eq!(options["regions"], serde_json::json!(["Distrito Nacional"]));
}
