//! Integration tests for the HTTP surface: multipart upload, download,
//! status mapping, and upload rate limiting.

use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

use vanish_server::blobs::MemoryBlobStore;
use vanish_server::clock::{Clock, ManualClock, SystemClock};
use vanish_server::config::Config;
use vanish_server::leases::LeaseRegistry;
use vanish_server::lifecycle::{EngineSettings, LifecycleEngine};

/// Helper: start the server on a random port and return the base URL.
async fn start_test_server(config: Config) -> String {
    start_test_server_with_clock(config, Arc::new(SystemClock)).await
}

async fn start_test_server_with_clock(config: Config, clock: Arc<dyn Clock>) -> String {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let data_dir = tmp_dir.path().to_str().unwrap().to_string();

    let db = vanish_server::db::init_db(&data_dir).expect("Failed to init DB");
    let engine = LifecycleEngine::start(
        LeaseRegistry::new(db),
        Arc::new(MemoryBlobStore::new()),
        clock,
        EngineSettings::from_config(&config.lifecycle),
    );
    let state = vanish_server::state::AppState::new(engine, &config);
    let app = vanish_server::routes::build_router(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
        // Keep tmp_dir alive so the data directory isn't deleted
        let _keep = tmp_dir;
    });

    format!("http://{}", addr)
}

fn file_form(name: &str, data: &[u8]) -> Form {
    Form::new().part("file", Part::bytes(data.to_vec()).file_name(name.to_string()))
}

async fn upload(client: &reqwest::Client, base_url: &str, form: Form) -> reqwest::Response {
    client
        .post(format!("{}/upload", base_url))
        .multipart(form)
        .send()
        .await
        .unwrap()
}

// =============================================================================
// Upload / download
// =============================================================================

#[tokio::test]
async fn test_upload_then_download_once() {
    let base_url = start_test_server(Config::default()).await;
    let client = reqwest::Client::new();

    let resp = upload(&client, &base_url, file_form("notes.txt", b"hello")).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["filename"], "notes.txt");
    assert_eq!(body["access_limit"], 1);

    let token = body["token"].as_str().unwrap().to_string();
    let link = body["download_link"].as_str().unwrap().to_string();
    assert!(link.ends_with(&format!("/download/{}", token)), "link {}", link);

    let resp = client
        .get(format!("{}/download/{}", base_url, token))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let disposition = resp
        .headers()
        .get("content-disposition")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(disposition.contains("attachment"));
    assert!(disposition.contains("notes.txt"));
    assert_eq!(resp.bytes().await.unwrap().as_ref(), b"hello");

    let resp = client
        .get(format!("{}/download/{}", base_url, token))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert_eq!(resp.text().await.unwrap(), "Download limit reached");
}

#[tokio::test]
async fn test_upload_with_explicit_limits() {
    let base_url = start_test_server(Config::default()).await;
    let client = reqwest::Client::new();

    let form = file_form("data.bin", &[0u8, 159, 146, 150])
        .text("access_limit", "2")
        .text("expiry_minutes", "30");
    let resp = upload(&client, &base_url, form).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["access_limit"], 2);
    let token = body["token"].as_str().unwrap().to_string();

    for _ in 0..2 {
        let resp = client
            .get(format!("{}/download/{}", base_url, token))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.bytes().await.unwrap().as_ref(), &[0u8, 159, 146, 150]);
    }

    let resp = client
        .get(format!("{}/download/{}", base_url, token))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_public_url_used_in_link() {
    let mut config = Config::default();
    config.public_url = Some("https://share.example.test/".to_string());
    let base_url = start_test_server(config).await;
    let client = reqwest::Client::new();

    let resp = upload(&client, &base_url, file_form("a.txt", b"a")).await;
    let body: Value = resp.json().await.unwrap();
    let token = body["token"].as_str().unwrap();
    assert_eq!(
        body["download_link"],
        format!("https://share.example.test/download/{}", token)
    );
}

// =============================================================================
// Errors
// =============================================================================

#[tokio::test]
async fn test_missing_file_rejected() {
    let base_url = start_test_server(Config::default()).await;
    let client = reqwest::Client::new();

    let form = Form::new().text("access_limit", "1");
    let resp = upload(&client, &base_url, form).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(resp.text().await.unwrap(), "No file uploaded");
}

#[tokio::test]
async fn test_invalid_limits_rejected() {
    let base_url = start_test_server(Config::default()).await;
    let client = reqwest::Client::new();

    let resp = upload(
        &client,
        &base_url,
        file_form("a.txt", b"a").text("expiry_minutes", "0"),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = upload(
        &client,
        &base_url,
        file_form("a.txt", b"a").text("access_limit", "-3"),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = upload(
        &client,
        &base_url,
        file_form("a.txt", b"a").text("access_limit", "lots"),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(resp.text().await.unwrap(), "access_limit must be an integer");
}

#[tokio::test]
async fn test_oversized_upload_rejected() {
    let mut config = Config::default();
    config.lifecycle.max_upload_size_mb = 1;
    let base_url = start_test_server(config).await;
    let client = reqwest::Client::new();

    let data = vec![7u8; 1024 * 1024 + 1];
    let resp = upload(&client, &base_url, file_form("big.bin", &data)).await;
    assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);

    let data = vec![7u8; 1024 * 1024];
    let resp = upload(&client, &base_url, file_form("fits.bin", &data)).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn test_expired_link_is_forbidden() {
    let clock = ManualClock::default();
    let base_url = start_test_server_with_clock(Config::default(), Arc::new(clock.clone())).await;
    let client = reqwest::Client::new();

    let form = file_form("a.txt", b"a").text("expiry_minutes", "5");
    let resp = upload(&client, &base_url, form).await;
    let body: Value = resp.json().await.unwrap();
    let token = body["token"].as_str().unwrap().to_string();

    clock.advance(chrono::Duration::minutes(6));

    let resp = client
        .get(format!("{}/download/{}", base_url, token))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert_eq!(resp.text().await.unwrap(), "File expired");

    // The expired lease is deleted on that first refusal
    let resp = client
        .get(format!("{}/download/{}", base_url, token))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unknown_token_is_not_found() {
    let base_url = start_test_server(Config::default()).await;
    let client = reqwest::Client::new();

    for token in ["AAAAAAAAAAAAAAAAAAAAAA", "not-a-token"] {
        let resp = client
            .get(format!("{}/download/{}", base_url, token))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND, "token {}", token);
        assert_eq!(resp.text().await.unwrap(), "Invalid or expired link");
    }
}

#[tokio::test]
async fn test_consumed_share_disappears_after_grace() {
    let mut config = Config::default();
    config.lifecycle.grace_period_secs = 0;
    let base_url = start_test_server(config).await;
    let client = reqwest::Client::new();

    let resp = upload(&client, &base_url, file_form("a.txt", b"a")).await;
    let body: Value = resp.json().await.unwrap();
    let token = body["token"].as_str().unwrap().to_string();

    let resp = client
        .get(format!("{}/download/{}", base_url, token))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    tokio::time::sleep(Duration::from_millis(300)).await;

    let resp = client
        .get(format!("{}/download/{}", base_url, token))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

// =============================================================================
// Rate limiting
// =============================================================================

#[tokio::test]
async fn test_upload_rate_limit() {
    let mut config = Config::default();
    config.lifecycle.uploads_per_minute = 2;
    let base_url = start_test_server(config).await;
    let client = reqwest::Client::new();

    for _ in 0..2 {
        let resp = upload(&client, &base_url, file_form("a.txt", b"a")).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
    }
    let resp = upload(&client, &base_url, file_form("a.txt", b"a")).await;
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);

    // Other routes are not rate limited
    let resp = client.get(format!("{}/health", base_url)).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}
