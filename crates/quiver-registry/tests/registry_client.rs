//! Integration tests for RegistryClient.
//!
//! Uses wiremock for HTTP mocking. Tests cover list_versions, asset_info,
//! conditional lock file fetches, status mapping (401/404/410/429/5xx) and
//! retry behavior.

use std::time::Duration;

use quiver_core::model::ArtifactType;
use quiver_registry::{ConditionalOutcome, FetchError, RegistryClient, RegistryConfig};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn create_test_client(mock_server: &MockServer) -> RegistryClient {
    let config = RegistryConfig::default()
        .with_url(mock_server.uri())
        .with_token("test-token")
        .with_max_retries(0);
    RegistryClient::new(config).expect("failed to create client")
}

#[tokio::test]
async fn test_list_versions_skips_yanked() {
    let mock_server = MockServer::start().await;

    let versions_json = serde_json::json!({
        "name": "commit-helper",
        "versions": [
            {"version": "1.2.0", "published_at": "2026-03-01T10:00:00Z"},
            {"version": "1.1.0", "yanked": true},
            {"version": "1.0.0"}
        ]
    });

    Mock::given(method("GET"))
        .and(path("/assets/commit-helper/versions"))
        .and(header("authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&versions_json))
        .mount(&mock_server)
        .await;

    let client = create_test_client(&mock_server).await;
    let versions = client
        .list_versions("commit-helper")
        .await
        .expect("list versions failed");

    assert_eq!(versions, vec!["1.2.0", "1.0.0"]);
}

#[tokio::test]
async fn test_asset_info_resolves_relative_download_url() {
    let mock_server = MockServer::start().await;

    let info_json = serde_json::json!({
        "name": "commit-helper",
        "version": "1.2.0",
        "type": "skill",
        "download_url": "/files/commit-helper-1.2.0.zip",
        "hashes": {"sha256": "ab".repeat(32)},
        "size": 2048,
        "clients": ["claude-code"],
        "dependencies": [{"name": "git-basics", "version": ">=1.0,<2.0"}]
    });

    Mock::given(method("GET"))
        .and(path("/assets/commit-helper/1.2.0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&info_json))
        .mount(&mock_server)
        .await;

    let client = create_test_client(&mock_server).await;
    let info = client
        .asset_info("commit-helper", "1.2.0")
        .await
        .expect("asset info failed");

    assert_eq!(info.kind, ArtifactType::Skill);
    assert_eq!(
        info.download_url,
        format!("{}/files/commit-helper-1.2.0.zip", mock_server.uri())
    );
    assert_eq!(info.size, Some(2048));
    assert_eq!(info.dependencies[0].version.as_deref(), Some(">=1.0,<2.0"));
}

#[tokio::test]
async fn test_asset_info_name_mismatch() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/assets/a/1.0.0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "name": "b",
            "version": "1.0.0",
            "type": "rule",
            "download_url": "https://cdn.example.com/b.zip"
        })))
        .mount(&mock_server)
        .await;

    let client = create_test_client(&mock_server).await;
    let result = client.asset_info("a", "1.0.0").await;
    assert!(matches!(result, Err(FetchError::InvalidResponse { .. })));
}

#[tokio::test]
async fn test_status_mapping() {
    let mock_server = MockServer::start().await;

    for (route, status) in [("/assets/secret/versions", 401u16), ("/assets/forbidden/versions", 403u16)] {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(status))
            .mount(&mock_server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/assets/missing/versions"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/assets/gone/versions"))
        .respond_with(ResponseTemplate::new(410))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/assets/teapot/versions"))
        .respond_with(ResponseTemplate::new(418))
        .mount(&mock_server)
        .await;

    let client = create_test_client(&mock_server).await;

    let err = client.list_versions("secret").await.unwrap_err();
    assert!(matches!(err, FetchError::Unauthorized { .. }));
    assert_eq!(err.exit_code(), 2);

    let err = client.list_versions("forbidden").await.unwrap_err();
    assert!(matches!(err, FetchError::Unauthorized { .. }));

    let err = client.list_versions("missing").await.unwrap_err();
    assert!(matches!(err, FetchError::NotFound { .. }));

    let err = client.list_versions("gone").await.unwrap_err();
    assert!(matches!(err, FetchError::NotFound { .. }));

    let err = client.list_versions("teapot").await.unwrap_err();
    assert!(matches!(err, FetchError::InvalidResponse { .. }));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_rate_limiting_with_retry_after() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/assets/busy/versions"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "5"))
        .mount(&mock_server)
        .await;

    let client = create_test_client(&mock_server).await;
    match client.list_versions("busy").await {
        Err(FetchError::RateLimited { retry_after }) => {
            assert_eq!(retry_after, Some(Duration::from_secs(5)));
        }
        other => panic!("expected RateLimited error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_retry_on_5xx_then_success() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/assets/flaky/versions"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/assets/flaky/versions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "name": "flaky",
            "versions": [{"version": "0.1.0"}]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = RegistryConfig::default()
        .with_url(mock_server.uri())
        .with_max_retries(1);
    let client = RegistryClient::new(config).expect("failed to create client");

    let versions = client.list_versions("flaky").await.expect("retry failed");
    assert_eq!(versions, vec!["0.1.0"]);
}

#[tokio::test]
async fn test_retry_on_429_with_retry_after() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/assets/retry-test/versions"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "1"))
        .expect(2)
        .mount(&mock_server)
        .await;

    let config = RegistryConfig::default()
        .with_url(mock_server.uri())
        .with_max_retries(1);
    let client = RegistryClient::new(config).expect("failed to create client");

    let result = client.list_versions("retry-test").await;
    assert!(matches!(result, Err(FetchError::RateLimited { .. })));
}

#[tokio::test]
async fn test_token_not_sent_to_other_hosts() {
    let registry = MockServer::start().await;
    let cdn = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/files/a.zip"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"bytes".to_vec()))
        .expect(1)
        .mount(&cdn)
        .await;

    let client = create_test_client(&registry).await;
    let body = client
        .download(&format!("{}/files/a.zip", cdn.uri()))
        .await
        .expect("download failed");
    assert_eq!(body, b"bytes");

    let requests = cdn.received_requests().await.expect("recording enabled");
    assert!(requests
        .iter()
        .all(|r| !r.headers.contains_key("authorization")));
}

#[tokio::test]
async fn test_fetch_lockfile_conditional() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/team/quiver.lock"))
        .and(header("if-none-match", "\"v1\""))
        .respond_with(ResponseTemplate::new(304))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/team/quiver.lock"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("lock-version = 2")
                .insert_header("etag", "\"v1\""),
        )
        .mount(&mock_server)
        .await;

    let client = create_test_client(&mock_server).await;
    let url = format!("{}/team/quiver.lock", mock_server.uri());

    let fresh = client.fetch_lockfile(&url, None).await.expect("fetch failed");
    assert_eq!(
        fresh,
        ConditionalOutcome::Fetched {
            content: "lock-version = 2".to_string(),
            etag: Some("\"v1\"".to_string()),
        }
    );

    let again = client
        .fetch_lockfile(&url, Some("\"v1\""))
        .await
        .expect("fetch failed");
    assert_eq!(again, ConditionalOutcome::NotModified);
}

#[test]
fn test_invalid_base_url_rejected() {
    let config = RegistryConfig::default().with_url("registry.local");
    assert!(matches!(
        RegistryClient::new(config),
        Err(FetchError::Config { .. })
    ));
}
