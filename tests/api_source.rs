//! Paginated API adapter against a mock vendor using wiremock.
//!
//! Covers pagination end-of-stream rules, retry/backoff, Retry-After,
//! authentication (API key and OAuth2 client credentials) and a full engine
//! run over HTTP.

use rust_decimal::Decimal;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use vendor_sync::config::{RunConfig, SourceConfig};
use vendor_sync::engine::{RunState, SyncEngine};
use vendor_sync::error::{SourceError, SyncError};
use vendor_sync::rate_limit::RateLimitConfig;
use vendor_sync::source::api::{ApiFieldMap, ApiSourceConfig};
use vendor_sync::source::auth::Credentials;
use vendor_sync::source::retry::RetryPolicy;
use vendor_sync::source::{PaginatedApiSource, SourceAdapter};
use vendor_sync::store::MemoryStore;
use vendor_sync::transform::PriceTransform;
use vendor_sync::types::CatalogRow;

// =============================================================================
// Test Helpers
// =============================================================================

fn fields() -> ApiFieldMap {
    ApiFieldMap {
        sku: Some("id".into()),
        brand: Some("brand".into()),
        part: Some("part".into()),
        cost: Some("cost".into()),
        inventory: Some("qty".into()),
        ..Default::default()
    }
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_retries: 2,
        initial_backoff_ms: 10,
        max_backoff_ms: 50,
        jitter: false,
        ..Default::default()
    }
}

fn source(
    server: &MockServer,
    config: ApiSourceConfig,
    credentials: Credentials,
) -> PaginatedApiSource {
    PaginatedApiSource::new(
        "acme-api",
        config,
        credentials,
        &RateLimitConfig::unlimited(),
        fast_retry(),
    )
    .unwrap_or_else(|e| panic!("source for {}: {e}", server.uri()))
}

fn item(id: &str) -> serde_json::Value {
    json!({"id": id, "brand": "Acme", "part": id, "cost": "1.00", "qty": 1})
}

async fn drain(source: &mut PaginatedApiSource) -> Vec<Result<usize, SourceError>> {
    let mut pages = Vec::new();
    loop {
        match source.next_page().await {
            Ok(Some(page)) => pages.push(Ok(page.records.len())),
            Ok(None) => break,
            Err(e) => {
                let fatal = e.is_auth();
                pages.push(Err(e));
                if fatal {
                    break;
                }
            }
        }
    }
    pages
}

// =============================================================================
// Pagination
// =============================================================================

#[tokio::test]
async fn test_stops_at_reported_total_pages() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/items"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [item("A"), item("B")],
            "meta": {"total_pages": 2, "total_count": 3}
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/items"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [item("C")],
            "meta": {"total_pages": 2, "total_count": 3}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut src = source(&server, ApiSourceConfig::new(server.uri(), fields()), Credentials::None);
    let pages = drain(&mut src).await;

    assert_eq!(pages.len(), 2);
    assert!(matches!(pages[0], Ok(2)));
    assert!(matches!(pages[1], Ok(1)));
}

#[tokio::test]
async fn test_short_page_ends_stream_without_total() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/items"))
        .and(query_param("page", "1"))
        .and(query_param("per_page", "2"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"data": [item("A"), item("B")]})),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/items"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": [item("C")]})))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/items"))
        .and(query_param("page", "3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
        .expect(0)
        .mount(&server)
        .await;

    let config = ApiSourceConfig::new(server.uri(), fields()).with_page_size("per_page", 2);
    let mut src = source(&server, config, Credentials::None);
    let pages = drain(&mut src).await;

    assert_eq!(pages.len(), 2);
}

#[tokio::test]
async fn test_first_page_sets_size_when_vendor_takes_none() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/items"))
        .and(query_param("page", "1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"data": [item("A"), item("B")]})),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/items"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": [item("C")]})))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/items"))
        .and(query_param("page", "3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": [item("C")]})))
        .expect(0)
        .mount(&server)
        .await;

    let mut src = source(&server, ApiSourceConfig::new(server.uri(), fields()), Credentials::None);
    let pages = drain(&mut src).await;

    assert_eq!(pages.len(), 2);
    assert!(matches!(pages[1], Ok(1)));
}

#[tokio::test]
async fn test_clamped_last_page_is_not_refetched_forever() {
    let server = MockServer::start().await;

    // Vendor answers every page number with its final page
    Mock::given(method("GET"))
        .and(path("/items"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": [item("Z")]})))
        .expect(2)
        .mount(&server)
        .await;

    let mut src = source(&server, ApiSourceConfig::new(server.uri(), fields()), Credentials::None);
    let pages = drain(&mut src).await;

    assert_eq!(pages.len(), 1);
    assert!(matches!(pages[0], Ok(1)));
}

#[tokio::test]
async fn test_seek_resumes_at_page() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/items"))
        .and(query_param("page", "3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [item("Z")],
            "meta": {"total_pages": 3}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut src = source(&server, ApiSourceConfig::new(server.uri(), fields()), Credentials::None);
    src.seek(2);
    let page = src.next_page().await.unwrap().unwrap();

    assert_eq!(page.index, 2);
    assert_eq!(page.records[0].sku.as_deref(), Some("Z"));
    assert!(src.next_page().await.unwrap().is_none());
}

// =============================================================================
// Retry
// =============================================================================

#[tokio::test]
async fn test_retries_transient_errors() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/items"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/items"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [item("A")],
            "meta": {"total_pages": 1}
        })))
        .mount(&server)
        .await;

    let mut src = source(&server, ApiSourceConfig::new(server.uri(), fields()), Credentials::None);
    let page = src.next_page().await.unwrap().unwrap();

    assert_eq!(page.records.len(), 1);
    assert_eq!(src.rate_limit_stats().requests, 3);
}

#[tokio::test]
async fn test_honors_retry_after() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/items"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "1"))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/items"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [item("A")],
            "meta": {"total_pages": 1}
        })))
        .mount(&server)
        .await;

    let mut src = source(&server, ApiSourceConfig::new(server.uri(), fields()), Credentials::None);
    let started = std::time::Instant::now();
    src.next_page().await.unwrap();

    assert!(started.elapsed() >= Duration::from_secs(1));
}

#[tokio::test]
async fn test_exhausted_retries_skip_page_and_continue() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/items"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(502))
        .expect(3)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/items"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [item("B")],
            "meta": {"total_pages": 2}
        })))
        .mount(&server)
        .await;

    let mut src = source(&server, ApiSourceConfig::new(server.uri(), fields()), Credentials::None);

    let first = src.next_page().await;
    assert!(matches!(first, Err(SourceError::Transient { .. })));
    assert_eq!(src.position(), 1);

    let second = src.next_page().await.unwrap().unwrap();
    assert_eq!(second.index, 1);
}

#[tokio::test]
async fn test_non_retryable_status_is_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/items"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let mut src = source(&server, ApiSourceConfig::new(server.uri(), fields()), Credentials::None);
    assert!(matches!(
        src.next_page().await,
        Err(SourceError::Status { status: 404, .. })
    ));
}

// =============================================================================
// Authentication
// =============================================================================

#[tokio::test]
async fn test_api_key_header_is_sent() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/items"))
        .and(header("X-Api-Key", "k-123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
        .expect(1)
        .mount(&server)
        .await;

    let mut src = source(
        &server,
        ApiSourceConfig::new(server.uri(), fields()),
        Credentials::ApiKey {
            header: "X-Api-Key".into(),
            key: "k-123".into(),
        },
    );
    assert_eq!(src.next_page().await.unwrap().unwrap().records.len(), 0);
}

#[tokio::test]
async fn test_unauthorized_is_auth_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/items"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let mut src = source(
        &server,
        ApiSourceConfig::new(server.uri(), fields()),
        Credentials::ApiKey {
            header: "X-Api-Key".into(),
            key: "revoked".into(),
        },
    );
    let err = src.next_page().await.unwrap_err();
    assert!(err.is_auth(), "expected auth error, got {err}");
}

fn oauth(server: &MockServer) -> Credentials {
    Credentials::OAuth2 {
        token_url: format!("{}/oauth/token", server.uri()),
        client_id: "sync".into(),
        client_secret: "s3cret".into(),
        scopes: vec!["catalog.read".into()],
        refresh_margin: Duration::from_secs(60),
    }
}

#[tokio::test]
async fn test_oauth2_token_is_fetched_once_and_reused() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("grant_type=client_credentials"))
        .and(body_string_contains("client_id=sync"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "tok-1",
            "token_type": "Bearer",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/items"))
        .and(header("Authorization", "Bearer tok-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [item("A")],
            "meta": {"total_pages": 2}
        })))
        .expect(2)
        .mount(&server)
        .await;

    let mut src = source(&server, ApiSourceConfig::new(server.uri(), fields()), oauth(&server));
    let pages = drain(&mut src).await;
    assert_eq!(pages.len(), 2);
}

#[tokio::test]
async fn test_oauth2_rejected_token_is_refreshed_once() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "tok",
            "expires_in": 3600
        })))
        .expect(2)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/items"))
        .respond_with(ResponseTemplate::new(401))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/items"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [item("A")],
            "meta": {"total_pages": 1}
        })))
        .mount(&server)
        .await;

    let mut src = source(&server, ApiSourceConfig::new(server.uri(), fields()), oauth(&server));
    assert_eq!(src.next_page().await.unwrap().unwrap().records.len(), 1);
}

#[tokio::test]
async fn test_token_endpoint_rejection_is_auth_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(400).set_body_string("invalid_client"))
        .mount(&server)
        .await;

    let mut src = source(&server, ApiSourceConfig::new(server.uri(), fields()), oauth(&server));
    assert!(src.next_page().await.unwrap_err().is_auth());
}

#[tokio::test]
async fn test_token_endpoint_outage_is_retried() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "tok-2",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/items"))
        .and(header("Authorization", "Bearer tok-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [item("A")],
            "meta": {"total_pages": 1}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut src = source(&server, ApiSourceConfig::new(server.uri(), fields()), oauth(&server));
    assert_eq!(src.next_page().await.unwrap().unwrap().records.len(), 1);
}

#[tokio::test]
async fn test_token_endpoint_down_is_transient_not_auth() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(429))
        .expect(3)
        .mount(&server)
        .await;

    let mut src = source(&server, ApiSourceConfig::new(server.uri(), fields()), oauth(&server));
    let err = src.next_page().await.unwrap_err();

    assert!(!err.is_auth(), "expected transient error, got {err}");
    assert!(matches!(err, SourceError::Transient { .. }));
    assert_eq!(src.position(), 1);
}

// =============================================================================
// Engine over HTTP
// =============================================================================

fn api_run_config(server: &MockServer) -> RunConfig {
    let mut config = RunConfig::new(
        "acme",
        SourceConfig::PaginatedApi(ApiSourceConfig::new(server.uri(), fields())),
    );
    config.retry = fast_retry();
    config.transform = PriceTransform::with_multiplier(Decimal::new(15, 1));
    config
}

fn acme_catalog() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::with_catalog(vec![CatalogRow {
        product_key: "P-123A".into(),
        brand: Some("Acme".into()),
        part_number: Some("123A".into()),
        vendor_codes: vec![],
    }]))
}

#[tokio::test]
async fn test_engine_scenario_over_http() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/items"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"id": "A-1", "brand": "Acme", "part": "123-A", "cost": 10.00, "qty": 5}],
            "meta": {"total_pages": 1, "total_count": 1}
        })))
        .mount(&server)
        .await;

    let store = acme_catalog();
    let (_tx, rx) = watch::channel(false);
    let report = SyncEngine::from_config(api_run_config(&server), store.clone(), store.clone())
        .unwrap()
        .run(rx)
        .await;

    assert_eq!(report.state, RunState::Complete);
    assert_eq!(report.summary.counters.created, 1);
    let facts = store.facts_for_vendor("acme").await;
    assert_eq!(facts[0].cost, "15.00".parse::<Decimal>().unwrap());
    assert_eq!(facts[0].inventory_qty, Some(5));
}

#[tokio::test]
async fn test_engine_auth_failure_exits_non_zero_with_summary() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/items"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let store = acme_catalog();
    let (_tx, rx) = watch::channel(false);
    let report = SyncEngine::from_config(api_run_config(&server), store.clone(), store)
        .unwrap()
        .run(rx)
        .await;

    assert_eq!(report.state, RunState::Failed);
    assert!(matches!(report.fatal, Some(SyncError::Auth(_))));
    assert_eq!(report.exit_code(), 2);
    assert_eq!(report.summary.counters.pages_fetched, 0);
}

#[tokio::test]
async fn test_engine_unreachable_source_exits_non_zero() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/items"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let store = acme_catalog();
    let mut config = api_run_config(&server);
    config.max_consecutive_page_failures = 2;
    let (_tx, rx) = watch::channel(false);
    let report = SyncEngine::from_config(config, store.clone(), store)
        .unwrap()
        .run(rx)
        .await;

    assert!(matches!(
        report.fatal,
        Some(SyncError::SourceUnreachable { attempts: 2, .. })
    ));
    assert_eq!(report.exit_code(), 3);
    assert_eq!(report.summary.counters.pages_failed, 2);
}
