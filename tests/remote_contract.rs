//! Bookmark service contract tests.
//!
//! These tests run the real HTTP client against a mock server and verify:
//! - Bearer authentication and request paths
//! - Retry with backoff on 429, and no retry on other failures
//! - Token refresh and its fallback behaviour
//! - A full backup and restore round against the REST endpoints

use reloader::config::RemoteConfig;
use reloader::platform::now_epoch_millis;
use reloader::remote::{RemoteApi, RemoteClient, RemoteError};
use reloader::rules::Rule;
use reloader::store::{Credential, RuleStore};
use reloader::sync::{Reconciler, SyncStats, item_payload, pattern_link};
use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config(server: &MockServer) -> RemoteConfig {
    RemoteConfig::default()
        .with_base_url(server.uri())
        .with_refresh_url(format!("{}/oauth/refresh", server.uri()))
        .with_initial_backoff_ms(1)
        .with_request_pause_ms(0)
}

async fn logged_in_store(expires_in_secs: u64) -> Arc<RuleStore> {
    let store = Arc::new(RuleStore::in_memory());
    store
        .set_credential(Credential::from_login(
            "old-access",
            "old-refresh",
            expires_in_secs,
            now_epoch_millis(),
        ))
        .await
        .expect("store credential");
    store
}

fn client(server: &MockServer, store: Arc<RuleStore>) -> RemoteClient {
    RemoteClient::new(config(server), store).expect("build client")
}

// ────────────────────────────────────────────────────────────────────────────
// Request format and retry policy
// ────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_requests_carry_bearer_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/collections"))
        .and(header("authorization", "Bearer tok"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": []})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server, Arc::new(RuleStore::in_memory()));
    let body = client.get("/collections", "tok").await.expect("request succeeds");
    assert_eq!(body, json!({"items": []}));
}

#[tokio::test]
async fn test_rate_limit_is_retried_until_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/collections"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/collections"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": []})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server, Arc::new(RuleStore::in_memory()));
    assert!(client.get("/collections", "tok").await.is_ok());
}

#[tokio::test]
async fn test_rate_limit_gives_up_after_five_retries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/collections"))
        .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
        .expect(6)
        .mount(&server)
        .await;

    let client = client(&server, Arc::new(RuleStore::in_memory()));
    let err = client.get("/collections", "tok").await.unwrap_err();
    assert_eq!(err.status(), Some(429));
    assert_eq!(err.code(), "rate_limited");
    match err {
        RemoteError::Api { body, path, .. } => {
            assert_eq!(body, "slow down");
            assert_eq!(path, "/collections");
        }
        other => panic!("expected API error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_server_error_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/raindrop"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server, Arc::new(RuleStore::in_memory()));
    let err = client
        .post("/raindrop", &json!({"link": "x"}), "tok")
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(500));
    assert_eq!(err.code(), "api_error");
}

#[tokio::test]
async fn test_delete_with_empty_body_reports_success() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/raindrop/7"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server, Arc::new(RuleStore::in_memory()));
    let body = client.delete("/raindrop/7", "tok").await.expect("delete succeeds");
    assert_eq!(body, json!({"result": true}));
}

#[tokio::test]
async fn test_non_json_success_body_is_a_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/collections"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
        .mount(&server)
        .await;

    let client = client(&server, Arc::new(RuleStore::in_memory()));
    let err = client.get("/collections", "tok").await.unwrap_err();
    assert_eq!(err.code(), "decode");
}

// ────────────────────────────────────────────────────────────────────────────
// Token refresh
// ────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_expiring_token_is_refreshed_and_persisted() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/refresh"))
        .and(body_partial_json(json!({"refresh_token": "old-refresh"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "new-access",
            "refresh_token": "new-refresh",
            "expires_in": 1209599
        })))
        .expect(1)
        .mount(&server)
        .await;

    // Expires in one minute, well inside the ten minute buffer.
    let store = logged_in_store(60).await;
    let client = client(&server, Arc::clone(&store));

    assert_eq!(client.active_token().await.as_deref(), Some("new-access"));

    let stored = store.credential().await.expect("credential kept");
    assert_eq!(stored.access_token, "new-access");
    assert_eq!(stored.refresh_token, "new-refresh");
    assert!(stored.expires_at.expect("expiry") > now_epoch_millis() + 1_000_000_000);
}

#[tokio::test]
async fn test_failed_refresh_falls_back_to_stored_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/refresh"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let store = logged_in_store(60).await;
    let client = client(&server, Arc::clone(&store));

    assert_eq!(client.active_token().await.as_deref(), Some("old-access"));
    assert_eq!(
        store.credential().await.map(|c| c.access_token).as_deref(),
        Some("old-access")
    );
}

#[tokio::test]
async fn test_incomplete_refresh_response_is_ignored() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/refresh"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"access_token": "new-access"})),
        )
        .mount(&server)
        .await;

    let client = client(&server, logged_in_store(60).await);
    assert_eq!(client.active_token().await.as_deref(), Some("old-access"));
}

#[tokio::test]
async fn test_fresh_token_skips_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/refresh"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = client(&server, logged_in_store(3600).await);
    assert_eq!(client.active_token().await.as_deref(), Some("old-access"));
}

#[tokio::test]
async fn test_logged_out_store_has_no_token() {
    let server = MockServer::start().await;
    let client = client(&server, Arc::new(RuleStore::in_memory()));
    assert_eq!(client.active_token().await, None);
}

// ────────────────────────────────────────────────────────────────────────────
// Backup and restore against the REST endpoints
// ────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_first_backup_creates_collection_and_items() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/collections"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": [
            {"_id": 1, "title": "Reading list"}
        ]})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/collection"))
        .and(body_partial_json(json!({"title": "Reloader Bear"})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"item": {"_id": 42, "title": "Reloader Bear"}})),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/raindrops/42"))
        .and(query_param("page", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": []})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/raindrop"))
        .and(body_partial_json(json!({"collection": {"$id": 42}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": true})))
        .expect(2)
        .mount(&server)
        .await;

    let store = logged_in_store(3600).await;
    store
        .set_rules(vec![
            Rule::new("news.example", 5).expect("rule"),
            Rule::new("status.example", 1).expect("rule"),
        ])
        .await
        .expect("set rules");
    let api = Arc::new(client(&server, Arc::clone(&store)));
    let reconciler = Reconciler::new(api, store, config(&server));

    let outcome = reconciler.backup().await;
    assert!(outcome.success, "{}", outcome.message);
    assert_eq!(outcome.message, "✓ 2 created, 0 updated, 0 deleted");
    assert_eq!(
        outcome.stats,
        Some(SyncStats::Backup {
            created: 2,
            updated: 0,
            deleted: 0,
            collection_id: 42
        })
    );
}

#[tokio::test]
async fn test_backup_aborts_on_first_failed_write() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/collections"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": [
            {"_id": 42, "title": "Reloader Bear"}
        ]})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/raindrops/42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": []})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/raindrop"))
        .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
        .expect(1)
        .mount(&server)
        .await;

    let store = logged_in_store(3600).await;
    store
        .set_rules(vec![
            Rule::new("a", 1).expect("rule"),
            Rule::new("b", 1).expect("rule"),
        ])
        .await
        .expect("set rules");
    let api = Arc::new(client(&server, Arc::clone(&store)));
    let outcome = Reconciler::new(api, store, config(&server)).backup().await;

    assert!(!outcome.success);
    assert!(outcome.message.starts_with("Backup failed: "), "{}", outcome.message);
    assert_eq!(outcome.stats, None);
}

#[tokio::test]
async fn test_restore_replaces_local_rules() {
    let server = MockServer::start().await;
    let news = Rule::new("news.example", 5).expect("rule");
    let excerpt = item_payload(&news, 42).expect("payload")["excerpt"].clone();

    Mock::given(method("GET"))
        .and(path("/collections"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": [
            {"_id": 42, "title": "Reloader Bear"}
        ]})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/raindrops/42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": [
            {"_id": 100, "link": pattern_link(&news.pattern_id()), "title": "news", "excerpt": excerpt},
            {"_id": 101, "link": "https://example.com", "title": "unrelated", "excerpt": ""}
        ]})))
        .expect(1)
        .mount(&server)
        .await;

    let store = logged_in_store(3600).await;
    store
        .set_rules(vec![Rule::new("stale", 2).expect("rule")])
        .await
        .expect("set rules");
    let api = Arc::new(client(&server, Arc::clone(&store)));
    let outcome = Reconciler::new(api, Arc::clone(&store), config(&server))
        .restore()
        .await;

    assert!(outcome.success, "{}", outcome.message);
    assert_eq!(outcome.message, "✓ 1 pattern(s) restored");
    assert_eq!(store.rules().await, vec![news]);
}

#[tokio::test]
async fn test_restore_without_collection_keeps_rules() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/collections"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": []})))
        .mount(&server)
        .await;

    let store = logged_in_store(3600).await;
    let kept = vec![Rule::new("keep", 2).expect("rule")];
    store.set_rules(kept.clone()).await.expect("set rules");
    let api = Arc::new(client(&server, Arc::clone(&store)));
    let outcome = Reconciler::new(api, Arc::clone(&store), config(&server))
        .restore()
        .await;

    assert!(!outcome.success);
    assert_eq!(
        outcome.message,
        "No \"Reloader Bear\" collection found. Backup your patterns first."
    );
    assert_eq!(store.rules().await, kept);
}
