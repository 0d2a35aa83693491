use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use mockito::Matcher;
use tubekit::{
    Authenticator, ConsentDelegate, ConsentOutcome, DiskStorage, Error, ListRequest,
    MemoryStorage, Token, TokenStorage,
};

/// Grants consent with a fixed code and counts how often it was asked.
struct CodeDelegate {
    code: &'static str,
    calls: Arc<AtomicUsize>,
}

impl ConsentDelegate for CodeDelegate {
    fn present_user_url(
        &self,
        url: &str,
        need_code: bool,
        _timeout: Option<Duration>,
    ) -> io::Result<ConsentOutcome> {
        assert!(need_code);
        assert!(url.contains("response_type=code"), "not an auth url: {}", url);
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ConsentOutcome::Granted(self.code.to_string()))
    }
}

/// Closes the browser window, so to speak.
struct CancellingDelegate;

impl ConsentDelegate for CancellingDelegate {
    fn present_user_url(
        &self,
        _url: &str,
        _need_code: bool,
        _timeout: Option<Duration>,
    ) -> io::Result<ConsentOutcome> {
        Ok(ConsentOutcome::Cancelled)
    }
}

/// Fails the test if a consent flow runs at all.
struct PanickingDelegate;

impl ConsentDelegate for PanickingDelegate {
    fn present_user_url(
        &self,
        _url: &str,
        _need_code: bool,
        _timeout: Option<Duration>,
    ) -> io::Result<ConsentOutcome> {
        panic!("the consent flow must not run in this test");
    }
}

fn app_secret(server: &mockito::ServerGuard) -> tubekit::ApplicationSecret {
    tubekit::ApplicationSecret {
        client_id: "testclient.apps.googleusercontent.com".to_string(),
        client_secret: "notasecret".to_string(),
        token_uri: format!("{}/token", server.url()),
        auth_uri: "https://accounts.google.com/o/oauth2/auth".to_string(),
        ..Default::default()
    }
}

fn seeded_token(scopes: &[&str], expires_in_secs: i64) -> Token {
    Token {
        access_token: "seed-access".to_string(),
        refresh_token: Some("seed-refresh".to_string()),
        expires_at: Some(Utc::now() + chrono::Duration::seconds(expires_in_secs)),
        scopes: scopes.iter().map(|s| s.to_string()).collect(),
    }
}

fn token_endpoint_body(access_token: &str) -> String {
    format!(
        r#"{{"access_token": "{}", "refresh_token": "granted-refresh", "token_type": "Bearer", "expires_in": 3600}}"#,
        access_token
    )
}

#[test]
fn test_consent_runs_once_then_cached() {
    let _ = env_logger::try_init();
    let mut server = mockito::Server::new();
    let exchange = server
        .mock("POST", "/token")
        .match_body(Matcher::AllOf(vec![
            Matcher::Regex(".*grant_type=authorization_code.*".to_string()),
            Matcher::Regex(".*code=authcode.*".to_string()),
        ]))
        .with_body(token_endpoint_body("granted-access"))
        .expect(1)
        .create();

    let calls = Arc::new(AtomicUsize::new(0));
    let auth = Authenticator::builder(app_secret(&server))
        .consent_delegate(Box::new(CodeDelegate {
            code: "authcode",
            calls: calls.clone(),
        }))
        .build()
        .unwrap();

    let scopes = &["https://www.googleapis.com/auth/youtube.readonly"];
    auth.authorize(scopes, "mytool").unwrap();
    // Second call: same scopes, nothing expired. No consent, no refresh.
    let transport = auth.authorize(scopes, "mytool").unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(transport.scopes(), scopes);
    exchange.assert();
}

#[test]
fn test_superset_accepted_subset_forces_reconsent() {
    let _ = env_logger::try_init();
    let mut server = mockito::Server::new();
    let dir = tempfile::tempdir().unwrap();

    // Seed a valid credential issued for two scopes.
    DiskStorage::new(dir.path())
        .unwrap()
        .set("mytool", &seeded_token(&["scope/a", "scope/b"], 3600))
        .unwrap();

    // Requesting a subset is served from the cache.
    let auth = Authenticator::builder(app_secret(&server))
        .storage(DiskStorage::new(dir.path()).unwrap())
        .consent_delegate(Box::new(PanickingDelegate))
        .build()
        .unwrap();
    auth.authorize(&["scope/a"], "mytool").unwrap();

    // Requesting a strict superset forces re-consent for exactly the new
    // scope set (replacement, not union).
    let exchange = server
        .mock("POST", "/token")
        .with_body(token_endpoint_body("escalated-access"))
        .expect(1)
        .create();
    let calls = Arc::new(AtomicUsize::new(0));
    let auth = Authenticator::builder(app_secret(&server))
        .storage(DiskStorage::new(dir.path()).unwrap())
        .consent_delegate(Box::new(CodeDelegate {
            code: "authcode",
            calls: calls.clone(),
        }))
        .build()
        .unwrap();
    auth.authorize(&["scope/a", "scope/b", "scope/c"], "mytool")
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    exchange.assert();

    let stored = DiskStorage::new(dir.path())
        .unwrap()
        .get("mytool")
        .unwrap()
        .unwrap();
    assert_eq!(stored.access_token, "escalated-access");
    assert_eq!(stored.scopes, vec!["scope/a", "scope/b", "scope/c"]);
}

#[test]
fn test_expired_token_refreshed_silently() {
    let _ = env_logger::try_init();
    let mut server = mockito::Server::new();
    let refresh = server
        .mock("POST", "/token")
        .match_body(Matcher::AllOf(vec![
            Matcher::Regex(".*grant_type=refresh_token.*".to_string()),
            Matcher::Regex(".*refresh_token=seed-refresh.*".to_string()),
        ]))
        .with_body(token_endpoint_body("refreshed-access"))
        .expect(1)
        .create();

    let storage = MemoryStorage::new();
    storage
        .set("mytool", &seeded_token(&["scope/a"], 0))
        .unwrap();
    let auth = Authenticator::builder(app_secret(&server))
        .storage(storage)
        .consent_delegate(Box::new(PanickingDelegate))
        .build()
        .unwrap();

    auth.authorize(&["scope/a"], "mytool").unwrap();
    // The refreshed token was stored; no second refresh happens.
    auth.authorize(&["scope/a"], "mytool").unwrap();
    refresh.assert();
}

#[test]
fn test_refresh_refusal_falls_back_to_consent() {
    let _ = env_logger::try_init();
    let mut server = mockito::Server::new();
    let refused = server
        .mock("POST", "/token")
        .match_body(Matcher::Regex(".*grant_type=refresh_token.*".to_string()))
        .with_status(400)
        .with_body(r#"{"error": "invalid_grant"}"#)
        .expect(1)
        .create();
    let exchange = server
        .mock("POST", "/token")
        .match_body(Matcher::Regex(
            ".*grant_type=authorization_code.*".to_string(),
        ))
        .with_body(token_endpoint_body("reconsented-access"))
        .expect(1)
        .create();

    let storage = MemoryStorage::new();
    storage
        .set("mytool", &seeded_token(&["scope/a"], 0))
        .unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let auth = Authenticator::builder(app_secret(&server))
        .storage(storage)
        .consent_delegate(Box::new(CodeDelegate {
            code: "authcode",
            calls: calls.clone(),
        }))
        .build()
        .unwrap();

    auth.authorize(&["scope/a"], "mytool").unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    refused.assert();
    exchange.assert();
}

#[test]
fn test_cancelled_consent_preserves_stored_credential() {
    let _ = env_logger::try_init();
    let mut server = mockito::Server::new();
    let no_exchange = server.mock("POST", "/token").expect(0).create();
    let dir = tempfile::tempdir().unwrap();

    DiskStorage::new(dir.path())
        .unwrap()
        .set("mytool", &seeded_token(&["scope/a"], 3600))
        .unwrap();
    let stored_file = dir.path().join("mytool-oauth2.json");
    let before = std::fs::read(&stored_file).unwrap();

    let auth = Authenticator::builder(app_secret(&server))
        .storage(DiskStorage::new(dir.path()).unwrap())
        .consent_delegate(Box::new(CancellingDelegate))
        .build()
        .unwrap();
    // A different scope forces consent, which the user cancels.
    match auth.authorize(&["scope/other"], "mytool") {
        Err(Error::AuthorizationDenied(_)) => {}
        other => panic!(
            "expected AuthorizationDenied, got {:?}",
            other.map(|_| "a transport")
        ),
    }

    let after = std::fs::read(&stored_file).unwrap();
    assert_eq!(before, after, "stored credential must be untouched");
    no_exchange.assert();
}

/// A store whose reads fail; authorization must still succeed via consent.
struct UnreadableStorage;

impl TokenStorage for UnreadableStorage {
    fn get(&self, _: &str) -> io::Result<Option<Token>> {
        Err(io::Error::new(io::ErrorKind::PermissionDenied, "no"))
    }
    fn set(&self, _: &str, _: &Token) -> io::Result<()> {
        Ok(())
    }
    fn delete(&self, _: &str) -> io::Result<()> {
        Ok(())
    }
}

/// A store whose writes fail; the error must surface to the caller.
struct UnwritableStorage;

impl TokenStorage for UnwritableStorage {
    fn get(&self, _: &str) -> io::Result<Option<Token>> {
        Ok(None)
    }
    fn set(&self, _: &str, _: &Token) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::PermissionDenied, "no"))
    }
    fn delete(&self, _: &str) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn test_unreadable_store_proceeds_with_consent() {
    let _ = env_logger::try_init();
    let mut server = mockito::Server::new();
    let exchange = server
        .mock("POST", "/token")
        .with_body(token_endpoint_body("granted-access"))
        .expect(1)
        .create();
    let calls = Arc::new(AtomicUsize::new(0));
    let auth = Authenticator::builder(app_secret(&server))
        .storage(UnreadableStorage)
        .consent_delegate(Box::new(CodeDelegate {
            code: "authcode",
            calls,
        }))
        .build()
        .unwrap();
    auth.authorize(&["scope/a"], "mytool").unwrap();
    exchange.assert();
}

#[test]
fn test_unwritable_store_surfaces_persistence_error() {
    let _ = env_logger::try_init();
    let mut server = mockito::Server::new();
    server
        .mock("POST", "/token")
        .with_body(token_endpoint_body("granted-access"))
        .create();
    let calls = Arc::new(AtomicUsize::new(0));
    let auth = Authenticator::builder(app_secret(&server))
        .storage(UnwritableStorage)
        .consent_delegate(Box::new(CodeDelegate {
            code: "authcode",
            calls,
        }))
        .build()
        .unwrap();
    match auth.authorize(&["scope/a"], "mytool") {
        Err(Error::Persistence(_)) => {}
        other => panic!("expected Persistence, got {:?}", other.map(|_| "a transport")),
    }
}

/// Builds a transport whose token endpoint lives on the given server.
fn authorized_transport(server: &mockito::ServerGuard) -> tubekit::AuthorizedTransport {
    let calls = Arc::new(AtomicUsize::new(0));
    let auth = Authenticator::builder(app_secret(server))
        .consent_delegate(Box::new(CodeDelegate {
            code: "authcode",
            calls,
        }))
        .build()
        .unwrap();
    auth.authorize(&["scope/a"], "mytool").unwrap()
}

#[test]
fn test_remote_error_surfaced_verbatim() {
    let _ = env_logger::try_init();
    let mut server = mockito::Server::new();
    server
        .mock("POST", "/token")
        .with_body(token_endpoint_body("granted-access"))
        .create();
    let api = server
        .mock("GET", "/youtube/v3/videos")
        .match_query(Matcher::UrlEncoded("part".to_string(), "snippet".to_string()))
        .match_header("authorization", "Bearer granted-access")
        .with_status(403)
        .with_body(r#"{"error": {"code": 403, "message": "The request cannot be completed."}}"#)
        .create();

    let transport = authorized_transport(&server);
    let url = format!("{}/youtube/v3/videos", server.url());
    match transport.get(&url, &[("part", "snippet")]) {
        Err(Error::Remote { status, message }) => {
            assert_eq!(status, 403);
            assert_eq!(message, "The request cannot be completed.");
        }
        other => panic!("expected Remote, got {:?}", other.map(|_| "a body")),
    }
    api.assert();
}

#[test]
fn test_paginated_listing_end2end() {
    let _ = env_logger::try_init();
    let mut server = mockito::Server::new();
    server
        .mock("POST", "/token")
        .with_body(token_endpoint_body("granted-access"))
        .create();

    let page1 = server
        .mock("GET", "/list")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("part".to_string(), "snippet".to_string()),
            Matcher::UrlEncoded("maxResults".to_string(), "2".to_string()),
            Matcher::UrlEncoded("pageToken".to_string(), String::new()),
        ]))
        .match_header("authorization", "Bearer granted-access")
        .with_body(r#"{"items": [{"id": "v1"}, {"id": "v2"}], "nextPageToken": "t2"}"#)
        .expect(1)
        .create();
    let page2 = server
        .mock("GET", "/list")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("maxResults".to_string(), "2".to_string()),
            Matcher::UrlEncoded("pageToken".to_string(), "t2".to_string()),
        ]))
        .with_body(r#"{"items": [{"id": "v3"}]}"#)
        .expect(1)
        .create();

    let transport = authorized_transport(&server);
    let request = ListRequest::new(&transport, format!("{}/list", server.url()))
        .param("part", "snippet");
    let ids: Vec<String> = request
        .items::<serde_json::Value>(2)
        .unwrap()
        .map(|item| item.unwrap()["id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(ids, vec!["v1", "v2", "v3"]);
    page1.assert();
    page2.assert();
}

#[test]
fn test_paginated_listing_aborts_on_error() {
    let _ = env_logger::try_init();
    let mut server = mockito::Server::new();
    server
        .mock("POST", "/token")
        .with_body(token_endpoint_body("granted-access"))
        .create();
    server
        .mock("GET", "/list")
        .match_query(Matcher::UrlEncoded("pageToken".to_string(), String::new()))
        .with_body(r#"{"items": [{"id": "v1"}], "nextPageToken": "t2"}"#)
        .create();
    let denied = server
        .mock("GET", "/list")
        .match_query(Matcher::UrlEncoded("pageToken".to_string(), "t2".to_string()))
        .with_status(403)
        .with_body(r#"{"error": {"code": 403, "message": "quotaExceeded"}}"#)
        .expect(1)
        .create();

    let transport = authorized_transport(&server);
    let request = ListRequest::new(&transport, format!("{}/list", server.url()));
    let mut it = request.items::<serde_json::Value>(50).unwrap();
    assert_eq!(it.next().unwrap().unwrap()["id"], "v1");
    match it.next() {
        Some(Err(Error::Remote { status: 403, message })) => {
            assert_eq!(message, "quotaExceeded")
        }
        _ => panic!("expected the 403 to abort the listing"),
    }
    assert!(it.next().is_none());
    denied.assert();
}
