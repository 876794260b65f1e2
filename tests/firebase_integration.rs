mod common;

use chrono::{DateTime, Utc};
use mockito::{Matcher, Server};
use modsync::error::SyncError;
use modsync::models::Slot;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use common::{build_test_engine, external};

fn hosted_config(url: &str) -> String {
    format!(
        r#"
version: "1.0.0"
identity:
  type: "firebase"
  api_key: "test-key"
  accounts_url: "{url}/v1"
  token_url: "{url}/v1"
store:
  type: "realtime-database"
  base_url: "{url}/db"
"#
    )
}

async fn mock_sign_up(server: &mut Server) -> mockito::Mock {
    server
        .mock("POST", "/v1/accounts:signUp")
        .match_query(Matcher::UrlEncoded("key".into(), "test-key".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"idToken":"id-1","refreshToken":"rt-1","expiresIn":"3600","localId":"acct-1"}"#,
        )
        .create_async()
        .await
}

/// Test that the first session signs in and persists every field of the auth state.
#[tokio::test]
async fn test_first_session_persists_auth_state() {
    let mut server = Server::new_async().await;
    let sign_up = mock_sign_up(&mut server).await;
    let dir = TempDir::new().unwrap();
    let engine = build_test_engine(&hosted_config(&server.url()), &dir, None);

    let before = Utc::now();
    let session = engine
        .authenticator
        .get_session(&CancellationToken::new())
        .await
        .unwrap();
    sign_up.assert_async().await;
    assert_eq!(session.account_id, "acct-1");

    let raw = std::fs::read_to_string(dir.path().join("cloud_auth.json")).unwrap();
    let persisted: Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(persisted["idToken"], "id-1");
    assert_eq!(persisted["refreshToken"], "rt-1");
    assert_eq!(persisted["userId"], "acct-1");

    let expiration: DateTime<Utc> = persisted["expirationUtc"]
        .as_str()
        .unwrap()
        .parse()
        .unwrap();
    let lifetime = (expiration - before).num_seconds();
    assert!((3595..=3605).contains(&lifetime), "lifetime was {}", lifetime);
}

/// Test that an absurd token lifetime from the service fails the session instead of
/// crashing, and nothing is persisted.
#[tokio::test]
async fn test_out_of_range_lifetime_is_rejected() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/v1/accounts:signUp")
        .match_query(Matcher::UrlEncoded("key".into(), "test-key".into()))
        .with_status(200)
        .with_body(
            r#"{"idToken":"id-1","refreshToken":"rt-1","expiresIn":"9223372036854775807","localId":"acct-1"}"#,
        )
        .create_async()
        .await;
    let dir = TempDir::new().unwrap();
    let engine = build_test_engine(&hosted_config(&server.url()), &dir, None);

    let result = engine
        .authenticator
        .get_session(&CancellationToken::new())
        .await;
    assert!(
        matches!(result, Err(SyncError::Serialization(_))),
        "unexpected result {:?}",
        result
    );
    assert!(!dir.path().join("cloud_auth.json").exists());
}

/// Test that a stored session is reported without signing in, and none is created.
#[tokio::test]
async fn test_existing_session_never_signs_in() {
    let mut server = Server::new_async().await;
    let sign_up = server
        .mock("POST", "/v1/accounts:signUp")
        .match_query(Matcher::Any)
        .expect(0)
        .create_async()
        .await;
    let dir = TempDir::new().unwrap();
    let engine = build_test_engine(&hosted_config(&server.url()), &dir, None);

    let existing = engine
        .authenticator
        .try_get_existing_session(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(existing, None);
    sign_up.assert_async().await;
    assert!(!dir.path().join("cloud_auth.json").exists());
}

/// Test that a first save claims the identity and writes slot, owner and mirror in one PATCH.
#[tokio::test]
async fn test_save_issues_single_multi_path_write() {
    let mut server = Server::new_async().await;
    mock_sign_up(&mut server).await;
    let auth = Matcher::UrlEncoded("auth".into(), "id-1".into());

    let read_owner = server
        .mock("GET", "/db/owners/steam_7656.json")
        .match_query(auth.clone())
        .with_status(200)
        .with_body("null")
        .create_async()
        .await;
    let claim = server
        .mock("PUT", "/db/owners/steam_7656.json")
        .match_query(auth.clone())
        .match_body(Matcher::Json(json!("acct-1")))
        .with_status(200)
        .with_body(r#""acct-1""#)
        .create_async()
        .await;
    server
        .mock("GET", "/db/users/steam_7656/slot1.json")
        .match_query(auth.clone())
        .with_status(200)
        .with_body("null")
        .create_async()
        .await;
    let patch = server
        .mock("PATCH", "/db/.json")
        .match_query(auth.clone())
        .match_body(Matcher::AllOf(vec![
            Matcher::Regex(r#""users/steam_7656/slot1":\{"#.to_string()),
            Matcher::Regex(r#""registryOwners/[0-9a-f-]{36}":"acct-1""#.to_string()),
            Matcher::Regex(r#""registry/[0-9a-f-]{36}":\{"#.to_string()),
        ]))
        .with_status(200)
        .with_body("{}")
        .expect(1)
        .create_async()
        .await;
    let admin = server
        .mock("PUT", "/db/adminRegistry/acct-1.json")
        .match_query(auth.clone())
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;

    let dir = TempDir::new().unwrap();
    let engine = build_test_engine(
        &hosted_config(&server.url()),
        &dir,
        Some(external("steam.7656", "Tester")),
    );
    let player = engine.player().unwrap();
    let node = engine
        .modlists
        .save(&player, Slot::Slot1, &json!({"mods": [1]}), &CancellationToken::new())
        .await
        .unwrap();
    engine.modlists.flush_advisory().await;

    read_owner.assert_async().await;
    claim.assert_async().await;
    patch.assert_async().await;
    admin.assert_async().await;
    let content: Value = serde_json::from_str(&node.content).unwrap();
    assert_eq!(content["uploaderAccountId"], "acct-1");
}

/// Test that a store outage surfaces the status and body instead of retrying.
#[tokio::test]
async fn test_store_failure_is_surfaced() {
    let mut server = Server::new_async().await;
    mock_sign_up(&mut server).await;
    let owners = server
        .mock("GET", "/db/owners/steam_7656.json")
        .match_query(Matcher::Any)
        .with_status(503)
        .with_body("Service Unavailable")
        .expect(1)
        .create_async()
        .await;

    let dir = TempDir::new().unwrap();
    let engine = build_test_engine(
        &hosted_config(&server.url()),
        &dir,
        Some(external("steam.7656", "Tester")),
    );
    let player = engine.player().unwrap();
    let err = engine
        .modlists
        .list_slots(&player, &CancellationToken::new())
        .await
        .unwrap_err();

    owners.assert_async().await;
    assert_eq!(
        err,
        modsync::error::SyncError::BackingStoreFailure {
            status: 503,
            body: "Service Unavailable".to_string()
        }
    );
}
