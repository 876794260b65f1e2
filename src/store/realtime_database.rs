use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Url};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::base::{classify_response, parse_read_body, BackingStore, DbPath, MultiPathUpdate};
use crate::config::RealtimeDatabaseConfig;
use crate::environment::Connectivity;
use crate::error::{SyncError, SyncResult};
use crate::utils::{cancellable, ensure_online, response_text};

/// A `BackingStore` speaking the REST dialect of a hosted realtime JSON database:
/// `{base}/{segments}.json?auth={token}`.
pub struct RealtimeDatabase {
    base_url: String,
    timeout: Duration,
    client: Client,
    connectivity: Connectivity,
}

impl RealtimeDatabase {
    /// Creates the store on top of the shared, pooled `client`.
    pub fn new(config: &RealtimeDatabaseConfig, client: Client, connectivity: Connectivity) -> Self {
        info!(
            "Creating RealtimeDatabase store for '{}' (timeout {} ms)",
            config.base_url, config.timeout_in_ms
        );
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_millis(config.timeout_in_ms),
            client,
            connectivity,
        }
    }

    /// Builds the request URL. Segments are percent-encoded individually so a sanitized
    /// identity containing `?`, `%` or spaces cannot escape its path position.
    fn url_for(&self, path: &DbPath, token: &str) -> SyncResult<Url> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| SyncError::Transport(format!("Invalid database URL: {}", e)))?;
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                SyncError::Transport(format!("Database URL '{}' cannot hold a path", self.base_url))
            })?;
            segments.pop_if_empty();
            match path.segments().split_last() {
                Some((last, parents)) => {
                    segments.extend(parents);
                    segments.push(&format!("{}.json", last));
                }
                None => {
                    segments.push(".json");
                }
            }
        }
        url.query_pairs_mut().append_pair("auth", token);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.client.request(method, url).timeout(self.timeout)
    }

    /// Sends a request and classifies the response. Connectivity is checked right before
    /// sending; cancellation drops the in-flight request.
    async fn send(
        &self,
        request: RequestBuilder,
        cancel: &CancellationToken,
    ) -> SyncResult<Option<String>> {
        ensure_online(&self.connectivity)?;
        cancellable(cancel, async {
            let response = request.send().await?;
            let status = response.status().as_u16();
            let body = response_text(response).await?;
            classify_response(status, body)
        })
        .await
    }
}

#[async_trait]
impl BackingStore for RealtimeDatabase {
    fn get_name(&self) -> &str {
        "realtime-database"
    }

    async fn get(
        &self,
        path: &DbPath,
        token: &str,
        cancel: &CancellationToken,
    ) -> SyncResult<Option<Value>> {
        debug!(event_name = "store.get", event_domain = "store", path = %path, "GET");
        let url = self.url_for(path, token)?;
        let body = self.send(self.request(Method::GET, url), cancel).await?;
        parse_read_body(body)
    }

    async fn get_shallow(
        &self,
        path: &DbPath,
        token: &str,
        cancel: &CancellationToken,
    ) -> SyncResult<Option<Value>> {
        debug!(event_name = "store.get_shallow", event_domain = "store", path = %path, "GET shallow");
        let mut url = self.url_for(path, token)?;
        url.query_pairs_mut().append_pair("shallow", "true");
        let body = self.send(self.request(Method::GET, url), cancel).await?;
        parse_read_body(body)
    }

    async fn put(
        &self,
        path: &DbPath,
        value: &Value,
        token: &str,
        cancel: &CancellationToken,
    ) -> SyncResult<()> {
        debug!(event_name = "store.put", event_domain = "store", path = %path, "PUT");
        let url = self.url_for(path, token)?;
        self.send(self.request(Method::PUT, url).json(value), cancel)
            .await
            .map(|_| ())
    }

    async fn delete(
        &self,
        path: &DbPath,
        token: &str,
        cancel: &CancellationToken,
    ) -> SyncResult<()> {
        debug!(event_name = "store.delete", event_domain = "store", path = %path, "DELETE");
        let url = self.url_for(path, token)?;
        // A 404 classifies as `Ok(None)`: deleting a missing path is a success.
        self.send(self.request(Method::DELETE, url), cancel)
            .await
            .map(|_| ())
    }

    async fn patch(
        &self,
        update: &MultiPathUpdate,
        token: &str,
        cancel: &CancellationToken,
    ) -> SyncResult<()> {
        if update.is_empty() {
            return Ok(());
        }
        debug!(
            event_name = "store.patch",
            event_domain = "store",
            paths = update.changes().len(),
            "PATCH multi-path"
        );
        let url = self.url_for(&DbPath::from_segments(Vec::<String>::new()), token)?;
        self.send(self.request(Method::PATCH, url).json(&update.to_body()), cancel)
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Slot;
    use mockito::{Matcher, Server};
    use serde_json::json;

    fn create_store(url: String) -> RealtimeDatabase {
        RealtimeDatabase::new(
            &RealtimeDatabaseConfig {
                base_url: url,
                timeout_in_ms: 2000,
            },
            Client::new(),
            Connectivity::new(true),
        )
    }

    fn auth_query(token: &str) -> Matcher {
        Matcher::UrlEncoded("auth".into(), token.into())
    }

    #[test]
    fn test_url_encodes_each_segment() {
        let store = create_store("https://db.example.com/".to_string());
        let url = store
            .url_for(&DbPath::slot("a b?c%", Slot::Slot2), "tok")
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://db.example.com/users/a%20b%3Fc%25/slot2.json?auth=tok"
        );
    }

    #[test]
    fn test_root_url_for_multi_path_writes() {
        let store = create_store("https://db.example.com".to_string());
        let url = store
            .url_for(&DbPath::from_segments(Vec::<String>::new()), "tok")
            .unwrap();
        assert_eq!(url.as_str(), "https://db.example.com/.json?auth=tok");
    }

    #[tokio::test]
    async fn test_get_returns_value() {
        let mut server = Server::new_async().await;
        let m = server
            .mock("GET", "/owners/u_1.json")
            .match_query(auth_query("tok"))
            .with_status(200)
            .with_body(r#""acct-1""#)
            .create_async()
            .await;

        let store = create_store(server.url());
        let value = store
            .get(&DbPath::owner("u_1"), "tok", &CancellationToken::new())
            .await
            .unwrap();

        m.assert_async().await;
        assert_eq!(value, Some(json!("acct-1")));
    }

    /// A `null` body and a 404 both mean "absent".
    #[tokio::test]
    async fn test_get_missing_is_none() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/owners/nobody.json")
            .match_query(auth_query("tok"))
            .with_status(200)
            .with_body("null")
            .create_async()
            .await;
        server
            .mock("GET", "/owners/gone.json")
            .match_query(auth_query("tok"))
            .with_status(404)
            .create_async()
            .await;

        let store = create_store(server.url());
        let cancel = CancellationToken::new();
        assert_eq!(store.get(&DbPath::owner("nobody"), "tok", &cancel).await, Ok(None));
        assert_eq!(store.get(&DbPath::owner("gone"), "tok", &cancel).await, Ok(None));
    }

    #[tokio::test]
    async fn test_permission_denied_is_auth_failure() {
        let mut server = Server::new_async().await;
        server
            .mock("PUT", "/owners/u_1.json")
            .match_query(auth_query("tok"))
            .with_status(401)
            .with_body(r#"{"error": "Permission denied"}"#)
            .create_async()
            .await;

        let store = create_store(server.url());
        let err = store
            .put(&DbPath::owner("u_1"), &json!("acct"), "tok", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_auth_failure(), "unexpected error {:?}", err);
    }

    #[tokio::test]
    async fn test_server_error_is_store_failure() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/users/u_1.json")
            .match_query(Matcher::AllOf(vec![
                auth_query("tok"),
                Matcher::UrlEncoded("shallow".into(), "true".into()),
            ]))
            .with_status(503)
            .with_body("unavailable")
            .create_async()
            .await;

        let store = create_store(server.url());
        let err = store
            .get_shallow(&DbPath::user_slots("u_1"), "tok", &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, SyncError::backing_store(503, "unavailable"));
    }

    #[tokio::test]
    async fn test_patch_sends_path_keyed_body_to_root() {
        let mut server = Server::new_async().await;
        let m = server
            .mock("PATCH", "/.json")
            .match_query(auth_query("tok"))
            .match_body(Matcher::Json(json!({
                "users/u_1/slot1": { "content": "{}", "dateAdded": "now", "registryId": "r1" },
                "registryOwners/r1": "acct",
                "registry/r1": null
            })))
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let update = MultiPathUpdate::new()
            .set(
                DbPath::slot("u_1", Slot::Slot1),
                json!({ "content": "{}", "dateAdded": "now", "registryId": "r1" }),
            )
            .set(DbPath::registry_owner("r1"), json!("acct"))
            .remove(DbPath::registry("r1"));

        let store = create_store(server.url());
        store
            .patch(&update, "tok", &CancellationToken::new())
            .await
            .unwrap();
        m.assert_async().await;
    }

    #[tokio::test]
    async fn test_delete_missing_path_succeeds() {
        let mut server = Server::new_async().await;
        server
            .mock("DELETE", "/owners/u_1.json")
            .match_query(auth_query("tok"))
            .with_status(404)
            .create_async()
            .await;

        let store = create_store(server.url());
        assert_eq!(
            store
                .delete(&DbPath::owner("u_1"), "tok", &CancellationToken::new())
                .await,
            Ok(())
        );
    }

    /// Serves one response that promises 500 body bytes and hangs up after a few.
    async fn serve_truncated_body() -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    return;
                }
                request.extend_from_slice(&buf[..n]);
            }
            socket
                .write_all(
                    b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 500\r\n\r\n{\"registryId\":\"r1\",\"co",
                )
                .await
                .unwrap();
            socket.shutdown().await.unwrap();
        });
        format!("http://{}", addr)
    }

    /// A 200 whose body is cut off must not read as an absent path.
    #[tokio::test]
    async fn test_truncated_body_is_transport_error() {
        let store = create_store(serve_truncated_body().await);
        let result = store
            .get(&DbPath::slot("u", Slot::Slot1), "tok", &CancellationToken::new())
            .await;
        assert!(
            matches!(result, Err(SyncError::Transport(_))),
            "unexpected result {:?}",
            result
        );
    }

    #[tokio::test]
    async fn test_offline_never_reaches_network() {
        let mut server = Server::new_async().await;
        let m = server
            .mock("GET", Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let store = create_store(server.url());
        store.connectivity.set_online(false);
        let err = store
            .get(&DbPath::owner("u_1"), "tok", &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, SyncError::ConnectivityDisabled);
        m.assert_async().await;
    }
}
