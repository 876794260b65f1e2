use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::FirebaseIdentityConfig;
use crate::environment::Connectivity;
use crate::error::{SyncError, SyncResult};
use crate::providers::{IdentityProvider, TokenGrant};
use crate::utils::{cancellable, ensure_online, response_text};

/// Anonymous accounts on the hosted identity toolkit.
pub struct FirebaseIdentityProvider {
    config: FirebaseIdentityConfig,
    timeout: Duration,
    client: Client,
    connectivity: Connectivity,
}

/// Response of `accounts:signUp`.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignUpResponse {
    id_token: String,
    refresh_token: String,
    #[serde(deserialize_with = "lenient_seconds")]
    expires_in: i64,
    local_id: String,
}

/// Response of the secure-token refresh endpoint (snake_case, unlike sign-up).
#[derive(Deserialize)]
struct RefreshResponse {
    id_token: String,
    refresh_token: String,
    #[serde(deserialize_with = "lenient_seconds")]
    expires_in: i64,
    user_id: String,
}

/// `expiresIn` arrives as a decimal string ("3600"); accept a bare number too.
fn lenient_seconds<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| serde::de::Error::custom("expiresIn out of range")),
        Value::String(s) => s.trim().parse().map_err(serde::de::Error::custom),
        other => Err(serde::de::Error::custom(format!(
            "expiresIn has unexpected type: {}",
            other
        ))),
    }
}

/// Pulls `error.message` out of an identity-toolkit error body, e.g. `TOKEN_EXPIRED`.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.to_string())
}

impl FirebaseIdentityProvider {
    pub fn new(config: &FirebaseIdentityConfig, client: Client, connectivity: Connectivity) -> Self {
        info!(
            "Creating FirebaseIdentityProvider with accounts endpoint '{}'",
            config.accounts_url
        );
        Self {
            config: config.clone(),
            timeout: Duration::from_millis(config.timeout_in_ms),
            client,
            connectivity,
        }
    }

    fn accounts_endpoint(&self, action: &str) -> String {
        format!(
            "{}/accounts:{}",
            self.config.accounts_url.trim_end_matches('/'),
            action
        )
    }

    fn token_endpoint(&self) -> String {
        format!("{}/token", self.config.token_url.trim_end_matches('/'))
    }

    /// Sends an identity request; non-2xx answers become [`SyncError::IdentityService`].
    async fn send<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        cancel: &CancellationToken,
    ) -> SyncResult<T> {
        ensure_online(&self.connectivity)?;
        cancellable(cancel, async {
            let response = request
                .query(&[("key", self.config.api_key.as_str())])
                .timeout(self.timeout)
                .send()
                .await?;
            let status = response.status();
            let body = response_text(response).await?;
            if !status.is_success() {
                return Err(SyncError::identity_service(
                    status.as_u16(),
                    &error_message(&body),
                ));
            }
            serde_json::from_str::<T>(&body).map_err(SyncError::from)
        })
        .await
    }
}

#[async_trait]
impl IdentityProvider for FirebaseIdentityProvider {
    fn get_name(&self) -> &str {
        "firebase"
    }

    async fn sign_in_anonymously(&self, cancel: &CancellationToken) -> SyncResult<TokenGrant> {
        debug!(event_name = "identity.sign_up", event_domain = "identity", "Signing up anonymously");
        let request = self
            .client
            .post(self.accounts_endpoint("signUp"))
            .json(&json!({ "returnSecureToken": true }));
        let resp: SignUpResponse = self.send(request, cancel).await?;
        Ok(TokenGrant {
            id_token: resp.id_token,
            refresh_token: resp.refresh_token,
            expires_in_secs: resp.expires_in,
            account_id: resp.local_id,
        })
    }

    async fn refresh(
        &self,
        refresh_token: &str,
        cancel: &CancellationToken,
    ) -> SyncResult<TokenGrant> {
        debug!(event_name = "identity.refresh", event_domain = "identity", "Refreshing id token");
        let request = self.client.post(self.token_endpoint()).form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ]);
        let resp: RefreshResponse = self.send(request, cancel).await?;
        Ok(TokenGrant {
            id_token: resp.id_token,
            refresh_token: resp.refresh_token,
            expires_in_secs: resp.expires_in,
            account_id: resp.user_id,
        })
    }

    async fn delete_account(&self, id_token: &str, cancel: &CancellationToken) -> SyncResult<()> {
        debug!(event_name = "identity.delete", event_domain = "identity", "Deleting anonymous account");
        let request = self
            .client
            .post(self.accounts_endpoint("delete"))
            .json(&json!({ "idToken": id_token }));
        let _: Value = self.send(request, cancel).await?;
        Ok(())
    }
}
