use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::store::default_timeout_in_ms;

/// Anonymous identity services, selected by a "type" tag in the YAML.
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
#[serde(tag = "type")]
pub enum IdentityConfig {
    #[serde(rename = "firebase")]
    Firebase(FirebaseIdentityConfig),
    #[serde(rename = "emulator")]
    Emulator,
}

/// Endpoints and project key for the hosted identity toolkit.
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct FirebaseIdentityConfig {
    pub api_key: String,
    #[serde(default = "default_accounts_url")]
    pub accounts_url: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default = "default_timeout_in_ms")]
    pub timeout_in_ms: u64,
}

fn default_accounts_url() -> String {
    "https://identitytoolkit.googleapis.com/v1".to_string()
}

fn default_token_url() -> String {
    "https://securetoken.googleapis.com/v1".to_string()
}
