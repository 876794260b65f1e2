use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The backing stores we can talk to, selected by a "type" tag in the YAML.
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
#[serde(tag = "type")]
pub enum StoreConfig {
    #[serde(rename = "realtime-database")]
    RealtimeDatabase(RealtimeDatabaseConfig),
    /// The in-process emulator; nothing leaves the process.
    #[serde(rename = "emulator")]
    Emulator,
}

/// A hosted hierarchical JSON database reachable at `{base_url}/{path}.json`.
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct RealtimeDatabaseConfig {
    pub base_url: String,
    #[serde(default = "default_timeout_in_ms")]
    pub timeout_in_ms: u64,
}

pub(crate) fn default_timeout_in_ms() -> u64 {
    15_000
}
