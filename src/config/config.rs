use std::path::PathBuf;

use figment::providers::{Env, Format, Yaml};
use figment::Figment;
use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};

use super::identity::IdentityConfig;
use super::logging::LoggingConfig;
use super::store::StoreConfig;
use crate::models::ExternalIdentity;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "./modsync.yaml";

/// A top-level enum for versioned configurations.
#[derive(Deserialize, Serialize, JsonSchema)]
#[serde(tag = "version")]
pub enum Config {
    #[serde(rename = "1.0.0")]
    ConfigV1(ConfigV1),
}

/// Main config for v1.0.0.
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct ConfigV1 {
    #[serde(default)]
    pub logging: LoggingConfig,
    pub identity: IdentityConfig,
    pub store: StoreConfig,
    #[serde(default)]
    pub auth_state: AuthStateConfig,
    /// External identity used by the command line; a host application supplies its own.
    pub player: Option<ExternalIdentity>,
    /// Starts the process with internet access disabled.
    #[serde(default)]
    pub offline: bool,
}

/// Where the auth-state file lives.
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct AuthStateConfig {
    /// Overrides the platform data directory.
    pub directory: Option<PathBuf>,
    #[serde(default = "default_auth_file_name")]
    pub file_name: String,
}

impl Default for AuthStateConfig {
    fn default() -> Self {
        Self {
            directory: None,
            file_name: default_auth_file_name(),
        }
    }
}

fn default_auth_file_name() -> String {
    "cloud_auth.json".to_string()
}

fn extract(figment: Figment) -> Result<ConfigV1, figment::Error> {
    match figment.extract::<Config>()? {
        Config::ConfigV1(c) => Ok(c),
    }
    // handle configuration migration between versions here when necessary
}

/// Load config from a YAML file, with `MODSYNC_`-prefixed environment overrides
/// (nested keys separated by `__`, e.g. `MODSYNC_STORE__BASE_URL`).
pub fn load_config(path: &str) -> Result<ConfigV1, figment::Error> {
    extract(
        Figment::new()
            .merge(Yaml::file(path))
            .merge(Env::prefixed("MODSYNC_").split("__")),
    )
}

/// Parse a config from an in-memory YAML document.
pub fn config_from_yaml(yaml: &str) -> Result<ConfigV1, figment::Error> {
    extract(Figment::new().merge(Yaml::string(yaml)))
}

/// Render the JSON schema for the configuration.
pub fn config_schema() -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(&schema_for!(Config))
}
