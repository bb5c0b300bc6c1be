use std::path::Path;

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;

/// Prefix of environment variables overriding file settings, e.g.
/// `GRANTSMITH__CLUSTER__DSN`
pub const ENV_PREFIX: &str = "GRANTSMITH";
const ENV_SEPARATOR: &str = "__";

#[derive(Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct GrantsmithConfig {
    pub cluster: Cluster,
    #[serde(default)]
    pub reconcile: Reconcile,
    #[serde(default)]
    pub logging: Logging,
}

#[derive(Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct Cluster {
    pub dsn: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
}

// One operation at a time holds the connection
fn default_max_connections() -> u32 {
    1
}

fn default_acquire_timeout_secs() -> u64 {
    30
}

#[derive(Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(default)]
pub struct Reconcile {
    /// Pause between creating an object and looking up its id
    pub convergence_delay_ms: u64,
}

impl Default for Reconcile {
    fn default() -> Self {
        Self {
            convergence_delay_ms: 5000,
        }
    }
}

#[derive(Deserialize, Debug, PartialEq, Eq, Clone, Copy, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Deserialize, Debug, PartialEq, Eq, Clone, Default)]
#[serde(default)]
pub struct Logging {
    pub format: LogFormat,
}

pub fn validate_config(config: GrantsmithConfig) -> Result<GrantsmithConfig, ConfigError> {
    let dsn = &config.cluster.dsn;
    if !(dsn.starts_with("postgres://") || dsn.starts_with("postgresql://")) {
        return Err(ConfigError::Message(
            "cluster.dsn must be a postgres:// or postgresql:// connection URL".to_string(),
        ));
    }

    if config.cluster.max_connections == 0 {
        return Err(ConfigError::Message(
            "cluster.max_connections must be at least 1".to_string(),
        ));
    }

    Ok(config)
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator(ENV_SEPARATOR)
        .try_parsing(true)
}

pub fn load_config(path: &Path) -> Result<GrantsmithConfig, ConfigError> {
    load_config_with_environment(path, environment())
}

fn load_config_with_environment(
    path: &Path,
    environment: Environment,
) -> Result<GrantsmithConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::from(path))
        .add_source(environment);

    config.build()?.try_deserialize().and_then(validate_config)
}

// Load a config from a string (to test our structs are defined correctly)
pub fn load_config_from_string(
    config_str: &str,
    skip_validation: bool,
) -> Result<GrantsmithConfig, ConfigError> {
    let config =
        Config::builder().add_source(File::from_str(config_str, FileFormat::Toml));

    if skip_validation {
        config.build()?.try_deserialize()
    } else {
        config.build()?.try_deserialize().and_then(validate_config)
    }
}
