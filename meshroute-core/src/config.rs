use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{ConfigError, MeshRouteError};

/// Request timeout applied when a rule carries no timeout policy.
pub const DEFAULT_TIMEOUT_MS: u64 = 15_000;

/// Runtime environment used by the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl Environment {
    fn from_str(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "production" | "prod" => Environment::Production,
            "staging" | "stage" => Environment::Staging,
            _ => Environment::Development,
        }
    }
}

/// Settings the embedding proxy hands to the routing engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub environment: Environment,
    pub node_name: String,
    /// Timeout used for forwarded requests whose rule has no timeout policy.
    pub default_timeout: Duration,
    /// Optional rule document (file or directory) used to seed the store.
    pub rules_path: Option<PathBuf>,
    pub log_level: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            environment: Environment::default(),
            node_name: "meshroute-node".to_string(),
            default_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            rules_path: None,
            log_level: "info".to_string(),
        }
    }
}

impl EngineConfig {
    /// Loads configuration from the `MESHROUTE_` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_env_with_prefix("MESHROUTE_")
    }

    /// Loads configuration from env vars prefixed with the provided value (e.g. `SIDECAR_`).
    pub fn from_env_with_prefix(prefix: &str) -> Result<Self, ConfigError> {
        let key = |suffix: &str| format!("{}{}", prefix, suffix);
        let defaults = Self::default();

        let environment = env::var(key("ENV"))
            .map(|raw| Environment::from_str(&raw))
            .unwrap_or_default();

        let node_name = env::var(key("NODE_NAME")).unwrap_or(defaults.node_name);

        let timeout_key = key("DEFAULT_TIMEOUT_MS");
        let default_timeout = match env::var(&timeout_key) {
            Ok(raw) => parse_timeout(&timeout_key, &raw)?,
            Err(_) => defaults.default_timeout,
        };

        let rules_path = env::var(key("RULES_PATH"))
            .ok()
            .filter(|raw| !raw.trim().is_empty())
            .map(PathBuf::from);

        let log_level = env::var(key("LOG")).unwrap_or(defaults.log_level);

        debug!(
            prefix,
            environment = ?environment,
            node_name = %node_name,
            default_timeout_ms = default_timeout.as_millis() as u64,
            rules_path = ?rules_path,
            "engine configuration resolved"
        );

        Ok(Self {
            environment,
            node_name,
            default_timeout,
            rules_path,
            log_level,
        })
    }

    /// Whether the engine is running in production.
    pub fn is_production(&self) -> bool {
        matches!(self.environment, Environment::Production)
    }

    /// Overrides the default request timeout.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }
}

fn parse_timeout(key: &str, raw: &str) -> Result<Duration, ConfigError> {
    let millis: u64 = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        reason: format!("expected milliseconds, got {raw:?}"),
    })?;
    if millis == 0 {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            reason: "timeout must be at least 1ms".to_string(),
        });
    }
    Ok(Duration::from_millis(millis))
}

/// Helper that loads config and converts to the canonical meshroute error type.
pub fn load_engine_config() -> Result<EngineConfig, MeshRouteError> {
    Ok(EngineConfig::from_env()?)
}
