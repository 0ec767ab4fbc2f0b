// * Runtime settings for the client collector and the server sink
// * Site settings arrive as JSON from the host; sink settings come from the environment

use crate::config::constants::{DEFAULT_SINK_PORT, DEFAULT_USER_ID_HEADER};
use crate::sink::classify::OverflowPolicy;
use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

const ENV_PREFIX: &str = "DEPRECATION_COLLECTOR_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid site settings JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: String, value: String },
}

/// Site settings read by the client-side collector.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct CollectorSettings {
    #[serde(rename = "deprecation_collector_enabled")]
    pub enabled: bool,
    #[serde(rename = "deprecation_collector_warn_critical_deprecations")]
    pub warn_critical_deprecations: bool,
    #[serde(rename = "deprecation_collector_critical_deprecations_message")]
    pub critical_deprecations_message: Option<String>,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            warn_critical_deprecations: false,
            critical_deprecations_message: None,
        }
    }
}

impl CollectorSettings {
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    // * Blank operator messages are treated as absent
    pub fn operator_message(&self) -> Option<&str> {
        self.critical_deprecations_message
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
    }
}

/// Configuration for the ingest server.
#[derive(Debug, Clone)]
pub struct SinkConfig {
    pub port: u16,
    pub allow_list_path: PathBuf,
    pub redis_url: Option<String>,
    pub overflow_policy: OverflowPolicy,
    pub db_label: String,
    pub user_id_header: String,
    pub trust_forwarded_for: bool,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_SINK_PORT,
            allow_list_path: PathBuf::from("config/deprecation-ids.yaml"),
            redis_url: None,
            overflow_policy: OverflowPolicy::default(),
            db_label: "default".to_string(),
            user_id_header: DEFAULT_USER_ID_HEADER.to_string(),
            trust_forwarded_for: true,
        }
    }
}

impl SinkConfig {
    /// Builds a config from `DEPRECATION_COLLECTOR_*` environment variables,
    /// falling back to defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(format!("{}{}", ENV_PREFIX, name)).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(port) = lookup("PORT") {
            config.port = port.parse().map_err(|_| ConfigError::InvalidValue {
                name: "PORT".to_string(),
                value: port.clone(),
            })?;
        }
        if let Some(path) = lookup("ALLOW_LIST") {
            config.allow_list_path = PathBuf::from(path);
        }
        config.redis_url = lookup("REDIS_URL").filter(|url| !url.is_empty());
        if let Some(policy) = lookup("OVERFLOW_POLICY") {
            config.overflow_policy = match policy.as_str() {
                "single" => OverflowPolicy::Single,
                "split" => OverflowPolicy::SplitByNamespace,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        name: "OVERFLOW_POLICY".to_string(),
                        value: policy,
                    })
                }
            };
        }
        if let Some(db) = lookup("DB") {
            config.db_label = db;
        }
        if let Some(header) = lookup("USER_ID_HEADER") {
            config.user_id_header = header.to_lowercase();
        }
        if let Some(trust) = lookup("TRUST_FORWARDED_FOR") {
            config.trust_forwarded_for = matches!(trust.as_str(), "1" | "true" | "yes");
        }

        Ok(config)
    }
}
