//! Environment-driven bootstrap settings and the guardian configuration file.

use std::{
    collections::BTreeMap,
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum_macros::{Display, EnumString};
use thiserror::Error;
use tracing::debug;

use crate::model::ActionSpec;

/// Process-level settings read from `.env`/process variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapConfig {
    guardian_config_path: PathBuf,
}

impl BootstrapConfig {
    /// Hydrates `.env` (if present) and reads the required variables. Missing
    /// entries surface as `ConfigError` so the binary can exit cleanly.
    pub fn load_from_env() -> Result<Self, ConfigError> {
        hydrate_env_file()?;

        Ok(Self {
            guardian_config_path: PathBuf::from(get_required_var("GUARDIAN_CONFIG_PATH")?),
        })
    }

    pub fn guardian_config_path(&self) -> &Path {
        &self.guardian_config_path
    }

    pub fn load_guardians(&self) -> Result<GuardiansFile, ConfigError> {
        GuardiansFile::from_path(&self.guardian_config_path)
    }
}

/// Whether sources read finalized state or the best (latest) block.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Confirmation {
    #[default]
    Finalize,
    Instant,
}

/// One monitor: which task to run, with what arguments, and what to do with
/// each emitted record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub task: String,
    #[serde(default)]
    pub arguments: Value,
    #[serde(default)]
    pub actions: Vec<ActionSpec>,
}

/// Immutable configuration handed to a guardian at creation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardianConfig {
    pub network_type: String,
    #[serde(default)]
    pub node_endpoint: Option<String>,
    #[serde(default)]
    pub confirmation: Confirmation,
    #[serde(default = "GuardianConfig::default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "GuardianConfig::default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub monitors: BTreeMap<String, MonitorConfig>,
}

impl GuardianConfig {
    pub const DEFAULT_POLL_INTERVAL_MS: u64 = 6_000;
    pub const DEFAULT_MAX_RETRIES: u32 = 3;

    pub fn new(network_type: impl Into<String>) -> Self {
        Self {
            network_type: network_type.into(),
            node_endpoint: None,
            confirmation: Confirmation::default(),
            poll_interval_ms: Self::DEFAULT_POLL_INTERVAL_MS,
            max_retries: Self::DEFAULT_MAX_RETRIES,
            monitors: BTreeMap::new(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.node_endpoint = Some(endpoint.into());
        self
    }

    pub fn with_monitor(mut self, name: impl Into<String>, monitor: MonitorConfig) -> Self {
        self.monitors.insert(name.into(), monitor);
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    fn default_poll_interval_ms() -> u64 {
        Self::DEFAULT_POLL_INTERVAL_MS
    }

    fn default_max_retries() -> u32 {
        Self::DEFAULT_MAX_RETRIES
    }
}

/// Top-level layout of the guardian configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardiansFile {
    pub guardians: BTreeMap<String, GuardianConfig>,
}

impl GuardiansFile {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.display().to_string(),
            source,
        })?;
        let file = Self::parse(&raw).map_err(|source| ConfigError::ParseFile {
            path: path.display().to_string(),
            source,
        })?;
        debug!(path = %path.display(), guardians = file.guardians.len(), "guardian config loaded");
        Ok(file)
    }

    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

fn get_required_var(key: &'static str) -> Result<String, ConfigError> {
    match env::var(key) {
        Ok(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                Err(ConfigError::MissingVar { key })
            } else {
                Ok(trimmed.to_string())
            }
        }
        Err(_) => Err(ConfigError::MissingVar { key }),
    }
}

pub fn hydrate_env_file() -> Result<(), ConfigError> {
    if env::var_os("CHAIN_GUARDIAN_SKIP_DOTENV").is_some() {
        return Ok(());
    }
    match dotenvy::dotenv() {
        Ok(_) => {}
        Err(dotenvy::Error::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => return Err(ConfigError::Dotenv { source: err }),
    }

    Ok(())
}

/// Errors emitted when `.env` hydration, environment parsing or the guardian
/// file fails.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable `{key}`")]
    MissingVar { key: &'static str },
    #[error("failed to read guardian config `{path}`: {source}")]
    ReadFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed guardian config `{path}`: {source}")]
    ParseFile {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to load .env file: {source}")]
    Dotenv {
        #[from]
        source: dotenvy::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ActionMethod;
    use std::sync::Mutex;

    static ENV_GUARD: Mutex<()> = Mutex::new(());

    const SAMPLE: &str = r#"{
        "guardians": {
            "laminar-main": {
                "networkType": "laminar",
                "nodeEndpoint": "http://localhost:9933",
                "confirmation": "instant",
                "monitors": {
                    "pool-risk": {
                        "task": "synthetic.poolRisk",
                        "arguments": { "poolId": "all", "currencyId": "fTokens" },
                        "actions": [ { "method": "POST", "target": "http://hooks/risk" } ]
                    },
                    "balances": { "task": "account.balance" }
                }
            }
        }
    }"#;

    #[test]
    fn config_loader_reads_env() {
        let _guard = ENV_GUARD.lock().unwrap();
        std::env::set_var("CHAIN_GUARDIAN_SKIP_DOTENV", "1");
        std::env::set_var("GUARDIAN_CONFIG_PATH", "  /etc/guardian.json ");

        let config = BootstrapConfig::load_from_env().expect("config loads");
        assert_eq!(config.guardian_config_path(), Path::new("/etc/guardian.json"));
    }

    #[test]
    fn empty_required_env_var_is_treated_as_missing() {
        let _guard = ENV_GUARD.lock().unwrap();
        std::env::set_var("CHAIN_GUARDIAN_SKIP_DOTENV", "1");
        std::env::set_var("GUARDIAN_CONFIG_PATH", "   ");

        let err = BootstrapConfig::load_from_env().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingVar {
                key: "GUARDIAN_CONFIG_PATH"
            }
        ));
        std::env::remove_var("GUARDIAN_CONFIG_PATH");
    }

    #[test]
    fn guardians_file_parses_with_defaults() {
        let file = GuardiansFile::parse(SAMPLE).expect("sample parses");
        let guardian = &file.guardians["laminar-main"];
        assert_eq!(guardian.network_type, "laminar");
        assert_eq!(guardian.confirmation, Confirmation::Instant);
        assert_eq!(guardian.poll_interval_ms, GuardianConfig::DEFAULT_POLL_INTERVAL_MS);
        assert_eq!(guardian.max_retries, GuardianConfig::DEFAULT_MAX_RETRIES);

        let names: Vec<_> = guardian.monitors.keys().cloned().collect();
        assert_eq!(names, vec!["balances", "pool-risk"]);

        let risk = &guardian.monitors["pool-risk"];
        assert_eq!(risk.actions[0].method, ActionMethod::Post);
        assert_eq!(guardian.monitors["balances"].arguments, Value::Null);
        assert!(guardian.monitors["balances"].actions.is_empty());
    }

    #[test]
    fn missing_file_is_reported_with_path() {
        let err = GuardiansFile::from_path(Path::new("/nonexistent/guardian.json")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/guardian.json"));
    }

    #[test]
    fn confirmation_defaults_to_finalize() {
        assert_eq!(GuardianConfig::new("laminar").confirmation, Confirmation::Finalize);
        assert_eq!(Confirmation::Instant.to_string(), "instant");
    }
}
