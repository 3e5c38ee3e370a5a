//! Load configuration via `config` crate with env-override support.

use std::{ops::Deref, sync::Arc, time::Duration};

use serde::Deserialize;

use super::types::Res;

/// Default audit buffer capacity.
fn default_audit_capacity() -> usize {
    256
}

/// Default audit flush timeout, in milliseconds.
fn default_audit_flush_timeout_ms() -> u64 {
    500
}

/// Default audit database endpoint (in-memory SurrealDB).
fn default_audit_db_endpoint() -> String {
    "mem://".to_string()
}

/// Default hosted agent request timeout, in seconds.
fn default_agent_timeout_secs() -> u64 {
    60
}

/// Default number of recent question keys remembered for redelivery checks.
fn default_dedup_capacity() -> usize {
    100
}

/// Default width of the redelivery time bucket, in seconds.
fn default_dedup_window_secs() -> u64 {
    5
}

/// Configuration for the intent normalizer.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub inner: Arc<ConfigInner>,
}

impl Deref for Config {
    type Target = ConfigInner;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ConfigInner {
    /// Path to a rule table document; the built-in table is used when unset (`RULE_TABLE_PATH`).
    #[serde(default)]
    pub rule_table_path: Option<String>,
    /// Maximum number of audit records held while the sink is unavailable (`AUDIT_CAPACITY`).
    #[serde(default = "default_audit_capacity")]
    pub audit_capacity: usize,
    /// Upper bound on a single audit flush (`AUDIT_FLUSH_TIMEOUT_MS`).
    #[serde(default = "default_audit_flush_timeout_ms")]
    pub audit_flush_timeout_ms: u64,
    /// SurrealDB endpoint for the audit log, e.g. `mem://` or `ws://localhost:8000` (`AUDIT_DB_ENDPOINT`).
    #[serde(default = "default_audit_db_endpoint")]
    pub audit_db_endpoint: String,
    /// Audit database username (`AUDIT_DB_USERNAME`).
    #[serde(default)]
    pub audit_db_username: Option<String>,
    /// Audit database password (`AUDIT_DB_PASSWORD`).
    #[serde(default)]
    pub audit_db_password: Option<String>,
    /// Hosted analytics agent endpoint; questions are only normalized when unset (`AGENT_ENDPOINT`).
    #[serde(default)]
    pub agent_endpoint: Option<String>,
    /// Bearer token for the hosted agent (`AGENT_TOKEN`).
    #[serde(default)]
    pub agent_token: Option<String>,
    /// Hosted agent request timeout (`AGENT_TIMEOUT_SECS`).
    #[serde(default = "default_agent_timeout_secs")]
    pub agent_timeout_secs: u64,
    /// Number of recent question keys remembered (`DEDUP_CAPACITY`).
    #[serde(default = "default_dedup_capacity")]
    pub dedup_capacity: usize,
    /// Width of the time bucket used to spot redelivered questions (`DEDUP_WINDOW_SECS`).
    #[serde(default = "default_dedup_window_secs")]
    pub dedup_window_secs: u64,
}

impl Default for ConfigInner {
    fn default() -> Self {
        Self {
            rule_table_path: None,
            audit_capacity: default_audit_capacity(),
            audit_flush_timeout_ms: default_audit_flush_timeout_ms(),
            audit_db_endpoint: default_audit_db_endpoint(),
            audit_db_username: None,
            audit_db_password: None,
            agent_endpoint: None,
            agent_token: None,
            agent_timeout_secs: default_agent_timeout_secs(),
            dedup_capacity: default_dedup_capacity(),
            dedup_window_secs: default_dedup_window_secs(),
        }
    }
}

impl ConfigInner {
    pub fn audit_flush_timeout(&self) -> Duration {
        Duration::from_millis(self.audit_flush_timeout_ms)
    }

    pub fn agent_timeout(&self) -> Duration {
        Duration::from_secs(self.agent_timeout_secs)
    }
}

impl Config {
    pub fn load(explicit_path: Option<&std::path::Path>) -> Res<Self> {
        let mut cfg = config::Config::builder().add_source(config::Environment::default().prefix("INTENT_NORMALIZER"));

        if let Some(p) = explicit_path {
            cfg = cfg.add_source(config::File::from(p.to_path_buf()));
        } else if std::path::Path::new(".hidden/config.toml").exists() {
            cfg = cfg.add_source(config::File::with_name(".hidden/config.toml"));
        }

        let result = Config {
            inner: Arc::new(cfg.build()?.try_deserialize()?),
        };

        result.validate()?;

        Ok(result)
    }

    /// Check value ranges; any failure aborts startup.
    pub fn validate(&self) -> Res<()> {
        if self.audit_capacity < 1 {
            return Err(anyhow::anyhow!("Audit capacity must be at least 1."));
        }

        if self.audit_flush_timeout_ms < 1 {
            return Err(anyhow::anyhow!("Audit flush timeout must be greater than 0."));
        }

        if self.agent_timeout_secs < 1 {
            return Err(anyhow::anyhow!("Agent timeout must be greater than 0."));
        }

        if self.dedup_capacity < 1 {
            return Err(anyhow::anyhow!("Dedup capacity must be at least 1."));
        }

        if self.dedup_window_secs < 1 {
            return Err(anyhow::anyhow!("Dedup window must be greater than 0."));
        }

        if self.agent_endpoint.is_some() && self.agent_token.as_deref().is_none_or(str::is_empty) {
            return Err(anyhow::anyhow!("An agent token is required when an agent endpoint is set."));
        }

        Ok(())
    }
}

impl From<ConfigInner> for Config {
    fn from(inner: ConfigInner) -> Self {
        Self { inner: Arc::new(inner) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::from(ConfigInner::default());

        assert!(config.validate().is_ok());
        assert_eq!(config.audit_capacity, 256);
        assert_eq!(config.audit_db_endpoint, "mem://");
    }

    #[test]
    fn test_zero_audit_capacity_is_rejected() {
        let config = Config::from(ConfigInner {
            audit_capacity: 0,
            ..Default::default()
        });

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_agent_endpoint_requires_token() {
        let config = Config::from(ConfigInner {
            agent_endpoint: Some("https://agent.example.com/run".to_string()),
            ..Default::default()
        });

        assert!(config.validate().is_err());

        let config = Config::from(ConfigInner {
            agent_endpoint: Some("https://agent.example.com/run".to_string()),
            agent_token: Some("token".to_string()),
            ..Default::default()
        });

        assert!(config.validate().is_ok());
    }
}
