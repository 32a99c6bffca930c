//! Ledger configuration.
//!
//! Loaded in layers:
//! 1. Default values in code
//! 2. Optional `config/rxledger.toml`
//! 3. Environment variable overrides, `RXLEDGER__` prefix and `__` separator
//!    (e.g. `RXLEDGER__LEDGER__VOID_WINDOW_HOURS=48`)

use std::time::Duration;

use config::builder::DefaultState;
use config::{ConfigBuilder, ConfigError, Environment, File};
use serde::Deserialize;

use rxledger_sales::VoidPolicy;

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    pub ledger: LedgerSection,
    pub alerts: AlertsSection,
    pub server: ServerSection,
    pub database: DatabaseSection,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct LedgerSection {
    /// Hours after creation during which any staff member may void a sale.
    pub void_window_hours: i64,

    /// Total attempts (first try included) when a unit loses an optimistic race.
    pub max_commit_attempts: u32,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct AlertsSection {
    pub mode: AlertMode,
    pub sweep_interval_secs: u64,
}

/// How post-commit alert evaluation runs.
#[derive(Debug, Deserialize, Copy, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AlertMode {
    /// Awaited right after commit; failures are logged.
    Inline,
    /// Spawned onto the runtime.
    Background,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct DatabaseSection {
    /// PostgreSQL connection URL. In-memory stores are used when unset.
    pub url: Option<String>,
    pub max_connections: u32,
}

impl LedgerConfig {
    /// Load configuration from defaults, the optional file and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_builder(
            Self::defaults()?
                .add_source(File::with_name("config/rxledger").required(false))
                .add_source(
                    Environment::with_prefix("RXLEDGER")
                        .separator("__")
                        .try_parsing(true),
                ),
        )
    }

    /// Builder pre-populated with every default.
    pub fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        config::Config::builder()
            .set_default("ledger.void_window_hours", 24)?
            .set_default("ledger.max_commit_attempts", 3)?
            .set_default("alerts.mode", "inline")?
            .set_default("alerts.sweep_interval_secs", 3600)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("database.max_connections", 10)
    }

    pub fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self, ConfigError> {
        let config: LedgerConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.ledger.void_window_hours < 0 {
            return Err(ConfigError::Message(
                "ledger.void_window_hours cannot be negative".into(),
            ));
        }
        if self.ledger.max_commit_attempts == 0 {
            return Err(ConfigError::Message(
                "ledger.max_commit_attempts must be at least 1".into(),
            ));
        }
        if self.alerts.sweep_interval_secs == 0 {
            return Err(ConfigError::Message(
                "alerts.sweep_interval_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn void_policy(&self) -> VoidPolicy {
        VoidPolicy::with_hours(self.ledger.void_window_hours)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.alerts.sweep_interval_secs)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            ledger: LedgerSection {
                void_window_hours: rxledger_sales::void_policy::DEFAULT_VOID_WINDOW_HOURS,
                max_commit_attempts: 3,
            },
            alerts: AlertsSection {
                mode: AlertMode::Inline,
                sweep_interval_secs: 3600,
            },
            server: ServerSection {
                host: "0.0.0.0".to_string(),
                port: 8080,
            },
            database: DatabaseSection {
                url: None,
                max_connections: 10,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_default_impl() {
        let loaded = LedgerConfig::from_builder(LedgerConfig::defaults().unwrap()).unwrap();
        assert_eq!(loaded, LedgerConfig::default());
        assert_eq!(loaded.bind_address(), "0.0.0.0:8080");
        assert_eq!(loaded.void_policy().window().num_hours(), 24);
    }

    #[test]
    fn overrides_apply_on_top_of_defaults() {
        let builder = LedgerConfig::defaults()
            .unwrap()
            .set_override("alerts.mode", "background")
            .unwrap()
            .set_override("ledger.void_window_hours", 48)
            .unwrap()
            .set_override("database.url", "postgres://localhost/rx")
            .unwrap();
        let config = LedgerConfig::from_builder(builder).unwrap();
        assert_eq!(config.alerts.mode, AlertMode::Background);
        assert_eq!(config.ledger.void_window_hours, 48);
        assert_eq!(config.database.url.as_deref(), Some("postgres://localhost/rx"));
    }

    #[test]
    fn zero_commit_attempts_is_rejected() {
        let builder = LedgerConfig::defaults()
            .unwrap()
            .set_override("ledger.max_commit_attempts", 0)
            .unwrap();
        assert!(LedgerConfig::from_builder(builder).is_err());
    }
}
