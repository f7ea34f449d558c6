//! Ingestor Configuration Settings
//!
//! Configuration types for the ingestor, loaded from environment variables.
//! Per-index values use suffixed keys, e.g. `LTP_EXPIRY_NIFTY` and
//! `LTP_STRIKE_DIFF_NIFTY`.

use std::collections::HashMap;
use std::time::Duration;

use crate::application::services::{BatchSettings, ExpanderSettings};
use crate::domain::atm::StrikeTable;
use crate::domain::observation::{Strike, TopicScheme};
use crate::infrastructure::resolver::DEFAULT_RESOLVER_URL;

/// Broker username and password.
#[derive(Clone)]
pub struct MqttCredentials {
    username: String,
    password: String,
}

impl MqttCredentials {
    /// Create new credentials.
    #[must_use]
    pub const fn new(username: String, password: String) -> Self {
        Self { username, password }
    }

    /// Get the username.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Get the password.
    #[must_use]
    pub fn password(&self) -> &str {
        &self.password
    }
}

impl std::fmt::Debug for MqttCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttCredentials")
            .field("username", &"[REDACTED]")
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Broker connection settings.
#[derive(Debug, Clone)]
pub struct BrokerSettings {
    /// Broker host.
    pub host: String,
    /// Broker port; 8883 selects TLS.
    pub port: u16,
    /// MQTT client id.
    pub client_id: String,
    /// Optional username and password.
    pub credentials: Option<MqttCredentials>,
    /// MQTT keep-alive interval.
    pub keep_alive: Duration,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
    /// Maximum reconnection attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
    /// Capacity of the broker event channel.
    pub event_buffer: usize,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: format!("ltp-ingestor-{:08x}", rand::random::<u32>()),
            credentials: None,
            keep_alive: Duration::from_secs(60),
            reconnect_delay_initial: Duration::from_secs(1),
            reconnect_delay_max: Duration::from_secs(30),
            reconnect_delay_multiplier: 2.0,
            max_reconnect_attempts: 0, // Unlimited
            event_buffer: 10_000,
        }
    }
}

/// Where ticks are persisted.
#[derive(Clone, PartialEq, Eq)]
pub enum StoreBackend {
    /// `PostgreSQL` at the given URL.
    Postgres {
        /// Connection URL; may embed a password.
        url: String,
    },
    /// Process memory; nothing survives a restart.
    Memory,
}

impl std::fmt::Debug for StoreBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Postgres { .. } => f
                .debug_struct("Postgres")
                .field("url", &"[REDACTED]")
                .finish(),
            Self::Memory => f.write_str("Memory"),
        }
    }
}

/// Store settings.
#[derive(Debug, Clone)]
pub struct StoreSettings {
    /// Backend.
    pub backend: StoreBackend,
    /// Pool size.
    pub max_connections: u32,
    /// Create tables on startup.
    pub ensure_schema: bool,
}

/// Pipeline settings.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Buffered observations that trigger a flush.
    pub batch_size: usize,
    /// Delay before a timed flush.
    pub batch_interval: Duration,
    /// Flush attempts per row before it is dropped.
    pub max_flush_attempts: u32,
    /// Strikes on each side of the ATM strike.
    pub strike_range: u32,
    /// Indices to bootstrap, upper-cased.
    pub indices: Vec<String>,
    /// Index topic prefix.
    pub index_prefix: String,
    /// Option topic prefix.
    pub option_prefix: String,
    /// Contract expiry per index.
    pub expiries: HashMap<String, String>,
    /// Strike step overrides per index.
    pub strike_steps: HashMap<String, Strike>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        let batch = BatchSettings::default();
        Self {
            batch_size: batch.batch_size,
            batch_interval: batch.batch_interval,
            max_flush_attempts: batch.max_attempts,
            strike_range: 5,
            indices: ["NIFTY", "BANKNIFTY", "FINNIFTY", "MIDCPNIFTY"]
                .into_iter()
                .map(String::from)
                .collect(),
            index_prefix: "index".to_string(),
            option_prefix: "NSE_FO".to_string(),
            expiries: HashMap::new(),
            strike_steps: HashMap::new(),
        }
    }
}

impl PipelineSettings {
    /// Batch writer settings.
    #[must_use]
    pub const fn batch_settings(&self) -> BatchSettings {
        BatchSettings {
            batch_size: self.batch_size,
            batch_interval: self.batch_interval,
            max_attempts: self.max_flush_attempts,
        }
    }

    /// Expander settings.
    #[must_use]
    pub fn expander_settings(&self) -> ExpanderSettings {
        ExpanderSettings {
            strike_range: self.strike_range,
            expiries: self.expiries.clone(),
        }
    }

    /// Default strike table with configured overrides applied.
    #[must_use]
    pub fn strike_table(&self) -> StrikeTable {
        self.strike_steps
            .iter()
            .fold(StrikeTable::default(), |table, (index, step)| {
                table.with_step(index, *step)
            })
    }

    /// Topic naming scheme.
    #[must_use]
    pub fn topic_scheme(&self) -> TopicScheme {
        TopicScheme::new(self.index_prefix.clone(), self.option_prefix.clone())
    }
}

/// Contract resolver settings.
#[derive(Debug, Clone)]
pub struct ResolverSettings {
    /// Token lookup endpoint.
    pub url: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_RESOLVER_URL.to_string(),
            timeout: Duration::from_secs(5),
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Health check HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8083 }
    }
}

/// Complete ingestor configuration.
#[derive(Debug, Clone)]
pub struct IngestorConfig {
    /// Broker connection settings.
    pub broker: BrokerSettings,
    /// Store settings.
    pub store: StoreSettings,
    /// Pipeline settings.
    pub pipeline: PipelineSettings,
    /// Contract resolver settings.
    pub resolver: ResolverSettings,
    /// Server port settings.
    pub server: ServerSettings,
}

impl IngestorConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from a key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if required keys are missing or invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let host = env.required("MQTT_HOST")?;
        let broker_defaults = BrokerSettings::default();
        let credentials = match (env.get("MQTT_USERNAME"), env.get("MQTT_PASSWORD")) {
            (Some(username), password) if !username.is_empty() => Some(MqttCredentials::new(
                username,
                password.unwrap_or_default(),
            )),
            _ => None,
        };
        let broker = BrokerSettings {
            host,
            port: env.parse_or("MQTT_PORT", broker_defaults.port),
            client_id: env
                .get("MQTT_CLIENT_ID")
                .filter(|id| !id.is_empty())
                .unwrap_or(broker_defaults.client_id),
            credentials,
            keep_alive: env.secs_or("MQTT_KEEP_ALIVE_SECS", broker_defaults.keep_alive),
            reconnect_delay_initial: env.millis_or(
                "MQTT_RECONNECT_DELAY_INITIAL_MS",
                broker_defaults.reconnect_delay_initial,
            ),
            reconnect_delay_max: env.secs_or(
                "MQTT_RECONNECT_DELAY_MAX_SECS",
                broker_defaults.reconnect_delay_max,
            ),
            reconnect_delay_multiplier: env.parse_or(
                "MQTT_RECONNECT_DELAY_MULTIPLIER",
                broker_defaults.reconnect_delay_multiplier,
            ),
            max_reconnect_attempts: env.parse_or(
                "MQTT_MAX_RECONNECT_ATTEMPTS",
                broker_defaults.max_reconnect_attempts,
            ),
            event_buffer: env.parse_or("MQTT_EVENT_BUFFER", broker_defaults.event_buffer),
        };

        let backend = match env.get("LTP_STORE").as_deref().map(str::to_lowercase).as_deref() {
            None | Some("postgres" | "postgresql") => StoreBackend::Postgres {
                url: env.required("DATABASE_URL")?,
            },
            Some("memory") => StoreBackend::Memory,
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    key: "LTP_STORE".to_string(),
                    value: other.to_string(),
                });
            }
        };
        let store = StoreSettings {
            backend,
            max_connections: env.parse_or("LTP_DB_MAX_CONNECTIONS", 5),
            ensure_schema: env.parse_or("LTP_DB_ENSURE_SCHEMA", true),
        };

        let pipeline_defaults = PipelineSettings::default();
        let indices = env.get("LTP_INDICES").map_or(pipeline_defaults.indices, |list| {
            list.split(',')
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect()
        });
        let expiries = indices
            .iter()
            .filter_map(|index| {
                env.get(&format!("LTP_EXPIRY_{index}"))
                    .filter(|date| !date.is_empty())
                    .map(|date| (index.clone(), date))
            })
            .collect();
        let strike_steps = indices
            .iter()
            .filter_map(|index| {
                env.get(&format!("LTP_STRIKE_DIFF_{index}"))
                    .and_then(|v| v.parse::<Strike>().ok())
                    .filter(|step| *step > 0)
                    .map(|step| (index.clone(), step))
            })
            .collect();
        let pipeline = PipelineSettings {
            batch_size: env.parse_or("LTP_BATCH_SIZE", pipeline_defaults.batch_size),
            batch_interval: env.millis_or("LTP_BATCH_INTERVAL_MS", pipeline_defaults.batch_interval),
            max_flush_attempts: env.parse_or(
                "LTP_FLUSH_MAX_ATTEMPTS",
                pipeline_defaults.max_flush_attempts,
            ),
            strike_range: env.parse_or("LTP_STRIKE_RANGE", pipeline_defaults.strike_range),
            indices,
            index_prefix: env
                .get("LTP_INDEX_PREFIX")
                .unwrap_or(pipeline_defaults.index_prefix),
            option_prefix: env
                .get("LTP_OPTION_PREFIX")
                .unwrap_or(pipeline_defaults.option_prefix),
            expiries,
            strike_steps,
        };

        let resolver_defaults = ResolverSettings::default();
        let resolver = ResolverSettings {
            url: env.get("TOKEN_RESOLVER_URL").unwrap_or(resolver_defaults.url),
            timeout: env.millis_or("TOKEN_RESOLVER_TIMEOUT_MS", resolver_defaults.timeout),
        };

        let server = ServerSettings {
            health_port: env.parse_or("LTP_HEALTH_PORT", ServerSettings::default().health_port),
        };

        Ok(Self {
            broker,
            store,
            pipeline,
            resolver,
            server,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable has an unsupported value.
    #[error("invalid value {value:?} for {key}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Rejected value.
        value: String,
    },
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    fn required(&self, key: &str) -> Result<String, ConfigError> {
        let value = self
            .get(key)
            .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))?;
        if value.is_empty() {
            return Err(ConfigError::EmptyValue(key.to_string()));
        }
        Ok(value)
    }

    fn parse_or<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn secs_or(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }

    fn millis_or(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<IngestorConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        IngestorConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let config = config(&[
            ("MQTT_HOST", "broker.local"),
            ("DATABASE_URL", "postgres://u:p@db/ltp"),
        ])
        .unwrap();

        assert_eq!(config.broker.host, "broker.local");
        assert_eq!(config.broker.port, 1883);
        assert!(config.broker.client_id.starts_with("ltp-ingestor-"));
        assert!(config.broker.credentials.is_none());
        assert_eq!(config.pipeline.batch_size, 100);
        assert_eq!(config.pipeline.batch_interval, Duration::from_secs(1));
        assert_eq!(config.pipeline.max_flush_attempts, 3);
        assert_eq!(config.pipeline.strike_range, 5);
        assert_eq!(config.pipeline.index_prefix, "index");
        assert_eq!(config.pipeline.option_prefix, "NSE_FO");
        assert_eq!(config.server.health_port, 8083);
        assert_eq!(config.resolver.url, DEFAULT_RESOLVER_URL);
        assert!(matches!(config.store.backend, StoreBackend::Postgres { .. }));
        assert!(config.store.ensure_schema);
    }

    #[test]
    fn missing_host_is_an_error() {
        let err = config(&[("DATABASE_URL", "postgres://db")]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(key) if key == "MQTT_HOST"));
    }

    #[test]
    fn empty_host_is_an_error() {
        let err = config(&[("MQTT_HOST", ""), ("LTP_STORE", "memory")]).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyValue(_)));
    }

    #[test]
    fn database_url_required_for_postgres() {
        let err = config(&[("MQTT_HOST", "b")]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(key) if key == "DATABASE_URL"));
    }

    #[test]
    fn memory_store_needs_no_database() {
        let config = config(&[("MQTT_HOST", "b"), ("LTP_STORE", "Memory")]).unwrap();
        assert_eq!(config.store.backend, StoreBackend::Memory);
    }

    #[test]
    fn unknown_store_is_rejected() {
        let err = config(&[("MQTT_HOST", "b"), ("LTP_STORE", "redis")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn per_index_expiry_and_strike_step() {
        let config = config(&[
            ("MQTT_HOST", "b"),
            ("LTP_STORE", "memory"),
            ("LTP_INDICES", " nifty, BANKNIFTY ,,"),
            ("LTP_EXPIRY_NIFTY", "2025-07-31"),
            ("LTP_STRIKE_DIFF_BANKNIFTY", "500"),
            ("LTP_STRIKE_DIFF_NIFTY", "-5"),
        ])
        .unwrap();

        assert_eq!(config.pipeline.indices, vec!["NIFTY", "BANKNIFTY"]);
        let expander = config.pipeline.expander_settings();
        assert_eq!(expander.expiry("nifty"), Some("2025-07-31"));
        assert_eq!(expander.expiry("BANKNIFTY"), None);

        let table = config.pipeline.strike_table();
        assert_eq!(table.step("BANKNIFTY"), 500);
        assert_eq!(table.step("NIFTY"), 50);
    }

    #[test]
    fn batch_settings_from_env() {
        let config = config(&[
            ("MQTT_HOST", "b"),
            ("LTP_STORE", "memory"),
            ("LTP_BATCH_SIZE", "250"),
            ("LTP_BATCH_INTERVAL_MS", "200"),
            ("LTP_FLUSH_MAX_ATTEMPTS", "not-a-number"),
        ])
        .unwrap();

        let batch = config.pipeline.batch_settings();
        assert_eq!(batch.batch_size, 250);
        assert_eq!(batch.batch_interval, Duration::from_millis(200));
        assert_eq!(batch.max_attempts, 3);
    }

    #[test]
    fn credentials_redacted_debug() {
        let config = config(&[
            ("MQTT_HOST", "b"),
            ("MQTT_USERNAME", "user123"),
            ("MQTT_PASSWORD", "secret456"),
            ("DATABASE_URL", "postgres://dbuser:dbpass@db/ltp"),
        ])
        .unwrap();

        let debug = format!("{config:?}");
        assert!(!debug.contains("user123"));
        assert!(!debug.contains("secret456"));
        assert!(!debug.contains("dbpass"));
        assert!(debug.contains("[REDACTED]"));
        assert_eq!(config.broker.credentials.unwrap().username(), "user123");
    }

    #[test]
    fn topic_scheme_uses_prefixes() {
        let config = config(&[
            ("MQTT_HOST", "b"),
            ("LTP_STORE", "memory"),
            ("LTP_OPTION_PREFIX", "BSE_FO"),
        ])
        .unwrap();

        assert_eq!(config.pipeline.topic_scheme().option_topic("1"), "BSE_FO|1");
    }
}
