//! Configuration Module
//!
//! Configuration loading and dependency injection for the ingestor.

mod settings;

pub use settings::{
    BrokerSettings, ConfigError, IngestorConfig, MqttCredentials, PipelineSettings,
    ResolverSettings, ServerSettings, StoreBackend, StoreSettings,
};
