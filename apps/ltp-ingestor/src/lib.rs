#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::items_after_statements
    )
)]

//! LTP Ingestor - Index & Option Price Capture
//!
//! Subscribes to index ticks on an MQTT feed and, on the first tick of each
//! index, expands subscriptions to the option ladder around the at-the-money
//! strike. Every observed last-traded price is persisted in batches.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure pipeline types
//!   - `observation`: Observations, instrument kinds, topic routing
//!   - `atm`: Strike table and per-index ATM tracking
//!   - `subscription`: Active subscription set
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Broker, contract resolver, tick store, scheduler
//!   - `services`: Ingestor, subscription expander, batch writer, topic cache
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `mqtt`: Broker client and reconnecting event loop
//!   - `codec`: Protobuf/JSON payload decoding
//!   - `resolver`: HTTP contract token lookup
//!   - `persistence`: `PostgreSQL` and in-memory tick stores
//!   - `scheduler`: Flush timers
//!   - `config`, `health`, `metrics`, `telemetry`
//!
//! # Data Flow
//!
//! ```text
//! MQTT ──► Ingestor ──► codec ──► route
//!                                  ├─ index/<NAME>   ──► AtmTracker ──► SubscriptionExpander ──► MQTT
//!                                  │                 └─► BatchWriter
//!                                  └─ <SEG>|<TOKEN>  ──► BatchWriter
//! BatchWriter ──► TopicCache ──► TickStore (one transaction per flush)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Pipeline types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::atm::{AtmTracker, StrikeTable};
pub use domain::observation::{
    InstrumentKind, Observation, OptionSide, Strike, TopicId, TopicRoute, TopicScheme,
};
pub use domain::subscription::{ActiveSubscriptionSet, LegInfo, SubscriptionOrigin};

// Application services
pub use application::services::{
    BatchSettings, BatchWriter, ExpanderSettings, ExpansionReport, FlushOutcome, Ingestor,
    MessageOutcome, SubscriptionExpander, TopicCache, WriterStats,
};

// Infrastructure config
pub use infrastructure::config::{ConfigError, IngestorConfig, StoreBackend};

// Adapters
pub use infrastructure::codec::TickCodec;
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};
pub use infrastructure::mqtt::{BrokerEvent, MqttBrokerClient, MqttClientConfig};
pub use infrastructure::persistence::{InMemoryTickStore, PgTickStore};
pub use infrastructure::resolver::HttpContractResolver;
pub use infrastructure::scheduler::{ManualScheduler, TokioScheduler};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
