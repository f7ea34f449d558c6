//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Tick payload decoding (protobuf and JSON).
pub mod codec;

/// Configuration and dependency injection.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// MQTT broker client and event loop.
pub mod mqtt;

/// Tick store adapters (`PostgreSQL`, in-memory).
pub mod persistence;

/// HTTP contract token resolver.
pub mod resolver;

/// Deferred action schedulers (Tokio timers, manual).
pub mod scheduler;

/// Logging and OpenTelemetry tracing integration.
pub mod telemetry;
