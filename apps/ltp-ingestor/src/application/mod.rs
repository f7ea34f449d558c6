//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the pipeline services and the port interfaces that
//! define how they reach the broker, the contract resolver and the store.

/// Port interfaces for external systems (broker, resolver, store, timer).
pub mod ports;

/// Pipeline services: topic cache, expansion, batch writing, ingestion.
pub mod services;
