//! Domain Layer - Core ingestion types and business rules.
//!
//! This layer contains the pure types of the pipeline: observations and
//! topic routing, ATM strike tracking, and the active subscription set.
//! Nothing here performs I/O.

/// Price observations, instrument kinds and topic routing.
pub mod observation;

/// ATM strike computation and per-index expansion state.
pub mod atm;

/// Active broker subscription tracking.
pub mod subscription;
