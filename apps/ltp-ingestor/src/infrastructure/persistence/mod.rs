//! Tick Store Adapters
//!
//! - [`PgTickStore`]: `PostgreSQL` via `SQLx`
//! - [`InMemoryTickStore`]: process memory, with failure injection

mod in_memory;
mod postgres;

pub use in_memory::{InMemoryTickStore, InMemoryTransaction, StoredTopic};
pub use postgres::{PgTickStore, PgTickTransaction};
