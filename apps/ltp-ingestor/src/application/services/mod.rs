//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `TopicCache`: Write-through topic name to id mapping
//! - `SubscriptionExpander`: Option ladder and index subscriptions
//! - `BatchWriter`: Size- and interval-triggered transactional writes
//! - `Ingestor`: Per-message decode, route, track and enqueue

mod batch_writer;
mod expander;
mod ingest;
mod topic_cache;

pub use batch_writer::{BatchSettings, BatchWriter, Enqueued, FlushOutcome, WriterStats};
pub use expander::{ExpanderSettings, ExpansionReport, LegOutcome, SubscriptionExpander};
pub use ingest::{IngestStats, Ingestor, MessageOutcome};
pub use topic_cache::TopicCache;
