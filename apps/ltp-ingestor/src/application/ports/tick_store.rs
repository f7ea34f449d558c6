//! Tick Store Port (Driven Port)
//!
//! Interfaces for the durable store: topic identities (`topics`) and price
//! rows (`ltp_data`).
//!
//! Topic rows are written outside tick transactions. A topic id handed out
//! by the store must stay valid even when the batch that first needed it is
//! rolled back, otherwise the in-process topic cache would go stale.

use async_trait::async_trait;

use crate::domain::observation::{InstrumentKind, Observation, Strike, TopicId};

/// Errors from store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Store unreachable or pool exhausted.
    #[error("store connection error: {0}")]
    Connection(String),

    /// Read query failed.
    #[error("store read failed: {0}")]
    Read(String),

    /// Write or transaction control failed.
    #[error("store write failed: {0}")]
    Write(String),

    /// Another writer inserted the topic first.
    #[error("topic already exists: {0}")]
    DuplicateTopic(String),
}

/// Attributes of a topic row to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTopic {
    /// Unique topic name.
    pub name: String,
    /// Underlying index, when known.
    pub index_name: Option<String>,
    /// Instrument kind.
    pub kind: InstrumentKind,
    /// Strike, for option legs.
    pub strike: Option<Strike>,
}

impl NewTopic {
    /// Topic attributes carried by an observation.
    #[must_use]
    pub fn from_observation(observation: &Observation) -> Self {
        Self {
            name: observation.topic.clone(),
            index_name: observation.index_name.clone(),
            kind: observation.kind,
            strike: observation.strike,
        }
    }
}

/// One row of the multi-row tick insert.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickRow {
    /// Resolved topic id.
    pub topic_id: TopicId,
    /// Last traded price.
    pub price: f64,
}

/// Durable topic identities.
#[async_trait]
pub trait TopicStore: Send + Sync {
    /// Look up a topic id by unique name.
    async fn find_topic_id(&self, name: &str) -> Result<Option<TopicId>, StoreError>;

    /// Insert a topic and return its generated id.
    ///
    /// Returns [`StoreError::DuplicateTopic`] if the name already exists.
    async fn insert_topic(&self, topic: &NewTopic) -> Result<TopicId, StoreError>;
}

/// Transactional tick persistence.
#[async_trait]
pub trait TickStore: Send + Sync {
    /// Open a transaction.
    async fn begin(&self) -> Result<Box<dyn TickTransaction>, StoreError>;
}

/// An open tick transaction. Dropping it without commit discards its rows.
#[async_trait]
pub trait TickTransaction: Send {
    /// Insert rows as one multi-row statement. Returns the rows written.
    async fn insert_ticks(&mut self, rows: &[TickRow]) -> Result<u64, StoreError>;

    /// Commit the transaction.
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    /// Roll the transaction back.
    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
