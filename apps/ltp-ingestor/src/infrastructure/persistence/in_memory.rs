//! In-memory tick store for tests and dry runs.
//!
//! Mirrors the durable store's observable behaviour: unique topic names,
//! generated ids, and tick rows that only become visible on commit. Failures
//! can be injected per operation.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::application::ports::{
    NewTopic, StoreError, TickRow, TickStore, TickTransaction, TopicStore,
};
use crate::domain::observation::{InstrumentKind, Strike, TopicId};

/// A stored topic row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredTopic {
    /// Generated id.
    pub id: TopicId,
    /// Unique name.
    pub name: String,
    /// Underlying index.
    pub index_name: Option<String>,
    /// Instrument kind.
    pub kind: InstrumentKind,
    /// Strike.
    pub strike: Option<Strike>,
}

#[derive(Debug, Default)]
struct Tables {
    topics: HashMap<String, StoredTopic>,
    ticks: Vec<TickRow>,
    next_id: TopicId,
}

#[derive(Debug, Default)]
struct Inner {
    tables: Mutex<Tables>,
    fail_begin: AtomicBool,
    fail_topic_reads: AtomicBool,
    fail_tick_inserts: AtomicBool,
    topic_writes: AtomicU64,
    transactions_begun: AtomicU64,
    commits: AtomicU64,
    rollbacks: AtomicU64,
}

/// Tick store held in process memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTickStore {
    inner: Arc<Inner>,
}

impl InMemoryTickStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `begin` fail with a connection error.
    pub fn fail_begin(&self, fail: bool) {
        self.inner.fail_begin.store(fail, Ordering::SeqCst);
    }

    /// Make topic lookups fail with a read error.
    pub fn fail_topic_reads(&self, fail: bool) {
        self.inner.fail_topic_reads.store(fail, Ordering::SeqCst);
    }

    /// Make tick inserts fail with a write error.
    pub fn fail_tick_inserts(&self, fail: bool) {
        self.inner.fail_tick_inserts.store(fail, Ordering::SeqCst);
    }

    /// Successful topic inserts.
    #[must_use]
    pub fn topic_writes(&self) -> u64 {
        self.inner.topic_writes.load(Ordering::SeqCst)
    }

    /// Transactions opened.
    #[must_use]
    pub fn transactions_begun(&self) -> u64 {
        self.inner.transactions_begun.load(Ordering::SeqCst)
    }

    /// Transactions committed.
    #[must_use]
    pub fn commits(&self) -> u64 {
        self.inner.commits.load(Ordering::SeqCst)
    }

    /// Transactions rolled back, explicitly or by drop.
    #[must_use]
    pub fn rollbacks(&self) -> u64 {
        self.inner.rollbacks.load(Ordering::SeqCst)
    }

    /// Number of topic rows.
    #[must_use]
    pub fn topic_count(&self) -> usize {
        self.inner.tables.lock().topics.len()
    }

    /// Number of committed tick rows.
    #[must_use]
    pub fn tick_count(&self) -> usize {
        self.inner.tables.lock().ticks.len()
    }

    /// Committed tick rows in commit order.
    #[must_use]
    pub fn ticks(&self) -> Vec<TickRow> {
        self.inner.tables.lock().ticks.clone()
    }

    /// Topic row by name.
    #[must_use]
    pub fn topic(&self, name: &str) -> Option<StoredTopic> {
        self.inner.tables.lock().topics.get(name).cloned()
    }
}

#[async_trait]
impl TopicStore for InMemoryTickStore {
    async fn find_topic_id(&self, name: &str) -> Result<Option<TopicId>, StoreError> {
        if self.inner.fail_topic_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Read("injected topic read failure".to_string()));
        }
        Ok(self.inner.tables.lock().topics.get(name).map(|t| t.id))
    }

    async fn insert_topic(&self, topic: &NewTopic) -> Result<TopicId, StoreError> {
        let mut tables = self.inner.tables.lock();
        if tables.topics.contains_key(&topic.name) {
            return Err(StoreError::DuplicateTopic(topic.name.clone()));
        }

        tables.next_id += 1;
        let id = tables.next_id;
        tables.topics.insert(
            topic.name.clone(),
            StoredTopic {
                id,
                name: topic.name.clone(),
                index_name: topic.index_name.clone(),
                kind: topic.kind,
                strike: topic.strike,
            },
        );
        self.inner.topic_writes.fetch_add(1, Ordering::SeqCst);
        Ok(id)
    }
}

#[async_trait]
impl TickStore for InMemoryTickStore {
    async fn begin(&self) -> Result<Box<dyn TickTransaction>, StoreError> {
        if self.inner.fail_begin.load(Ordering::SeqCst) {
            return Err(StoreError::Connection("injected begin failure".to_string()));
        }
        self.inner.transactions_begun.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(InMemoryTransaction {
            inner: Arc::clone(&self.inner),
            staged: Vec::new(),
            finished: false,
        }))
    }
}

/// Open transaction staging tick rows until commit.
#[derive(Debug)]
pub struct InMemoryTransaction {
    inner: Arc<Inner>,
    staged: Vec<TickRow>,
    finished: bool,
}

#[async_trait]
impl TickTransaction for InMemoryTransaction {
    async fn insert_ticks(&mut self, rows: &[TickRow]) -> Result<u64, StoreError> {
        if self.inner.fail_tick_inserts.load(Ordering::SeqCst) {
            return Err(StoreError::Write("injected tick insert failure".to_string()));
        }
        {
            let tables = self.inner.tables.lock();
            if let Some(row) = rows.iter().find(|r| r.topic_id <= 0 || r.topic_id > tables.next_id) {
                return Err(StoreError::Write(format!(
                    "foreign key violation: topic_id {}",
                    row.topic_id
                )));
            }
        }
        self.staged.extend_from_slice(rows);
        Ok(rows.len() as u64)
    }

    async fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        let staged = std::mem::take(&mut self.staged);
        self.inner.tables.lock().ticks.extend(staged);
        self.inner.commits.fetch_add(1, Ordering::SeqCst);
        self.finished = true;
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<(), StoreError> {
        self.staged.clear();
        self.inner.rollbacks.fetch_add(1, Ordering::SeqCst);
        self.finished = true;
        Ok(())
    }
}

impl Drop for InMemoryTransaction {
    fn drop(&mut self) {
        if !self.finished {
            self.inner.rollbacks.fetch_add(1, Ordering::SeqCst);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn topic(name: &str) -> NewTopic {
        NewTopic {
            name: name.to_string(),
            index_name: Some("NIFTY".to_string()),
            kind: InstrumentKind::Index,
            strike: None,
        }
    }

    #[tokio::test]
    async fn duplicate_topic_is_rejected() {
        let store = InMemoryTickStore::new();

        let id = store.insert_topic(&topic("index/NIFTY")).await.unwrap();
        let dup = store.insert_topic(&topic("index/NIFTY")).await;

        assert!(matches!(dup, Err(StoreError::DuplicateTopic(_))));
        assert_eq!(store.find_topic_id("index/NIFTY").await.unwrap(), Some(id));
        assert_eq!(store.topic_writes(), 1);
    }

    #[tokio::test]
    async fn ticks_visible_only_after_commit() {
        let store = InMemoryTickStore::new();
        let id = store.insert_topic(&topic("index/NIFTY")).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.insert_ticks(&[TickRow {
            topic_id: id,
            price: 1.0,
        }])
        .await
        .unwrap();
        assert_eq!(store.tick_count(), 0);

        tx.commit().await.unwrap();
        assert_eq!(store.tick_count(), 1);
        assert_eq!(store.commits(), 1);
    }

    #[tokio::test]
    async fn rollback_and_drop_discard_rows() {
        let store = InMemoryTickStore::new();
        let id = store.insert_topic(&topic("index/NIFTY")).await.unwrap();
        let row = TickRow {
            topic_id: id,
            price: 1.0,
        };

        let mut tx = store.begin().await.unwrap();
        tx.insert_ticks(&[row]).await.unwrap();
        tx.rollback().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.insert_ticks(&[row]).await.unwrap();
        drop(tx);

        assert_eq!(store.tick_count(), 0);
        assert_eq!(store.rollbacks(), 2);
    }

    #[tokio::test]
    async fn unknown_topic_id_violates_foreign_key() {
        let store = InMemoryTickStore::new();
        let mut tx = store.begin().await.unwrap();

        let result = tx
            .insert_ticks(&[TickRow {
                topic_id: 99,
                price: 1.0,
            }])
            .await;

        assert!(matches!(result, Err(StoreError::Write(_))));
    }

    #[tokio::test]
    async fn injected_begin_failure() {
        let store = InMemoryTickStore::new();
        store.fail_begin(true);

        assert!(matches!(store.begin().await, Err(StoreError::Connection(_))));
        assert_eq!(store.transactions_begun(), 0);

        store.fail_begin(false);
        tokio_test::assert_ok!(store.begin().await);
    }

    #[tokio::test]
    async fn injected_read_and_insert_failures() {
        let store = InMemoryTickStore::new();
        let id = store.insert_topic(&topic("index/NIFTY")).await.unwrap();

        store.fail_topic_reads(true);
        tokio_test::assert_err!(store.find_topic_id("index/NIFTY").await);

        store.fail_tick_inserts(true);
        let mut tx = store.begin().await.unwrap();
        tokio_test::assert_err!(tx.insert_ticks(&[TickRow { topic_id: id, price: 1.0 }]).await);
    }
}
