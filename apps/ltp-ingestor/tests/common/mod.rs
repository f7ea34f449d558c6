//! Shared fakes for integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use ltp_ingestor::application::ports::{
    BrokerClient, BrokerError, ContractQuery, ContractResolver, ResolverError,
};
use ltp_ingestor::{
    ActiveSubscriptionSet, AtmTracker, BatchSettings, BatchWriter, ExpanderSettings,
    InMemoryTickStore, Ingestor, ManualScheduler, StrikeTable, SubscriptionExpander, TopicCache,
    TopicScheme,
};

/// Broker that records subscribe calls and rejects chosen topics.
#[derive(Debug, Default)]
pub struct RecordingBroker {
    subscribed: Mutex<Vec<String>>,
    rejected: Mutex<HashSet<String>>,
}

impl RecordingBroker {
    pub fn subscribed(&self) -> Vec<String> {
        self.subscribed.lock().clone()
    }

    pub fn clear(&self) {
        self.subscribed.lock().clear();
    }

    pub fn reject(&self, topic: &str) {
        self.rejected.lock().insert(topic.to_string());
    }
}

#[async_trait]
impl BrokerClient for RecordingBroker {
    async fn subscribe(&self, topic: &str) -> Result<(), BrokerError> {
        if self.rejected.lock().contains(topic) {
            return Err(BrokerError::Subscribe {
                topic: topic.to_string(),
                reason: "rejected".to_string(),
            });
        }
        self.subscribed.lock().push(topic.to_string());
        Ok(())
    }
}

/// Resolver answering `<strike><side>` tokens, with per-strike overrides.
#[derive(Debug, Default)]
pub struct StrikeResolver {
    missing: HashSet<i64>,
    failing: HashSet<i64>,
    calls: AtomicUsize,
}

impl StrikeResolver {
    pub fn with_missing(mut self, strike: i64) -> Self {
        self.missing.insert(strike);
        self
    }

    pub fn with_failing(mut self, strike: i64) -> Self {
        self.failing.insert(strike);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContractResolver for StrikeResolver {
    async fn resolve_token(&self, query: &ContractQuery) -> Result<Option<String>, ResolverError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(&query.strike) {
            return Err(ResolverError::Status(500));
        }
        if self.missing.contains(&query.strike) {
            return Ok(None);
        }
        Ok(Some(format!("{}{}", query.strike, query.side.as_str())))
    }
}

/// A fully wired pipeline over in-memory adapters.
pub struct Harness {
    pub ingestor: Arc<Ingestor>,
    pub store: InMemoryTickStore,
    pub broker: Arc<RecordingBroker>,
    pub resolver: Arc<StrikeResolver>,
    pub scheduler: Arc<ManualScheduler>,
}

impl Harness {
    pub fn new(batch_size: usize, strike_range: u32) -> Self {
        Self::with_resolver(batch_size, strike_range, StrikeResolver::default())
    }

    pub fn with_resolver(batch_size: usize, strike_range: u32, resolver: StrikeResolver) -> Self {
        let store = InMemoryTickStore::new();
        let broker = Arc::new(RecordingBroker::default());
        let resolver = Arc::new(resolver);
        let scheduler = Arc::new(ManualScheduler::new());
        let table = StrikeTable::default();

        let expander = Arc::new(SubscriptionExpander::new(
            Arc::clone(&resolver) as _,
            Arc::clone(&broker) as _,
            Arc::new(ActiveSubscriptionSet::new()),
            table.clone(),
            TopicScheme::default(),
            ExpanderSettings {
                strike_range,
                expiries: HashMap::from([
                    ("NIFTY".to_string(), "2025-07-31".to_string()),
                    ("BANKNIFTY".to_string(), "2025-07-31".to_string()),
                ]),
            },
        ));
        let writer = BatchWriter::new(
            BatchSettings {
                batch_size,
                batch_interval: Duration::from_secs(1),
                max_attempts: 3,
            },
            Arc::new(store.clone()),
            Arc::new(TopicCache::new(Arc::new(store.clone()))),
            Arc::clone(&scheduler) as _,
        );
        let ingestor = Arc::new(Ingestor::new(
            TopicScheme::default(),
            Arc::new(AtmTracker::new(table)),
            expander,
            writer,
        ));

        Self {
            ingestor,
            store,
            broker,
            resolver,
            scheduler,
        }
    }
}

/// Yield until `done` holds, failing after one second.
pub async fn eventually(done: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(1), async {
        while !done() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("condition not reached in time");
}
