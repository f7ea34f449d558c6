//! Ingest Pipeline
//!
//! Entry point for every delivered broker message.
//!
//! ```text
//! (topic, payload) -> decode -> route -> [index] ATM tracker -> spawn expansion
//!                                     -> observation -> batch writer
//! ```
//!
//! Handling a message never waits on I/O: expansion runs on its own task and
//! the writer only buffers or spawns its flush.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::task::JoinHandle;

use crate::application::services::{BatchWriter, ExpansionReport, SubscriptionExpander};
use crate::domain::atm::AtmTracker;
use crate::domain::observation::{Observation, TopicRoute, TopicScheme};
use crate::infrastructure::codec::TickCodec;
use crate::infrastructure::metrics;

/// Result of handling one message.
#[derive(Debug)]
pub enum MessageOutcome {
    /// Prices were decoded and handed to the writer.
    Accepted {
        /// Observations enqueued.
        observations: usize,
        /// Ladder expansion fired by this message.
        expansion: Option<JoinHandle<ExpansionReport>>,
    },
    /// No format produced a usable price.
    Undecodable,
    /// Topic matches neither the index nor the option format.
    Unroutable,
}

/// Message counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    /// Messages delivered.
    pub messages: u64,
    /// Observations produced.
    pub observations: u64,
    /// Payloads that failed to decode.
    pub decode_failures: u64,
    /// Messages on unrecognized topics.
    pub unroutable: u64,
    /// Ladder expansions fired.
    pub expansions: u64,
}

#[derive(Debug, Default)]
struct Counters {
    messages: AtomicU64,
    observations: AtomicU64,
    decode_failures: AtomicU64,
    unroutable: AtomicU64,
    expansions: AtomicU64,
}

/// Routes delivered messages through the pipeline.
#[derive(Debug)]
pub struct Ingestor {
    codec: TickCodec,
    scheme: TopicScheme,
    tracker: Arc<AtmTracker>,
    expander: Arc<SubscriptionExpander>,
    writer: Arc<BatchWriter>,
    counters: Counters,
}

impl Ingestor {
    /// Create an ingestor over shared pipeline components.
    #[must_use]
    pub fn new(
        scheme: TopicScheme,
        tracker: Arc<AtmTracker>,
        expander: Arc<SubscriptionExpander>,
        writer: Arc<BatchWriter>,
    ) -> Self {
        Self {
            codec: TickCodec::new(),
            scheme,
            tracker,
            expander,
            writer,
            counters: Counters::default(),
        }
    }

    /// Handle one delivered message.
    ///
    /// Must be called within a Tokio runtime.
    pub fn handle_message(&self, topic: &str, payload: &[u8]) -> MessageOutcome {
        self.counters.messages.fetch_add(1, Ordering::Relaxed);

        let decoded = match self.codec.decode(payload) {
            Ok(decoded) => decoded,
            Err(e) => {
                self.counters.decode_failures.fetch_add(1, Ordering::Relaxed);
                metrics::record_decode_failure();
                tracing::warn!(topic, bytes = payload.len(), error = %e, "Failed to decode payload");
                return MessageOutcome::Undecodable;
            }
        };
        metrics::record_message_received(decoded.format.as_str());

        let Some(route) = self.scheme.route(topic) else {
            self.counters.unroutable.fetch_add(1, Ordering::Relaxed);
            metrics::record_unroutable();
            tracing::warn!(topic, "Unrecognized topic format, skipping message");
            return MessageOutcome::Unroutable;
        };

        let observations = decoded.prices.len();
        let expansion = match route {
            TopicRoute::Index { name } => self.handle_index(topic, &name, decoded.prices),
            TopicRoute::Option { .. } => {
                let leg = self.expander.active().leg(topic);
                for price in decoded.prices {
                    self.writer
                        .enqueue(Observation::option(topic, price, leg.as_ref()));
                }
                None
            }
        };

        self.counters
            .observations
            .fetch_add(observations as u64, Ordering::Relaxed);
        MessageOutcome::Accepted {
            observations,
            expansion,
        }
    }

    fn handle_index(
        &self,
        topic: &str,
        index: &str,
        prices: Vec<f64>,
    ) -> Option<JoinHandle<ExpansionReport>> {
        let mut expansion = None;

        for price in prices {
            if let Some(atm_strike) = self.tracker.observe_index_price(index, price) {
                tracing::info!(index, ltp = price, atm_strike, "ATM strike computed");
                self.counters.expansions.fetch_add(1, Ordering::Relaxed);

                let expander = Arc::clone(&self.expander);
                let index = index.to_string();
                expansion = Some(tokio::spawn(async move {
                    expander.expand(&index, atm_strike).await
                }));
            }
            self.writer
                .enqueue(Observation::index(topic, index, price));
        }

        expansion
    }

    /// Subscribe the tick topics of the configured indices.
    pub async fn bootstrap(&self, indices: &[String]) -> usize {
        self.expander.subscribe_indices(indices).await
    }

    /// Re-issue active subscriptions after a reconnect.
    pub async fn resubscribe(&self) -> usize {
        self.expander.resubscribe_active().await
    }

    /// Message counters.
    #[must_use]
    pub fn stats(&self) -> IngestStats {
        IngestStats {
            messages: self.counters.messages.load(Ordering::Relaxed),
            observations: self.counters.observations.load(Ordering::Relaxed),
            decode_failures: self.counters.decode_failures.load(Ordering::Relaxed),
            unroutable: self.counters.unroutable.load(Ordering::Relaxed),
            expansions: self.counters.expansions.load(Ordering::Relaxed),
        }
    }

    /// ATM tracker shared with this ingestor.
    #[must_use]
    pub const fn tracker(&self) -> &Arc<AtmTracker> {
        &self.tracker
    }

    /// Batch writer shared with this ingestor.
    #[must_use]
    pub const fn writer(&self) -> &Arc<BatchWriter> {
        &self.writer
    }

    /// Subscription expander shared with this ingestor.
    #[must_use]
    pub const fn expander(&self) -> &Arc<SubscriptionExpander> {
        &self.expander
    }
}

// =============================================================================
// Tests
// =============================================================================
