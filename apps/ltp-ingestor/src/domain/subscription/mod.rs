//! Active Subscription Tracking
//!
//! Domain type for tracking which broker topics are currently subscribed.
//!
//! # Design
//!
//! The active set tracks:
//! - Which topics have been subscribed at the broker
//! - Why each topic was subscribed (index bootstrap or an option leg)
//! - Leg metadata used to enrich option observations
//!
//! Claiming a topic is a single check-then-insert under the write lock, so two
//! legs resolving to the same token can never both issue a subscribe.

use std::collections::HashMap;

use parking_lot::RwLock;

use super::observation::{OptionSide, Strike};

// =============================================================================
// Types
// =============================================================================

/// A broker topic string.
pub type Topic = String;

/// One call-or-put contract at one strike.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LegInfo {
    /// Underlying index name.
    pub index: String,
    /// Strike price.
    pub strike: Strike,
    /// Call or put.
    pub side: OptionSide,
}

/// Why a topic was subscribed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionOrigin {
    /// Index tick topic subscribed at startup.
    Index(String),
    /// Option leg subscribed by ladder expansion.
    OptionLeg(LegInfo),
}

// =============================================================================
// Active Subscription Set
// =============================================================================

/// Deduplicated set of topics subscribed at the broker.
///
/// # Example
///
/// ```rust
/// use ltp_ingestor::domain::subscription::{ActiveSubscriptionSet, SubscriptionOrigin};
///
/// let active = ActiveSubscriptionSet::new();
///
/// // First claim wins and must be followed by a broker subscribe
/// assert!(active.claim("index/NIFTY", SubscriptionOrigin::Index("NIFTY".to_string())));
///
/// // Second claim for the same topic is a no-op
/// assert!(!active.claim("index/NIFTY", SubscriptionOrigin::Index("NIFTY".to_string())));
/// assert_eq!(active.len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct ActiveSubscriptionSet {
    topics: RwLock<HashMap<Topic, SubscriptionOrigin>>,
}

impl ActiveSubscriptionSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a topic if it is not already active.
    ///
    /// Returns `true` when the caller now owns the subscribe call for the topic.
    pub fn claim(&self, topic: &str, origin: SubscriptionOrigin) -> bool {
        let mut topics = self.topics.write();
        if topics.contains_key(topic) {
            return false;
        }
        topics.insert(topic.to_string(), origin);
        true
    }

    /// Remove a topic, e.g. after its subscribe call failed.
    ///
    /// Returns `true` if the topic was active.
    pub fn release(&self, topic: &str) -> bool {
        self.topics.write().remove(topic).is_some()
    }

    /// Check whether a topic is active.
    #[must_use]
    pub fn contains(&self, topic: &str) -> bool {
        self.topics.read().contains_key(topic)
    }

    /// Leg metadata for an option topic subscribed by expansion.
    #[must_use]
    pub fn leg(&self, topic: &str) -> Option<LegInfo> {
        match self.topics.read().get(topic) {
            Some(SubscriptionOrigin::OptionLeg(leg)) => Some(leg.clone()),
            _ => None,
        }
    }

    /// All active topics.
    #[must_use]
    pub fn topics(&self) -> Vec<Topic> {
        self.topics.read().keys().cloned().collect()
    }

    /// Number of active topics.
    #[must_use]
    pub fn len(&self) -> usize {
        self.topics.read().len()
    }

    /// Check if no topic is active.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.topics.read().is_empty()
    }

    /// Get subscription statistics.
    #[must_use]
    pub fn stats(&self) -> SubscriptionStats {
        let topics = self.topics.read();
        let index_topics = topics
            .values()
            .filter(|o| matches!(o, SubscriptionOrigin::Index(_)))
            .count();

        SubscriptionStats {
            index_topics,
            option_topics: topics.len() - index_topics,
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Counts of active topics by origin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct SubscriptionStats {
    /// Index tick topics.
    pub index_topics: usize,
    /// Option leg topics.
    pub option_topics: usize,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn leg(strike: Strike, side: OptionSide) -> SubscriptionOrigin {
        SubscriptionOrigin::OptionLeg(LegInfo {
            index: "NIFTY".to_string(),
            strike,
            side,
        })
    }

    #[test]
    fn claim_new_topic() {
        let active = ActiveSubscriptionSet::new();

        assert!(active.claim("NSE_FO|1", leg(25_000, OptionSide::Call)));
        assert!(active.contains("NSE_FO|1"));
        assert_eq!(active.len(), 1);
    }

    #[test]
    fn claim_existing_topic_is_rejected() {
        let active = ActiveSubscriptionSet::new();

        active.claim("NSE_FO|1", leg(25_000, OptionSide::Call));
        assert!(!active.claim("NSE_FO|1", leg(25_050, OptionSide::Put)));

        assert_eq!(active.len(), 1);
        // First claim's metadata is kept
        assert_eq!(active.leg("NSE_FO|1").unwrap().strike, 25_000);
    }

    #[test]
    fn release_allows_reclaim() {
        let active = ActiveSubscriptionSet::new();

        active.claim("NSE_FO|1", leg(25_000, OptionSide::Call));
        assert!(active.release("NSE_FO|1"));
        assert!(!active.release("NSE_FO|1"));
        assert!(active.is_empty());
        assert!(active.claim("NSE_FO|1", leg(25_000, OptionSide::Call)));
    }

    #[test]
    fn leg_is_none_for_index_topics() {
        let active = ActiveSubscriptionSet::new();

        active.claim("index/NIFTY", SubscriptionOrigin::Index("NIFTY".to_string()));

        assert!(active.leg("index/NIFTY").is_none());
        assert!(active.leg("unknown").is_none());
    }

    #[test]
    fn stats_split_by_origin() {
        let active = ActiveSubscriptionSet::new();

        active.claim("index/NIFTY", SubscriptionOrigin::Index("NIFTY".to_string()));
        active.claim("NSE_FO|1", leg(25_000, OptionSide::Call));
        active.claim("NSE_FO|2", leg(25_000, OptionSide::Put));

        let stats = active.stats();
        assert_eq!(stats.index_topics, 1);
        assert_eq!(stats.option_topics, 2);

        let mut topics = active.topics();
        topics.sort();
        assert_eq!(topics, vec!["NSE_FO|1", "NSE_FO|2", "index/NIFTY"]);
    }

    #[test]
    fn thread_safety_concurrent_claims() {
        use std::sync::Arc;
        use std::thread;

        let active = Arc::new(ActiveSubscriptionSet::new());
        let mut handles = vec![];

        // Spawn 10 threads that each claim a unique topic and a shared one
        for i in 0..10 {
            let a = Arc::clone(&active);
            handles.push(thread::spawn(move || {
                let own = a.claim(&format!("NSE_FO|{i}"), leg(25_000, OptionSide::Call));
                let shared = a.claim("NSE_FO|SHARED", leg(25_000, OptionSide::Put));
                (own, shared)
            }));
        }

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert!(results.iter().all(|(own, _)| *own));
        assert_eq!(results.iter().filter(|(_, shared)| *shared).count(), 1);
        assert_eq!(active.len(), 11);
    }
}
