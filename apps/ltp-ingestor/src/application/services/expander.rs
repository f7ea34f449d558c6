//! Subscription Expander
//!
//! Subscribes the option ladder around an ATM strike and the index topics
//! the pipeline bootstraps from.
//!
//! Each leg of the ladder is one strike on one side. A leg is resolved to an
//! exchange token, mapped to its tick topic, claimed in the active set and
//! only then subscribed. Legs run concurrently; a leg that cannot be resolved
//! or subscribed is skipped without affecting the others.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;

use crate::application::ports::{BrokerClient, ContractQuery, ContractResolver};
use crate::domain::atm::StrikeTable;
use crate::domain::observation::{OptionSide, Strike, TopicScheme};
use crate::domain::subscription::{ActiveSubscriptionSet, LegInfo, SubscriptionOrigin};
use crate::infrastructure::metrics;

/// Ladder width and per-index contract expiry.
#[derive(Debug, Clone, Default)]
pub struct ExpanderSettings {
    /// Strikes on each side of the ATM strike.
    pub strike_range: u32,
    /// Expiry date per upper-cased index name.
    pub expiries: HashMap<String, String>,
}

impl ExpanderSettings {
    /// Expiry date configured for an index.
    #[must_use]
    pub fn expiry(&self, index: &str) -> Option<&str> {
        self.expiries.get(&index.to_uppercase()).map(String::as_str)
    }
}

/// What happened to one leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegOutcome {
    /// Topic newly subscribed.
    Subscribed,
    /// Topic already active; nothing sent to the broker.
    AlreadyActive,
    /// Resolver has no such contract, or no expiry is configured.
    Unresolved,
    /// Resolver call failed.
    LookupFailed,
    /// Broker rejected the subscribe; the claim was released.
    SubscribeFailed,
}

impl LegOutcome {
    /// Metric label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Subscribed => "subscribed",
            Self::AlreadyActive => "already_active",
            Self::Unresolved => "unresolved",
            Self::LookupFailed => "lookup_failed",
            Self::SubscribeFailed => "subscribe_failed",
        }
    }
}

/// Summary of one ladder expansion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExpansionReport {
    /// Index expanded.
    pub index: String,
    /// Centre strike.
    pub atm_strike: Strike,
    /// Legs attempted (`2 * (2R + 1)`).
    pub legs: usize,
    /// Legs newly subscribed.
    pub subscribed: usize,
    /// Legs whose topic was already active.
    pub already_active: usize,
    /// Legs with no token.
    pub unresolved: usize,
    /// Legs whose lookup or subscribe failed.
    pub failed: usize,
}

impl ExpansionReport {
    fn record(&mut self, outcome: LegOutcome) {
        match outcome {
            LegOutcome::Subscribed => self.subscribed += 1,
            LegOutcome::AlreadyActive => self.already_active += 1,
            LegOutcome::Unresolved => self.unresolved += 1,
            LegOutcome::LookupFailed | LegOutcome::SubscribeFailed => self.failed += 1,
        }
    }
}

/// Resolves and subscribes option legs and index topics.
pub struct SubscriptionExpander {
    resolver: Arc<dyn ContractResolver>,
    broker: Arc<dyn BrokerClient>,
    active: Arc<ActiveSubscriptionSet>,
    table: StrikeTable,
    scheme: TopicScheme,
    settings: ExpanderSettings,
}

impl std::fmt::Debug for SubscriptionExpander {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionExpander")
            .field("scheme", &self.scheme)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl SubscriptionExpander {
    /// Create an expander.
    #[must_use]
    pub fn new(
        resolver: Arc<dyn ContractResolver>,
        broker: Arc<dyn BrokerClient>,
        active: Arc<ActiveSubscriptionSet>,
        table: StrikeTable,
        scheme: TopicScheme,
        settings: ExpanderSettings,
    ) -> Self {
        Self {
            resolver,
            broker,
            active,
            table,
            scheme,
            settings,
        }
    }

    /// Active subscription set shared with the pipeline.
    #[must_use]
    pub fn active(&self) -> &Arc<ActiveSubscriptionSet> {
        &self.active
    }

    /// Subscribe the call and put legs of every strike in the ladder
    /// centred on `atm_strike`.
    pub async fn expand(&self, index: &str, atm_strike: Strike) -> ExpansionReport {
        let strikes = self
            .table
            .ladder(index, atm_strike, self.settings.strike_range);
        let legs: Vec<LegInfo> = strikes
            .iter()
            .flat_map(|&strike| {
                OptionSide::all().iter().map(move |&side| LegInfo {
                    index: index.to_string(),
                    strike,
                    side,
                })
            })
            .collect();

        let mut report = ExpansionReport {
            index: index.to_string(),
            atm_strike,
            legs: legs.len(),
            ..ExpansionReport::default()
        };

        let Some(expiry) = self.settings.expiry(index) else {
            tracing::warn!(index, "No expiry configured, skipping option ladder");
            report.unresolved = legs.len();
            metrics::record_legs(LegOutcome::Unresolved.as_str(), legs.len());
            return report;
        };

        tracing::info!(
            index,
            atm_strike,
            expiry,
            strikes = strikes.len(),
            "Expanding option ladder"
        );

        let outcomes = join_all(legs.into_iter().map(|leg| self.subscribe_leg(leg, expiry))).await;
        for outcome in outcomes {
            metrics::record_legs(outcome.as_str(), 1);
            report.record(outcome);
        }

        self.publish_gauges();
        tracing::info!(
            index,
            atm_strike,
            subscribed = report.subscribed,
            already_active = report.already_active,
            unresolved = report.unresolved,
            failed = report.failed,
            "Option ladder expanded"
        );
        report
    }

    async fn subscribe_leg(&self, leg: LegInfo, expiry: &str) -> LegOutcome {
        let query = ContractQuery {
            index: leg.index.clone(),
            expiry_date: expiry.to_string(),
            side: leg.side,
            strike: leg.strike,
        };

        let token = match self.resolver.resolve_token(&query).await {
            Ok(Some(token)) => token,
            Ok(None) => {
                tracing::debug!(index = %leg.index, strike = leg.strike, side = leg.side.as_str(), "No contract for leg");
                return LegOutcome::Unresolved;
            }
            Err(e) => {
                tracing::warn!(
                    index = %leg.index,
                    strike = leg.strike,
                    side = leg.side.as_str(),
                    error = %e,
                    "Token lookup failed, skipping leg"
                );
                return LegOutcome::LookupFailed;
            }
        };

        let topic = self.scheme.option_topic(&token);
        if !self
            .active
            .claim(&topic, SubscriptionOrigin::OptionLeg(leg))
        {
            return LegOutcome::AlreadyActive;
        }

        match self.broker.subscribe(&topic).await {
            Ok(()) => {
                tracing::debug!(topic = %topic, "Subscribed option leg");
                LegOutcome::Subscribed
            }
            Err(e) => {
                self.active.release(&topic);
                tracing::warn!(topic = %topic, error = %e, "Subscribe failed, leg released");
                LegOutcome::SubscribeFailed
            }
        }
    }

    /// Subscribe the tick topic of each index. Returns the number newly subscribed.
    pub async fn subscribe_indices(&self, indices: &[String]) -> usize {
        let mut subscribed = 0;
        for index in indices {
            let name = index.to_uppercase();
            let topic = self.scheme.index_topic(&name);
            if !self
                .active
                .claim(&topic, SubscriptionOrigin::Index(name.clone()))
            {
                continue;
            }

            match self.broker.subscribe(&topic).await {
                Ok(()) => {
                    tracing::info!(index = %name, topic = %topic, "Subscribed index topic");
                    subscribed += 1;
                }
                Err(e) => {
                    self.active.release(&topic);
                    tracing::error!(index = %name, topic = %topic, error = %e, "Index subscribe failed");
                }
            }
        }
        self.publish_gauges();
        subscribed
    }

    /// Re-issue every active subscription, e.g. after a clean-session reconnect.
    ///
    /// Topics stay in the active set even if the re-issue fails; the next
    /// reconnect retries them. Returns the number re-issued successfully.
    pub async fn resubscribe_active(&self) -> usize {
        let topics = self.active.topics();
        let total = topics.len();
        let mut ok = 0;
        for topic in topics {
            match self.broker.subscribe(&topic).await {
                Ok(()) => ok += 1,
                Err(e) => tracing::warn!(topic = %topic, error = %e, "Resubscribe failed"),
            }
        }
        tracing::info!(resubscribed = ok, total, "Active subscriptions re-issued");
        ok
    }

    fn publish_gauges(&self) {
        let stats = self.active.stats();
        metrics::set_active_subscriptions(stats.index_topics, stats.option_topics);
    }
}

// =============================================================================
// Tests
// =============================================================================
