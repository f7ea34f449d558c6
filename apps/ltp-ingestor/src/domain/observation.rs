//! Observation Types
//!
//! A price observation is the unit flowing from the decoder to the batch
//! writer. Topic routing decides whether a delivered topic carries an index
//! or an option contract.
//!
//! # Topic Formats
//!
//! ```text
//! index/NIFTY        -> index route, name "NIFTY"
//! NSE_FO|43210       -> option route, token "43210"
//! ```

use serde::Serialize;

use super::subscription::LegInfo;

// =============================================================================
// Types
// =============================================================================

/// Durable numeric identifier of a topic row.
pub type TopicId = i64;

/// Option strike price. Strike steps are whole numbers for every listed index.
pub type Strike = i64;

/// Kind of instrument a topic carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InstrumentKind {
    /// Market index (underlying).
    Index,
    /// Option contract on an index.
    Option,
}

impl InstrumentKind {
    /// Name persisted in the `type` column.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Index => "index",
            Self::Option => "option",
        }
    }
}

/// Option side of a leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum OptionSide {
    /// Call option.
    Call,
    /// Put option.
    Put,
}

impl OptionSide {
    /// Both sides, calls first.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::Call, Self::Put]
    }

    /// Wire name used by the contract resolver.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Call => "ce",
            Self::Put => "pe",
        }
    }
}

// =============================================================================
// Observation
// =============================================================================

/// A single observed last traded price.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Observation {
    /// Topic the price was delivered on (unique topic name).
    pub topic: String,
    /// Last traded price.
    pub price: f64,
    /// Index name, for index topics and known option legs.
    pub index_name: Option<String>,
    /// Instrument kind.
    pub kind: InstrumentKind,
    /// Strike, for known option legs.
    pub strike: Option<Strike>,
}

impl Observation {
    /// Observation for an index topic.
    #[must_use]
    pub fn index(topic: impl Into<String>, index_name: impl Into<String>, price: f64) -> Self {
        Self {
            topic: topic.into(),
            price,
            index_name: Some(index_name.into()),
            kind: InstrumentKind::Index,
            strike: None,
        }
    }

    /// Observation for an option topic, enriched with leg metadata when the
    /// topic was subscribed by the expander.
    #[must_use]
    pub fn option(topic: impl Into<String>, price: f64, leg: Option<&LegInfo>) -> Self {
        Self {
            topic: topic.into(),
            price,
            index_name: leg.map(|l| l.index.clone()),
            kind: InstrumentKind::Option,
            strike: leg.map(|l| l.strike),
        }
    }
}

// =============================================================================
// Topic Routing
// =============================================================================

/// Where a delivered topic should be routed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicRoute {
    /// Index tick; `name` is upper-cased.
    Index {
        /// Index name.
        name: String,
    },
    /// Option tick identified by its exchange token.
    Option {
        /// Exchange instrument token.
        token: String,
    },
}

/// Naming convention for broker topics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicScheme {
    index_prefix: String,
    option_prefix: String,
}

impl Default for TopicScheme {
    fn default() -> Self {
        Self::new("index", "NSE_FO")
    }
}

impl TopicScheme {
    /// Create a scheme from the index and option prefixes.
    #[must_use]
    pub fn new(index_prefix: impl Into<String>, option_prefix: impl Into<String>) -> Self {
        Self {
            index_prefix: index_prefix.into(),
            option_prefix: option_prefix.into(),
        }
    }

    /// Topic carrying ticks for an index.
    #[must_use]
    pub fn index_topic(&self, index: &str) -> String {
        format!("{}/{}", self.index_prefix, index)
    }

    /// Topic carrying ticks for an option token.
    #[must_use]
    pub fn option_topic(&self, token: &str) -> String {
        format!("{}|{}", self.option_prefix, token)
    }

    /// Classify a delivered topic.
    ///
    /// Returns `None` for topics matching neither format.
    #[must_use]
    pub fn route(&self, topic: &str) -> Option<TopicRoute> {
        if let Some(rest) = topic
            .strip_prefix(self.index_prefix.as_str())
            .and_then(|r| r.strip_prefix('/'))
        {
            let name = rest.split('/').next().unwrap_or_default();
            if name.is_empty() {
                return None;
            }
            return Some(TopicRoute::Index {
                name: name.to_uppercase(),
            });
        }

        // Option ticks may come from any exchange segment, not just the one
        // used to build subscription topics.
        let (exchange, token) = topic.split_once('|')?;
        if exchange.is_empty() || token.is_empty() {
            return None;
        }
        Some(TopicRoute::Option {
            token: token.to_string(),
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
