//! Broker Port (Driven Port)
//!
//! Interface for issuing subscriptions at the publish/subscribe broker.
//! Message delivery flows the other way, as events from the adapter.

use async_trait::async_trait;

/// Errors from broker operations.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// The subscribe request could not be queued or was rejected.
    #[error("subscribe to {topic} failed: {reason}")]
    Subscribe {
        /// Topic that failed.
        topic: String,
        /// Failure reason.
        reason: String,
    },
}

/// Subscription side of the broker client.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Subscribe to a topic.
    async fn subscribe(&self, topic: &str) -> Result<(), BrokerError>;
}
