//! Contract Resolver Port (Driven Port)
//!
//! Interface for resolving an option contract to the exchange token that
//! names its tick topic.

use async_trait::async_trait;
use serde::Serialize;

use crate::domain::observation::{OptionSide, Strike};

/// Option contract to resolve.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ContractQuery {
    /// Underlying index (e.g., "NIFTY").
    pub index: String,
    /// Expiry date as configured for the index (e.g., "2025-07-31").
    pub expiry_date: String,
    /// Call or put.
    pub side: OptionSide,
    /// Strike price.
    pub strike: Strike,
}

/// Errors from token resolution.
#[derive(Debug, thiserror::Error)]
pub enum ResolverError {
    /// Transport-level failure (connect, timeout, TLS).
    #[error("resolver request failed: {0}")]
    Http(String),

    /// Resolver answered with a non-success status.
    #[error("resolver returned status {0}")]
    Status(u16),

    /// Response body could not be interpreted.
    #[error("invalid resolver response: {0}")]
    InvalidResponse(String),
}

/// Resolves option contracts to exchange tokens.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContractResolver: Send + Sync {
    /// Resolve a contract.
    ///
    /// Returns `Ok(None)` when the resolver explicitly has no such contract.
    async fn resolve_token(&self, query: &ContractQuery) -> Result<Option<String>, ResolverError>;
}
