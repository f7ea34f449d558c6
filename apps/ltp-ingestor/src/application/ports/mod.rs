//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `BrokerClient`: Issues topic subscriptions at the pub/sub broker
//! - `ContractResolver`: Resolves option contracts to exchange tokens
//! - `TopicStore` / `TickStore`: Durable topic identities and tick rows
//! - `Scheduler`: Single-shot deferred actions (flush timer)

mod broker;
mod contract_resolver;
mod scheduler;
mod tick_store;

pub use broker::{BrokerClient, BrokerError};
pub use contract_resolver::{ContractQuery, ContractResolver, ResolverError};
pub use scheduler::{DeferredAction, ScheduledTask, Scheduler};
pub use tick_store::{NewTopic, StoreError, TickRow, TickStore, TickTransaction, TopicStore};

#[cfg(test)]
pub use broker::MockBrokerClient;
#[cfg(test)]
pub use contract_resolver::MockContractResolver;
