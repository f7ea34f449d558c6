//! MQTT Adapter
//!
//! Broker connectivity over `rumqttc` with backoff-driven reconnection.

mod client;
pub mod reconnect;

pub use client::{
    BrokerEvent, MqttBrokerClient, MqttClientConfig, MqttClientError, MqttEventLoop, TLS_PORT,
};
pub use reconnect::{Backoff, ReconnectConfig, Retry};
