//! MQTT Broker Client
//!
//! Wraps a `rumqttc` client and event loop. The client half implements the
//! [`BrokerClient`] port; the event loop half is driven by [`MqttEventLoop::run`]
//! and forwards connection changes and deliveries as [`BrokerEvent`]s.
//!
//! # Connection Lifecycle
//!
//! ```text
//! CONNECTING --CONNACK--> CONNECTED --error--> DISCONNECTED
//!                                                 |
//!                                   backoff delay v
//!                                            RECONNECTING --poll--> CONNECTING
//! ```
//!
//! The backoff failure count only clears once a `SUBACK` or publish follows
//! the `CONNACK`.
//!
//! Subscriptions are not restored by the broker after a clean-session
//! reconnect. Consumers react to [`BrokerEvent::Connected`] and resubscribe.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, QoS,
    SubscribeReasonCode, Transport,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::reconnect::{Backoff, ReconnectConfig, Retry};
use crate::application::ports::{BrokerClient, BrokerError};
use crate::infrastructure::config::{BrokerSettings, MqttCredentials};
use crate::infrastructure::metrics;

/// Port that selects a TLS transport.
pub const TLS_PORT: u16 = 8883;

/// Capacity of the outgoing request queue.
const REQUEST_CAPACITY: usize = 1024;

// =============================================================================
// Configuration
// =============================================================================

/// Connection parameters for [`MqttBrokerClient`].
#[derive(Debug, Clone)]
pub struct MqttClientConfig {
    /// Broker host.
    pub host: String,
    /// Broker port.
    pub port: u16,
    /// Client id.
    pub client_id: String,
    /// Optional credentials.
    pub credentials: Option<MqttCredentials>,
    /// Keep-alive interval.
    pub keep_alive: Duration,
    /// Backoff between reconnection attempts.
    pub reconnect: ReconnectConfig,
    /// Capacity of the event channel handed to the consumer.
    pub event_buffer: usize,
}

impl MqttClientConfig {
    /// Build from broker settings.
    #[must_use]
    pub fn from_settings(settings: &BrokerSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
            client_id: settings.client_id.clone(),
            credentials: settings.credentials.clone(),
            keep_alive: settings.keep_alive,
            reconnect: ReconnectConfig::from_broker_settings(settings),
            event_buffer: settings.event_buffer.max(1),
        }
    }

    /// Whether the connection uses TLS.
    #[must_use]
    pub const fn use_tls(&self) -> bool {
        self.port == TLS_PORT
    }

    /// `rumqttc` options for this configuration.
    #[must_use]
    pub fn mqtt_options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options.set_keep_alive(self.keep_alive.max(Duration::from_secs(5)));
        options.set_clean_session(true);
        if let Some(credentials) = &self.credentials {
            options.set_credentials(credentials.username(), credentials.password());
        }
        if self.use_tls() {
            options.set_transport(Transport::tls_with_default_config());
        }
        options
    }
}

// =============================================================================
// Events
// =============================================================================

/// Events emitted by the event loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerEvent {
    /// Session established (first connect or reconnect).
    Connected,
    /// Connection lost.
    Disconnected,
    /// Waiting before a reconnection attempt.
    Reconnecting {
        /// Attempt number since the last successful connection.
        attempt: u32,
    },
    /// Message delivered on a subscribed topic.
    Message {
        /// Topic name.
        topic: String,
        /// Raw payload.
        payload: Vec<u8>,
    },
    /// Non-fatal error report.
    Error(String),
}

/// Event loop failure.
#[derive(Debug, thiserror::Error)]
pub enum MqttClientError {
    /// Gave up reconnecting.
    #[error("maximum reconnection attempts ({0}) exceeded: {1}")]
    MaxReconnectAttemptsExceeded(u32, String),
}

// =============================================================================
// Client
// =============================================================================

/// Broker client implementing [`BrokerClient`].
#[derive(Debug, Clone)]
pub struct MqttBrokerClient {
    client: AsyncClient,
}

impl MqttBrokerClient {
    /// Create a client and the event loop that must be run alongside it.
    #[must_use]
    pub fn new(
        config: &MqttClientConfig,
        event_tx: mpsc::Sender<BrokerEvent>,
        cancel: CancellationToken,
    ) -> (Arc<Self>, MqttEventLoop) {
        let (client, eventloop) = AsyncClient::new(config.mqtt_options(), REQUEST_CAPACITY);

        tracing::info!(
            host = %config.host,
            port = config.port,
            client_id = %config.client_id,
            tls = config.use_tls(),
            "MQTT client created"
        );

        let event_loop = MqttEventLoop {
            eventloop,
            event_tx,
            cancel,
            backoff: Backoff::new(config.reconnect.clone()),
            max_attempts: config.reconnect.max_attempts,
        };
        (Arc::new(Self { client }), event_loop)
    }

    /// Send a DISCONNECT; the event loop ends once the broker closes.
    pub async fn disconnect(&self) {
        if let Err(e) = self.client.disconnect().await {
            tracing::debug!(error = %e, "MQTT disconnect request failed");
        }
    }
}

#[async_trait]
impl BrokerClient for MqttBrokerClient {
    async fn subscribe(&self, topic: &str) -> Result<(), BrokerError> {
        self.client
            .subscribe(topic, QoS::AtMostOnce)
            .await
            .map_err(|e| BrokerError::Subscribe {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }
}

// =============================================================================
// Event Loop
// =============================================================================

/// Drives the MQTT connection and forwards events.
pub struct MqttEventLoop {
    eventloop: EventLoop,
    event_tx: mpsc::Sender<BrokerEvent>,
    cancel: CancellationToken,
    backoff: Backoff,
    max_attempts: u32,
}

impl std::fmt::Debug for MqttEventLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttEventLoop")
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}

impl MqttEventLoop {
    /// Poll the connection until cancelled or reconnection gives up.
    ///
    /// # Errors
    ///
    /// Returns [`MqttClientError::MaxReconnectAttemptsExceeded`] when the
    /// backoff policy is exhausted.
    pub async fn run(mut self) -> Result<(), MqttClientError> {
        let mut connected = false;

        loop {
            let polled = tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::info!("MQTT event loop cancelled");
                    return Ok(());
                }
                polled = self.eventloop.poll() => polled,
            };

            match polled {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code == ConnectReturnCode::Success {
                        tracing::info!("Connected to MQTT broker");
                        connected = true;
                        self.backoff.on_connack();
                        emit(&self.event_tx, BrokerEvent::Connected).await;
                    } else {
                        tracing::warn!(code = ?ack.code, "MQTT broker refused connection");
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    self.backoff.on_traffic();
                    emit(
                        &self.event_tx,
                        BrokerEvent::Message {
                            topic: publish.topic,
                            payload: publish.payload.to_vec(),
                        },
                    )
                    .await;
                }
                Ok(Event::Incoming(Packet::SubAck(ack))) => {
                    self.backoff.on_traffic();
                    let rejected = ack
                        .return_codes
                        .iter()
                        .filter(|code| matches!(code, SubscribeReasonCode::Failure))
                        .count();
                    if rejected > 0 {
                        tracing::warn!(pkid = ack.pkid, rejected, "Broker rejected subscription");
                        metrics::record_broker_error("suback_failure");
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    let reason = e.to_string();
                    metrics::record_broker_error("connection");
                    if connected {
                        connected = false;
                        tracing::warn!(error = %reason, "MQTT connection lost");
                        emit(&self.event_tx, BrokerEvent::Disconnected).await;
                    } else {
                        tracing::warn!(error = %reason, "MQTT connection attempt failed");
                    }
                    emit(&self.event_tx, BrokerEvent::Error(reason.clone())).await;

                    let Some(Retry { attempt, delay }) = self.backoff.on_failure() else {
                        tracing::error!(
                            attempts = self.backoff.failures(),
                            "Giving up reconnecting to MQTT broker"
                        );
                        return Err(MqttClientError::MaxReconnectAttemptsExceeded(
                            self.max_attempts,
                            reason,
                        ));
                    };

                    metrics::record_reconnect();
                    tracing::info!(attempt, delay_ms = delay.as_millis(), "Reconnecting to MQTT broker");
                    emit(&self.event_tx, BrokerEvent::Reconnecting { attempt }).await;

                    tokio::select! {
                        () = self.cancel.cancelled() => {
                            tracing::info!("MQTT event loop cancelled during backoff");
                            return Ok(());
                        }
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }
}

/// Forward an event; a closed channel means the consumer is gone.
///
/// Borrows only the sender so the `run` future stays `Send`.
async fn emit(tx: &mpsc::Sender<BrokerEvent>, event: BrokerEvent) {
    let _ = tx.send(event).await;
}

// =============================================================================
// Tests
// =============================================================================
