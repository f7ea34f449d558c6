//! Reconnection Backoff
//!
//! Delay schedule between broker reconnection attempts.
//!
//! A `CONNACK` alone does not clear the failure count. The session only
//! counts as established once the broker has acknowledged a subscription or
//! delivered a publish, so a broker that accepts the handshake and drops the
//! link straight away keeps backing off and still hits the attempt limit.

use std::time::Duration;

use rand::Rng;

use crate::infrastructure::config::BrokerSettings;

/// Backoff parameters.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay.
    pub max_delay: Duration,
    /// Growth factor per attempt; values below 1 are treated as 1.
    pub multiplier: f64,
    /// Jitter as a fraction of the delay (0.1 = ±10%).
    pub jitter_factor: f64,
    /// Consecutive failures before giving up (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_factor: 0.1,
            max_attempts: 0,
        }
    }
}

impl ReconnectConfig {
    /// Backoff parameters from broker settings.
    #[must_use]
    pub const fn from_broker_settings(settings: &BrokerSettings) -> Self {
        Self {
            initial_delay: settings.reconnect_delay_initial,
            max_delay: settings.reconnect_delay_max,
            multiplier: settings.reconnect_delay_multiplier,
            jitter_factor: 0.1,
            max_attempts: settings.max_reconnect_attempts,
        }
    }

    /// Delay before the 1-based `attempt`, without jitter.
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.max(1.0).powi(exponent);
        // NaN and infinity both collapse onto the cap
        let capped = secs.min(self.max_delay.as_secs_f64());
        if capped.is_finite() && capped >= 0.0 {
            Duration::from_secs_f64(capped)
        } else {
            self.max_delay
        }
    }
}

/// Where the current session stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Link {
    Down,
    /// `CONNACK` received, no traffic yet.
    Handshaken,
    Established,
}

/// Next reconnection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retry {
    /// Consecutive failures, starting at 1.
    pub attempt: u32,
    /// Wait before polling again.
    pub delay: Duration,
}

/// Failure count and link state for one broker connection.
#[derive(Debug)]
pub struct Backoff {
    config: ReconnectConfig,
    failures: u32,
    link: Link,
}

impl Backoff {
    /// Start with the link down and no failures.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            failures: 0,
            link: Link::Down,
        }
    }

    /// The broker accepted the session.
    pub fn on_connack(&mut self) {
        if self.link == Link::Down {
            self.link = Link::Handshaken;
        }
    }

    /// A `SUBACK` or publish arrived; the session is usable.
    pub fn on_traffic(&mut self) {
        if self.link == Link::Handshaken {
            self.link = Link::Established;
            self.failures = 0;
        }
    }

    /// Record a failed poll.
    ///
    /// Returns `None` once `max_attempts` consecutive failures have been
    /// spent without an established session in between.
    pub fn on_failure(&mut self) -> Option<Retry> {
        self.link = Link::Down;
        if self.config.max_attempts != 0 && self.failures >= self.config.max_attempts {
            return None;
        }
        self.failures += 1;
        Some(Retry {
            attempt: self.failures,
            delay: self.jittered(self.config.base_delay(self.failures)),
        })
    }

    /// Consecutive failures so far.
    #[must_use]
    pub const fn failures(&self) -> u32 {
        self.failures
    }

    /// Whether the session has seen traffic since its `CONNACK`.
    #[must_use]
    pub fn is_established(&self) -> bool {
        self.link == Link::Established
    }

    fn jittered(&self, delay: Duration) -> Duration {
        let factor = self.config.jitter_factor;
        if factor <= 0.0 || delay.is_zero() {
            return delay;
        }
        let secs = delay.as_secs_f64();
        let spread = secs * factor;
        let adjusted = secs + rand::rng().random_range(-spread..=spread);
        Duration::from_secs_f64(adjusted.max(0.001))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter(initial_ms: u64, max_ms: u64, max_attempts: u32) -> ReconnectConfig {
        ReconnectConfig {
            initial_delay: Duration::from_millis(initial_ms),
            max_delay: Duration::from_millis(max_ms),
            multiplier: 2.0,
            jitter_factor: 0.0,
            max_attempts,
        }
    }

    #[test]
    fn delays_double_until_capped() {
        let mut backoff = Backoff::new(no_jitter(100, 500, 0));

        let delays: Vec<u128> = (0..5)
            .map(|_| backoff.on_failure().unwrap().delay.as_millis())
            .collect();

        assert_eq!(delays, vec![100, 200, 400, 500, 500]);
    }

    #[test]
    fn huge_attempt_numbers_stay_at_cap() {
        let config = no_jitter(100, 500, 0);
        assert_eq!(config.base_delay(u32::MAX), Duration::from_millis(500));
        assert_eq!(config.base_delay(0), Duration::from_millis(100));
    }

    #[test]
    fn attempts_are_bounded() {
        let mut backoff = Backoff::new(no_jitter(10, 100, 2));

        assert_eq!(backoff.on_failure().map(|r| r.attempt), Some(1));
        assert_eq!(backoff.on_failure().map(|r| r.attempt), Some(2));
        assert_eq!(backoff.on_failure(), None);
        assert_eq!(backoff.failures(), 2);
    }

    #[test]
    fn handshake_without_traffic_keeps_counting() {
        let mut backoff = Backoff::new(no_jitter(10, 100, 2));

        let _ = backoff.on_failure();
        backoff.on_connack();
        assert!(!backoff.is_established());
        let _ = backoff.on_failure();
        backoff.on_connack();

        assert_eq!(backoff.on_failure(), None);
    }

    #[test]
    fn established_session_resets_failures() {
        let mut backoff = Backoff::new(no_jitter(100, 10_000, 3));
        let _ = backoff.on_failure();
        let _ = backoff.on_failure();

        backoff.on_connack();
        backoff.on_traffic();

        assert!(backoff.is_established());
        assert_eq!(backoff.failures(), 0);
        assert_eq!(
            backoff.on_failure(),
            Some(Retry {
                attempt: 1,
                delay: Duration::from_millis(100),
            })
        );
    }

    #[test]
    fn traffic_before_connack_is_ignored() {
        let mut backoff = Backoff::new(no_jitter(10, 100, 0));
        let _ = backoff.on_failure();

        backoff.on_traffic();

        assert!(!backoff.is_established());
        assert_eq!(backoff.failures(), 1);
    }

    #[test]
    fn jitter_stays_within_factor() {
        for _ in 0..100 {
            let mut backoff = Backoff::new(ReconnectConfig {
                initial_delay: Duration::from_millis(1000),
                ..ReconnectConfig::default()
            });
            let millis = backoff.on_failure().unwrap().delay.as_millis();
            assert!((900..=1100).contains(&millis), "delay {millis}ms out of range");
        }
    }

    #[test]
    fn from_broker_settings_copies_backoff() {
        let settings = BrokerSettings {
            reconnect_delay_initial: Duration::from_millis(250),
            reconnect_delay_max: Duration::from_secs(8),
            max_reconnect_attempts: 7,
            ..BrokerSettings::default()
        };

        let config = ReconnectConfig::from_broker_settings(&settings);

        assert_eq!(config.initial_delay, Duration::from_millis(250));
        assert_eq!(config.max_delay, Duration::from_secs(8));
        assert_eq!(config.max_attempts, 7);
    }
}
