//! Reconnection with exponential backoff
//!
//! The first attempt of a cycle runs immediately; retry `n` waits
//! `initial_delay * multiplier^(n-1)`, capped at `max_delay`, with optional ±25% jitter.

use crate::config::ReconnectConfig;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ReconnectError {
    #[error("Maximum reconnection attempts ({0}) exceeded")]
    Exhausted(u32),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Consecutive failed attempts before giving up (0 means unlimited)
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from(&ReconnectConfig::default())
    }
}

impl From<&ReconnectConfig> for ReconnectPolicy {
    fn from(cfg: &ReconnectConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts,
            initial_delay: Duration::from_millis(cfg.initial_delay_ms),
            max_delay: Duration::from_millis(cfg.max_delay_ms),
            backoff_multiplier: cfg.backoff_multiplier,
            jitter: cfg.jitter,
        }
    }
}

impl ReconnectPolicy {
    /// Only one attempt, no retries
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconnectStats {
    pub total_attempts: u64,
    pub successful_reconnects: u64,
    pub failed_reconnects: u64,
    pub last_connected: Option<Instant>,
}

/// Attempt counter and backoff schedule for one connection
#[derive(Debug)]
pub struct ReconnectHelper {
    policy: ReconnectPolicy,
    /// Failed attempts in the current cycle
    attempt: u32,
    stats: ReconnectStats,
}

impl ReconnectHelper {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            attempt: 0,
            stats: ReconnectStats::default(),
        }
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    pub fn stats(&self) -> &ReconnectStats {
        &self.stats
    }

    pub fn current_attempt(&self) -> u32 {
        self.attempt
    }

    pub fn is_exhausted(&self) -> bool {
        self.policy.max_attempts > 0 && self.attempt >= self.policy.max_attempts
    }

    /// Delay before retry `retry` (1-based)
    pub fn retry_delay(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = self.policy.backoff_multiplier.powi(exponent).max(1.0);
        let max_ms = self.policy.max_delay.as_millis() as f64;
        let ms = self.policy.initial_delay.as_millis() as f64 * factor;
        let mut delay = if ms.is_finite() && ms < max_ms {
            Duration::from_millis(ms.round() as u64)
        } else {
            self.policy.max_delay
        };

        if self.policy.jitter {
            let jitter_range = delay.as_millis() as f64 * 0.25;
            if jitter_range > 0.0 {
                let jitter = rand::thread_rng().gen_range(-jitter_range..jitter_range);
                let delay_ms = (delay.as_millis() as f64 + jitter).max(0.0);
                delay = Duration::from_millis(delay_ms as u64);
            }
        }
        delay
    }

    /// Start a new cycle after a successful connection was lost
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Run one attempt, sleeping the backoff delay first when this is a retry
    pub async fn attempt<F, Fut, E>(&mut self, connect_fn: F) -> Result<(), ReconnectError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: std::fmt::Display,
    {
        if self.is_exhausted() {
            warn!(
                "Maximum reconnection attempts ({}) exceeded",
                self.policy.max_attempts
            );
            return Err(ReconnectError::Exhausted(self.policy.max_attempts));
        }

        if self.attempt > 0 {
            let delay = self.retry_delay(self.attempt);
            debug!("Waiting {:?} before connection attempt {}", delay, self.attempt + 1);
            tokio::time::sleep(delay).await;
        }

        self.stats.total_attempts += 1;
        let start = Instant::now();

        match connect_fn().await {
            Ok(()) => {
                info!(
                    "Connection established after {:?} (attempt {})",
                    start.elapsed(),
                    self.attempt + 1
                );
                if self.stats.last_connected.is_some() {
                    self.stats.successful_reconnects += 1;
                }
                self.stats.last_connected = Some(Instant::now());
                self.attempt = 0;
                Ok(())
            },
            Err(e) => {
                self.attempt += 1;
                self.stats.failed_reconnects += 1;
                warn!("Connection attempt {} failed: {}", self.attempt, e);
                Err(ReconnectError::ConnectionFailed(e.to_string()))
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use tracing_test::traced_test;

    fn policy(max_attempts: u32) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    #[test]
    fn test_exponential_backoff() {
        let helper = ReconnectHelper::new(policy(10));
        assert_eq!(helper.retry_delay(1), Duration::from_millis(100));
        assert_eq!(helper.retry_delay(2), Duration::from_millis(200));
        assert_eq!(helper.retry_delay(3), Duration::from_millis(400));
        assert_eq!(helper.retry_delay(4), Duration::from_millis(800));
        // Capped
        assert_eq!(helper.retry_delay(5), Duration::from_secs(1));
        assert_eq!(helper.retry_delay(40), Duration::from_secs(1));
    }

    #[test]
    fn test_jitter_stays_within_quarter() {
        let helper = ReconnectHelper::new(ReconnectPolicy {
            jitter: true,
            ..policy(10)
        });
        for _ in 0..100 {
            let d = helper.retry_delay(2).as_millis();
            assert!((150..=250).contains(&d), "{d}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_waits_backoff() {
        let mut helper = ReconnectHelper::new(policy(5));
        let start = Instant::now();

        assert!(helper.attempt(|| async { Err::<(), _>("refused") }).await.is_err());
        assert!(start.elapsed() < Duration::from_millis(5));

        assert!(helper.attempt(|| async { Err::<(), _>("refused") }).await.is_err());
        let after_first_retry = start.elapsed();
        assert!(after_first_retry >= Duration::from_millis(100));
        assert!(after_first_retry < Duration::from_millis(110));

        assert!(helper.attempt(|| async { Ok::<(), &str>(()) }).await.is_ok());
        assert!(start.elapsed() >= Duration::from_millis(300));
        assert!(start.elapsed() < Duration::from_millis(320));
        assert_eq!(helper.current_attempt(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_attempts() {
        let mut helper = ReconnectHelper::new(policy(2));
        let fail = || async { Err::<(), _>("refused") };

        assert!(helper.attempt(fail).await.is_err());
        assert!(helper.attempt(fail).await.is_err());
        assert!(helper.is_exhausted());
        assert_eq!(
            helper.attempt(fail).await,
            Err(ReconnectError::Exhausted(2))
        );
        assert_eq!(helper.stats().total_attempts, 2);
        assert_eq!(helper.stats().failed_reconnects, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unlimited_attempts() {
        let mut helper = ReconnectHelper::new(policy(0));
        for _ in 0..20 {
            assert!(helper.attempt(|| async { Err::<(), _>("down") }).await.is_err());
        }
        assert!(!helper.is_exhausted());
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn test_successful_reconnect_counts_and_logs() {
        let mut helper = ReconnectHelper::new(policy(3));
        helper.attempt(|| async { Ok::<(), &str>(()) }).await.unwrap();
        assert_eq!(helper.stats().successful_reconnects, 0);

        helper.reset();
        helper.attempt(|| async { Err::<(), _>("reset by peer") }).await.unwrap_err();
        helper.attempt(|| async { Ok::<(), &str>(()) }).await.unwrap();

        assert_eq!(helper.stats().successful_reconnects, 1);
        assert_eq!(helper.stats().total_attempts, 3);
        assert!(logs_contain("Connection attempt 1 failed: reset by peer"));
        assert!(logs_contain("Connection established"));
    }
}
