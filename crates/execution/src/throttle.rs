//! Outbound call pacing for the broker API.
//!
//! Every call waits for a minimum spacing since the previous one. Throttled
//! responses are retried with exponential backoff plus jitter; after
//! `max_retries` the call fails upward.

use std::future::Future;
use std::num::NonZeroU32;
use std::time::Duration;

use governor::{
    clock::DefaultClock,
    middleware::NoOpMiddleware,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use rand::Rng;
use tracing::{error, warn};

use algo_options_core::error::Result;
use algo_options_core::{BrokerConfig, ExecutionError};

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>;

#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    pub min_spacing: Duration,
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub max_jitter: Duration,
}

impl From<&BrokerConfig> for ThrottleConfig {
    fn from(config: &BrokerConfig) -> Self {
        Self {
            min_spacing: Duration::from_millis(config.min_call_spacing_ms),
            max_retries: config.max_retries,
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            max_jitter: Duration::from_millis(config.max_jitter_ms),
        }
    }
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self::from(&BrokerConfig::default())
    }
}

pub struct Throttle {
    limiter: Option<DirectLimiter>,
    config: ThrottleConfig,
}

impl Throttle {
    #[must_use]
    pub fn new(config: ThrottleConfig) -> Self {
        let limiter = Quota::with_period(config.min_spacing)
            .map(|q| RateLimiter::direct(q.allow_burst(NonZeroU32::MIN)));
        Self { limiter, config }
    }

    /// Delay before retry number `retry` (1-based): `base * 2^(retry-1)` plus jitter.
    #[must_use]
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(16);
        let backoff = self.config.backoff_base.saturating_mul(1 << exp);
        let max_jitter_ms = u64::try_from(self.config.max_jitter.as_millis()).unwrap_or(u64::MAX);
        let jitter = if max_jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=max_jitter_ms)
        };
        backoff + Duration::from_millis(jitter)
    }

    /// Runs `call` under the spacing limit, retrying throttled responses.
    ///
    /// # Errors
    ///
    /// Returns the call's own error when it is not a throttle, or
    /// [`ExecutionError::RateLimited`] once retries are exhausted.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut retries = 0u32;
        loop {
            if let Some(limiter) = &self.limiter {
                limiter.until_ready().await;
            }

            match call().await {
                Err(e) if e.is_throttled() => {
                    retries += 1;
                    if retries > self.config.max_retries {
                        error!(
                            operation,
                            max_retries = self.config.max_retries,
                            "Rate limit retries exhausted"
                        );
                        return Err(ExecutionError::rate_limited(retries));
                    }
                    let delay = self.backoff_delay(retries);
                    warn!(
                        operation,
                        attempt = retries,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis(),
                        "Throttled by broker, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }
}
