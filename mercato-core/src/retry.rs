use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::error::PluginError;

/// Bounded exponential backoff for transient venue failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Cap applied to every delay.
    pub max_delay: Duration,
    /// Random jitter percentage [0, 100] added to each delay.
    pub jitter_percent: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter_percent: 20,
        }
    }
}

impl RetryPolicy {
    /// The jittered delay before retry number `retry` (zero-based).
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        let base = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(retry))
            .min(self.max_delay);
        Duration::from_millis(jittered_ms(
            u64::try_from(base.as_millis()).unwrap_or(u64::MAX),
            self.jitter_percent,
        ))
    }
}

/// Add up to `jitter_percent` percent of random slack to a wait.
#[must_use]
pub fn jittered_ms(base_ms: u64, jitter_percent: u32) -> u64 {
    let jitter_range = if jitter_percent == 0 {
        1
    } else {
        std::cmp::max(1, base_ms.saturating_mul(u64::from(jitter_percent)) / 100)
    };
    let mut rng = rand::rng();
    base_ms + rng.random_range(0..jitter_range)
}

/// A wait jittered symmetrically by `jitter_percent` around `base_ms`.
#[must_use]
pub fn jittered_around_ms(base_ms: u64, jitter_percent: u32) -> u64 {
    if jitter_percent == 0 || base_ms == 0 {
        return base_ms;
    }
    let half_range = std::cmp::max(1, base_ms.saturating_mul(u64::from(jitter_percent)) / 100);
    let mut rng = rand::rng();
    (base_ms - half_range) + rng.random_range(0..=half_range * 2)
}

/// Run `op`, retrying transient [`PluginError::Network`] failures with
/// exponential, jittered delays. Non-transient errors return immediately.
///
/// # Errors
/// The last error observed once attempts are exhausted, or the first
/// non-transient error.
pub async fn retry_transient<T, F, Fut>(policy: RetryPolicy, mut op: F) -> Result<T, PluginError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, PluginError>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt + 1 < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                tracing::debug!(
                    provider = err.provider(),
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "transient failure; backing off before retry"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn tight_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            jitter_percent: 0,
        }
    }

    #[tokio::test]
    async fn transient_errors_are_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&calls);
        let result = retry_transient(tight_policy(), move || {
            let seen = Arc::clone(&seen);
            async move {
                if seen.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(PluginError::network("venue", "reset"))
                } else {
                    Ok(7)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn auth_errors_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&calls);
        let result: Result<(), _> = retry_transient(tight_policy(), move || {
            let seen = Arc::clone(&seen);
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                Err(PluginError::auth("venue", "bad key"))
            }
        })
        .await;
        assert!(matches!(result, Err(PluginError::Auth { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn attempts_are_bounded() {
        let calls = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&calls);
        let result: Result<(), _> = retry_transient(tight_policy(), move || {
            let seen = Arc::clone(&seen);
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                Err(PluginError::network("venue", "timeout"))
            }
        })
        .await;
        assert!(matches!(result, Err(PluginError::Network { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn symmetric_jitter_stays_in_band() {
        for _ in 0..200 {
            let v = jittered_around_ms(10_000, 10);
            assert!((9_000..=11_000).contains(&v));
        }
    }
}
