//! Retry with exponential backoff, provider wait hints and jitter.

use std::future::Future;
use std::time::Duration;

use blogpilot_types::Result;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 6;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(2_000);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(60_000);
pub const DEFAULT_JITTER_CAP: Duration = Duration::from_millis(1_000);

/// Attempt budget and backoff caps for [`with_retry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            jitter_cap: DEFAULT_JITTER_CAP,
        }
    }
}

impl RetryPolicy {
    /// Same attempt budget, no waiting between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter_cap: Duration::ZERO,
        }
    }

    /// Read `RETRY_MAX_ATTEMPTS`, `RETRY_BASE_DELAY_MS`, `RETRY_MAX_DELAY_MS`
    /// and `RETRY_JITTER_MS`; unparseable values keep the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let millis = |key: &str| {
            lookup(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_millis)
        };
        let defaults = Self::default();
        Self {
            max_attempts: lookup("RETRY_MAX_ATTEMPTS")
                .and_then(|v| v.trim().parse::<u32>().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_attempts),
            base_delay: millis("RETRY_BASE_DELAY_MS").unwrap_or(defaults.base_delay),
            max_delay: millis("RETRY_MAX_DELAY_MS").unwrap_or(defaults.max_delay),
            jitter_cap: millis("RETRY_JITTER_MS").unwrap_or(defaults.jitter_cap),
        }
    }

    /// Delay before the retry that follows failed attempt `attempt` (1-based).
    ///
    /// A provider hint replaces the exponential schedule; either way the sum
    /// with `jitter` is capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32, hint: Option<Duration>, jitter: Duration) -> Duration {
        let scheduled = hint.unwrap_or_else(|| {
            let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
            self.base_delay.saturating_mul(factor)
        });
        scheduled.saturating_add(jitter).min(self.max_delay)
    }

    /// Uniform jitter in `[0, jitter_cap]`, drawn from a v4 UUID's random bits.
    pub fn jitter(&self) -> Duration {
        let cap = self.jitter_cap.as_millis() as u64;
        if cap == 0 {
            return Duration::ZERO;
        }
        let bits = uuid::Uuid::new_v4().as_u128() as u64;
        Duration::from_millis(bits % (cap + 1))
    }
}

/// Run `task` until it succeeds, fails with a non-transient error, or the
/// attempt budget is spent. The last error is returned unchanged.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, label: &str, mut task: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match task().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < max_attempts => {
                let delay = policy.delay_for(attempt, e.retry_after(), policy.jitter());
                tracing::warn!(
                    task = %label,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
