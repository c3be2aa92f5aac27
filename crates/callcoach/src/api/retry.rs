//! Backoff policy for oracle calls.
//!
//! A simulation issues two model calls per turn, so a single rate-limit blip
//! would otherwise sink a whole persona. Errors are classified from the
//! message text produced by [`OpenRouterClient::chat`](crate::OpenRouterClient::chat).

use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// How often and how patiently a failing call is re-issued.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Extra attempts after the first one. `0` fails on the first error.
    pub max_retries: u32,
    /// Wait before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for any single wait.
    pub max_delay: Duration,
    /// Growth factor applied per attempt.
    pub multiplier: f64,
    /// Shorten each wait by a fixed per-attempt factor so concurrent
    /// personas do not retry in lockstep.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Defaults with a specific retry count.
    pub fn with_retries(retries: u32) -> Self {
        Self {
            max_retries: retries,
            ..Default::default()
        }
    }

    /// A config that never retries.
    pub fn disabled() -> Self {
        Self::with_retries(0)
    }

    /// Wait before retry number `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let raw = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = raw.min(self.max_delay.as_secs_f64());

        let factor = if self.jitter {
            // Fixed spread, cycled by attempt.
            [0.75, 0.90, 0.60, 0.85][(attempt % 4) as usize]
        } else {
            1.0
        };
        Duration::from_secs_f64(capped * factor)
    }
}

/// True when the failure is likely to go away on its own.
pub fn is_transient_error(error: &str) -> bool {
    let retryable_status = ["429", "500", "502", "503", "504"]
        .iter()
        .any(|code| error.contains(&format!("HTTP {code}")));
    if retryable_status {
        return true;
    }

    let lower = error.to_lowercase();
    [
        "request failed:",
        "connection reset",
        "connection refused",
        "timed out",
        "broken pipe",
        "network",
    ]
    .iter()
    .any(|needle| lower.contains(needle))
}

/// True when retrying cannot help (bad key, bad request, unknown model).
pub fn is_permanent_error(error: &str) -> bool {
    let lower = error.to_lowercase();
    ["HTTP 400", "HTTP 401", "HTTP 403", "HTTP 404", "HTTP 422"]
        .iter()
        .any(|status| error.contains(status))
        || lower.contains("unauthorized")
        || lower.contains("bad request")
}

/// Run `call` until it succeeds, fails permanently, or retries run out.
///
/// Only the final error is returned; intermediate failures are logged at
/// `warn`.
pub async fn retry_with_backoff<T, F, Fut>(config: &RetryConfig, mut call: F) -> Result<T, String>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, String>>,
{
    let mut attempt = 0;
    loop {
        let err = match call().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        let retryable = is_transient_error(&err) && !is_permanent_error(&err);
        if !retryable || attempt >= config.max_retries {
            return Err(err);
        }

        let delay = config.delay_for_attempt(attempt);
        warn!(
            "Oracle call failed (attempt {}/{}): {err}. Retrying in {delay:?}",
            attempt + 1,
            config.max_retries + 1,
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
