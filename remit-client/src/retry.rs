//! Retry policy.

use http::{HeaderMap, StatusCode};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt;
use std::time::Duration;

/// Lower bound of the jitter window, in milliseconds.
const MIN_JITTER_MS: u64 = 30;

/// Exponent cap applied when none is configured.
const DEFAULT_MAX_RETRY_THRESHOLD: u32 = 8;

/// Longest server-specified delay that is honored. Larger `Retry-After`
/// values are ignored in favor of computed backoff.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(300);

/// Outcome of one attempt, as seen by a [`Retryer`].
#[derive(Debug, Clone, Copy)]
pub struct Attempt<'a> {
    /// Retries executed so far for this request.
    pub retry_count: u32,
    /// Status of the response, absent when the transport failed.
    pub status: Option<StatusCode>,
    /// Headers of the response, absent when the transport failed.
    pub headers: Option<&'a HeaderMap>,
    /// Whether the transport failure was a timeout.
    pub timed_out: bool,
}

impl<'a> Attempt<'a> {
    /// An attempt that produced an HTTP response.
    pub fn response(retry_count: u32, status: StatusCode, headers: &'a HeaderMap) -> Self {
        Self {
            retry_count,
            status: Some(status),
            headers: Some(headers),
            timed_out: false,
        }
    }

    /// An attempt where the transport itself failed.
    pub fn transport_failure(retry_count: u32, timed_out: bool) -> Self {
        Self {
            retry_count,
            status: None,
            headers: None,
            timed_out,
        }
    }
}

/// Decides whether, when and how often a failed attempt is retried.
///
/// One retryer is shared by every request of a client, possibly from many
/// tasks at once.
pub trait Retryer: Send + Sync + fmt::Debug {
    /// Whether the failed attempt should be retried.
    fn should_retry(&self, attempt: &Attempt<'_>) -> bool;

    /// Delay before the next attempt.
    fn retry_delay(&self, attempt: &Attempt<'_>) -> Duration;

    /// Maximum number of retries after the first attempt.
    fn max_retries(&self) -> u32;
}

/// Exponential backoff with jitter.
///
/// Retries server errors (5xx) only. The delay before retry `r` is
/// `2^min(r, threshold) * uniform(30..60)` milliseconds. A `Retry-After`
/// header on a 429 or 503 response takes precedence unless disabled.
pub struct DefaultRetryer {
    max_retries: u32,
    max_retry_threshold: u32,
    honor_retry_after: bool,
    rng: Mutex<StdRng>,
}

impl DefaultRetryer {
    /// Create a retryer allowing `max_retries` retries.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            max_retry_threshold: DEFAULT_MAX_RETRY_THRESHOLD,
            honor_retry_after: true,
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    /// Cap the backoff exponent. Zero restores the default of 8.
    pub fn with_max_retry_threshold(mut self, threshold: u32) -> Self {
        self.max_retry_threshold = if threshold == 0 {
            DEFAULT_MAX_RETRY_THRESHOLD
        } else {
            threshold
        };
        self
    }

    /// Always use the computed backoff, even when the server sent `Retry-After`.
    pub fn ignore_retry_after(mut self) -> Self {
        self.honor_retry_after = false;
        self
    }

    /// Seed the jitter source, for reproducible delays.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    /// The exponent cap in effect.
    pub fn max_retry_threshold(&self) -> u32 {
        self.max_retry_threshold
    }

    /// Computed backoff for the given number of retries so far.
    pub fn backoff(&self, retry_count: u32) -> Duration {
        let exponent = retry_count.min(self.max_retry_threshold);
        let jitter = self
            .rng
            .lock()
            .random_range(MIN_JITTER_MS..MIN_JITTER_MS * 2);
        let factor = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
        Duration::from_millis(factor.saturating_mul(jitter))
    }
}

impl Default for DefaultRetryer {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_MAX_RETRIES)
    }
}

impl fmt::Debug for DefaultRetryer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultRetryer")
            .field("max_retries", &self.max_retries)
            .field("max_retry_threshold", &self.max_retry_threshold)
            .field("honor_retry_after", &self.honor_retry_after)
            .finish()
    }
}

impl Retryer for DefaultRetryer {
    fn should_retry(&self, attempt: &Attempt<'_>) -> bool {
        attempt.status.is_some_and(|status| status.is_server_error())
    }

    fn retry_delay(&self, attempt: &Attempt<'_>) -> Duration {
        if self.honor_retry_after
            && let (Some(status), Some(headers)) = (attempt.status, attempt.headers)
            && let Some(delay) = retry_after(status, headers)
        {
            tracing::warn!(
                retry_after_seconds = delay.as_secs(),
                status = %status,
                "Using server-specified retry delay"
            );
            return delay;
        }
        self.backoff(attempt.retry_count)
    }

    fn max_retries(&self) -> u32 {
        self.max_retries
    }
}

/// Server-specified delay from a `Retry-After` header.
///
/// Only 429 and 503 responses are considered, and only integer seconds are
/// understood. Delays above [`MAX_RETRY_AFTER`] yield `None`.
pub fn retry_after(status: StatusCode, headers: &HeaderMap) -> Option<Duration> {
    if status != StatusCode::TOO_MANY_REQUESTS && status != StatusCode::SERVICE_UNAVAILABLE {
        return None;
    }

    let seconds = headers
        .get(http::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()?;
    let delay = Duration::from_secs(seconds);
    (delay <= MAX_RETRY_AFTER).then_some(delay)
}
