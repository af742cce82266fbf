//! Delay policies applied between replay attempts within a single drain.
//!
//! Attempt semantics: `delay(n)` is the wait after the `n`-th failed attempt, before attempt
//! `n + 1`. `delay(0)` is always zero. The default refresh policy is exponential from 200ms
//! (200ms, 400ms, ...). `Backoff::none()` retries immediately.
//!
//! ```rust
//! use std::time::Duration;
//! use refresh_sync::Backoff;
//!
//! let backoff = Backoff::exponential(Duration::from_millis(200));
//! assert_eq!(backoff.delay(1), Duration::from_millis(200));
//! assert_eq!(backoff.delay(2), Duration::from_millis(400));
//!
//! let custom = Backoff::custom(|failed| Duration::from_millis(50 * failed as u64));
//! assert_eq!(custom.delay(3), Duration::from_millis(150));
//! ```
//!
//! Computations that would overflow saturate to `MAX_BACKOFF` (1 day).

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Maximum delay used when calculations overflow (1 day).
pub const MAX_BACKOFF: Duration = Duration::from_secs(24 * 60 * 60);

/// Errors returned by backoff configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackoffError {
    #[error("with_max is only valid for linear or exponential backoff")]
    CapNotSupported,
    #[error("max must be greater than zero")]
    MaxMustBePositive,
    #[error("max ({max:?}) must be >= base ({base:?})")]
    MaxLessThanBase { base: Duration, max: Duration },
}

/// Delay between in-drain retries.
#[derive(Clone)]
pub enum Backoff {
    /// Same delay after every failure.
    Constant(Duration),
    /// `base * n`, optionally capped.
    Linear { base: Duration, max: Option<Duration> },
    /// `base * 2^(n-1)`, optionally capped.
    Exponential { base: Duration, max: Option<Duration> },
    /// Caller-supplied curve; results are clamped to `MAX_BACKOFF`.
    Custom(Arc<dyn Fn(usize) -> Duration + Send + Sync>),
}

impl fmt::Debug for Backoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backoff::Constant(d) => f.debug_tuple("Constant").field(d).finish(),
            Backoff::Linear { base, max } => {
                f.debug_struct("Linear").field("base", base).field("max", max).finish()
            }
            Backoff::Exponential { base, max } => {
                f.debug_struct("Exponential").field("base", base).field("max", max).finish()
            }
            Backoff::Custom(_) => f.write_str("Custom(<fn>)"),
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::exponential(Duration::from_millis(200))
    }
}

impl Backoff {
    /// Retry immediately.
    pub fn none() -> Self {
        Backoff::Constant(Duration::ZERO)
    }

    pub fn constant(delay: Duration) -> Self {
        Backoff::Constant(delay)
    }

    pub fn linear(base: Duration) -> Self {
        Backoff::Linear { base, max: None }
    }

    pub fn exponential(base: Duration) -> Self {
        Backoff::Exponential { base, max: None }
    }

    /// Inject an arbitrary delay curve keyed by the number of failed attempts so far.
    pub fn custom<F>(curve: F) -> Self
    where
        F: Fn(usize) -> Duration + Send + Sync + 'static,
    {
        Backoff::Custom(Arc::new(curve))
    }

    /// Cap a linear or exponential backoff.
    pub fn with_max(mut self, cap: Duration) -> Result<Self, BackoffError> {
        if cap.is_zero() {
            return Err(BackoffError::MaxMustBePositive);
        }
        match &mut self {
            Backoff::Linear { base, max } | Backoff::Exponential { base, max } => {
                if cap < *base {
                    return Err(BackoffError::MaxLessThanBase { base: *base, max: cap });
                }
                *max = Some(cap);
                Ok(self)
            }
            Backoff::Constant(_) | Backoff::Custom(_) => Err(BackoffError::CapNotSupported),
        }
    }

    /// Delay after `failed` failed attempts (0 = nothing failed yet, no delay).
    pub fn delay(&self, failed: usize) -> Duration {
        if failed == 0 {
            return Duration::ZERO;
        }
        let raw = match self {
            Backoff::Constant(d) => *d,
            Backoff::Linear { base, max } => {
                let n = failed.min(u32::MAX as usize) as u32;
                let linear = base.checked_mul(n).unwrap_or(MAX_BACKOFF);
                max.map_or(linear, |m| linear.min(m))
            }
            Backoff::Exponential { base, max } => {
                let exponent = failed.saturating_sub(1).min(u32::MAX as usize) as u32;
                let nanos = base.as_nanos().saturating_mul(2u128.saturating_pow(exponent));
                let exp = Duration::from_nanos(nanos.min(MAX_BACKOFF.as_nanos()) as u64);
                max.map_or(exp, |m| exp.min(m))
            }
            Backoff::Custom(curve) => curve(failed),
        };
        raw.min(MAX_BACKOFF)
    }
}
