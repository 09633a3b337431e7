//! Reconnection utilities with capped exponential backoff.
//!
//! Drives the subscriber state machine's `Disconnected -> Connecting`
//! transition: each failed attempt multiplies the delay by a configurable
//! factor until it hits a ceiling, and a successful connection resets it.

use crate::config::PodSubscriberConfig;
use std::time::Duration;

/// Reconnection state tracker for managing connection attempts and backoff.
///
/// # Example
///
/// ```rust
/// use kvroute_core::reconnect::ReconnectState;
/// use kvroute_core::config::PodSubscriberConfig;
/// use std::time::Duration;
///
/// let cfg = PodSubscriberConfig::new("ns/p0", "10.0.0.1", "m")
///     .with_reconnect_delay(Duration::from_millis(100))
///     .with_max_reconnect_interval(Duration::from_secs(10))
///     .with_reconnect_backoff_factor(2.0);
///
/// let mut reconnect = ReconnectState::new(&cfg);
///
/// assert_eq!(reconnect.next_delay(), Duration::from_millis(100));
/// assert_eq!(reconnect.next_delay(), Duration::from_millis(200));
/// assert_eq!(reconnect.next_delay(), Duration::from_millis(400));
///
/// reconnect.reset();
/// assert_eq!(reconnect.next_delay(), Duration::from_millis(100));
/// ```
#[derive(Debug, Clone)]
pub struct ReconnectState {
    base_interval: Duration,
    max_interval: Duration,
    factor: f64,
    attempt: u32,
    current_interval: Duration,
}

impl ReconnectState {
    /// Upper bound on the exponent fed to `factor.powi`. Any backoff factor greater
    /// than 1.0 blows past `max_interval` long before reaching this many attempts, so
    /// it only ever matters as a guard against unbounded growth during a sustained
    /// outage.
    const MAX_EXPONENT: u32 = 64;

    /// Create a new reconnection state tracker from a pod subscriber configuration.
    pub fn new(cfg: &PodSubscriberConfig) -> Self {
        Self {
            base_interval: cfg.reconnect_delay,
            max_interval: cfg.max_reconnect_interval,
            factor: cfg.reconnect_backoff_factor,
            attempt: 0,
            current_interval: cfg.reconnect_delay,
        }
    }

    /// Get the delay for the next reconnection attempt, advancing the backoff.
    ///
    /// The delay returned is the one in effect *before* this call; internally
    /// the next interval is computed as `base * factor^attempt`, capped at
    /// `max_interval`.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current_interval;

        self.attempt += 1;
        // Cap the exponent itself, not just the result: `factor.powi(attempt)` would
        // otherwise overflow to `f64::INFINITY` after enough consecutive failures, and
        // `Duration::from_secs_f64` panics on non-finite input. Capping the exponent
        // alone isn't enough though — a large-but-finite `factor` can still scale past
        // what `Duration` can represent, so the seconds value itself is clamped to
        // `max_interval` before it ever reaches `Duration::from_secs_f64`.
        let capped_exponent = self.attempt.min(Self::MAX_EXPONENT) as i32;
        let scaled = self.base_interval.as_secs_f64() * self.factor.powi(capped_exponent);
        let max_secs = self.max_interval.as_secs_f64();
        let clamped = if scaled.is_finite() { scaled.clamp(0.0, max_secs) } else { max_secs };
        self.current_interval = Duration::from_secs_f64(clamped);

        delay
    }

    /// Reset the reconnection state after a successful connection.
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.current_interval = self.base_interval;
    }

    /// Get the current attempt number.
    #[inline]
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Get the base reconnection interval.
    #[inline]
    #[must_use]
    pub const fn base_interval(&self) -> Duration {
        self.base_interval
    }

    /// Get the maximum reconnection interval.
    #[inline]
    #[must_use]
    pub const fn max_interval(&self) -> Duration {
        self.max_interval
    }

    /// Get the current reconnection interval.
    #[inline]
    #[must_use]
    pub const fn current_interval(&self) -> Duration {
        self.current_interval
    }
}

/// Error type for reconnection operations.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconnectError {
    /// Maximum reconnection attempts reached.
    MaxAttemptsReached {
        /// Number of attempts made before giving up.
        attempts: u32,
    },
    /// Connection failed with an I/O-level error.
    ConnectionFailed {
        /// Human-readable failure detail.
        message: String,
    },
    /// Reconnection cancelled by user (`Stop`).
    Cancelled,
}

impl std::fmt::Display for ReconnectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MaxAttemptsReached { attempts } => {
                write!(f, "maximum reconnection attempts reached: {attempts}")
            }
            Self::ConnectionFailed { message } => write!(f, "connection failed: {message}"),
            Self::Cancelled => write!(f, "reconnection cancelled"),
        }
    }
}

impl std::error::Error for ReconnectError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(base: Duration, max: Duration, factor: f64) -> PodSubscriberConfig {
        PodSubscriberConfig::new("ns/p0", "10.0.0.1", "m")
            .with_reconnect_delay(base)
            .with_max_reconnect_interval(max)
            .with_reconnect_backoff_factor(factor)
    }

    #[test]
    fn exponential_backoff_doubles_by_default() {
        let c = cfg(Duration::from_millis(100), Duration::from_secs(10), 2.0);
        let mut state = ReconnectState::new(&c);

        assert_eq!(state.next_delay(), Duration::from_millis(100));
        assert_eq!(state.attempt(), 1);
        assert_eq!(state.next_delay(), Duration::from_millis(200));
        assert_eq!(state.next_delay(), Duration::from_millis(400));
        assert_eq!(state.next_delay(), Duration::from_millis(800));
    }

    #[test]
    fn max_interval_caps_growth() {
        let c = cfg(Duration::from_millis(100), Duration::from_millis(500), 2.0);
        let mut state = ReconnectState::new(&c);

        assert_eq!(state.next_delay(), Duration::from_millis(100));
        assert_eq!(state.next_delay(), Duration::from_millis(200));
        assert_eq!(state.next_delay(), Duration::from_millis(400));
        assert_eq!(state.next_delay(), Duration::from_millis(500));
        assert_eq!(state.next_delay(), Duration::from_millis(500));
    }

    #[test]
    fn reset_restores_base_interval() {
        let c = cfg(Duration::from_millis(100), Duration::from_secs(10), 2.0);
        let mut state = ReconnectState::new(&c);

        state.next_delay();
        state.next_delay();
        state.next_delay();
        assert_eq!(state.attempt(), 3);

        state.reset();
        assert_eq!(state.attempt(), 0);
        assert_eq!(state.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn non_default_factor_is_honored() {
        let c = cfg(Duration::from_millis(500), Duration::from_secs(30), 1.5);
        let mut state = ReconnectState::new(&c);

        assert_eq!(state.next_delay(), Duration::from_millis(500));
        assert_eq!(state.next_delay(), Duration::from_millis(750));
    }

    #[test]
    fn sustained_failures_saturate_instead_of_overflowing() {
        let c = cfg(Duration::from_millis(100), Duration::from_secs(10), 2.0);
        let mut state = ReconnectState::new(&c);

        for _ in 0..2000 {
            let delay = state.next_delay();
            assert!(delay <= Duration::from_secs(10));
        }
        assert_eq!(state.current_interval(), Duration::from_secs(10));
    }

    #[test]
    fn large_factor_saturates_without_panicking() {
        let c = cfg(Duration::from_millis(100), Duration::from_secs(10), 3.0);
        let mut state = ReconnectState::new(&c);

        for _ in 0..200 {
            let delay = state.next_delay();
            assert!(delay <= Duration::from_secs(10));
        }
        assert_eq!(state.current_interval(), Duration::from_secs(10));
    }

    #[test]
    fn state_accessors_reflect_configuration() {
        let c = cfg(Duration::from_millis(250), Duration::from_secs(5), 2.0);
        let state = ReconnectState::new(&c);

        assert_eq!(state.base_interval(), Duration::from_millis(250));
        assert_eq!(state.max_interval(), Duration::from_secs(5));
        assert_eq!(state.current_interval(), Duration::from_millis(250));
        assert_eq!(state.attempt(), 0);
    }
}
