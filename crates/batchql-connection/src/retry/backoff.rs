//! Delay calculation between retry attempts

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Exponential backoff: `initial * multiplier^retry`, capped at `max`.
///
/// With jitter enabled each delay is spread over +/-25% of its nominal
/// value so that many clients failing together do not retry in lockstep.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffStrategy {
    initial: Duration,
    max: Duration,
    multiplier: f64,
    jitter: bool,
}

impl BackoffStrategy {
    /// `initial` is raised to 1ms and `max` to at least `initial`
    pub fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.max(Duration::from_millis(1));
        Self {
            initial,
            max: max.max(initial),
            multiplier: 2.0,
            jitter: false,
        }
    }

    pub fn from_millis(initial_ms: u64, max_ms: u64) -> Self {
        Self::new(
            Duration::from_millis(initial_ms),
            Duration::from_millis(max_ms),
        )
    }

    /// Growth factor per retry; values below 1.0 are clamped
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier.max(1.0);
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before retry number `retry` (0 is the first retry)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let max_ms = self.max.as_millis() as f64;
        let nominal_ms = self.initial.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped = Duration::from_millis(nominal_ms.min(max_ms) as u64);

        if !self.jitter {
            return capped;
        }
        let spread = capped / 4;
        capped - spread + spread.mul_f64(2.0 * unit_random())
    }

    pub fn initial(&self) -> Duration {
        self.initial
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    pub fn has_jitter(&self) -> bool {
        self.jitter
    }
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        Self::from_millis(100, 30_000)
    }
}

/// Value in `[0, 1)` taken from the clock's sub-second nanoseconds
fn unit_random() -> f64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or_default();
    f64::from(nanos % 1_000) / 1_000.0
}
