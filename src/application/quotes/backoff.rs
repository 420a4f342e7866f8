use rand::Rng;
use std::time::{Duration, Instant};

/// Exponential backoff window applied to a provider or symbol after
/// repeated failure. The window doubles per consecutive failure up to a
/// cap; any success resets it. A +/-10% jitter keeps a fleet of symbols
/// from retrying a recovered provider in lockstep.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    consecutive_failures: u32,
    until: Option<Instant>,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            consecutive_failures: 0,
            until: None,
        }
    }

    pub fn record_failure(&mut self) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        let window = self
            .current_window()
            .mul_f64(rand::rng().random_range(0.9..1.1));
        self.until = Some(Instant::now() + window);
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.until = None;
    }

    pub fn is_active(&self) -> bool {
        self.until.is_some_and(|t| Instant::now() < t)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Window length for the current failure streak.
    pub fn current_window(&self) -> Duration {
        if self.consecutive_failures == 0 {
            return Duration::ZERO;
        }
        // Exponent is bounded so the shift cannot overflow.
        let exp = (self.consecutive_failures - 1).min(16);
        let window = self.base.saturating_mul(1u32 << exp);
        window.min(self.cap)
    }
}
