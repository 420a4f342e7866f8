use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{error, info, warn};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,   // Normal operation - requests pass through
    Open,     // Failure threshold breached - reject all requests
    HalfOpen, // Testing if service recovered - allow limited probes
}

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures before opening the circuit.
    pub failure_threshold: usize,
    /// Wait before a probe is allowed after opening.
    pub recovery_timeout: Duration,
    /// Probe successes required to close from HalfOpen.
    pub half_open_success_threshold: usize,
    /// Probe failures tolerated before reopening.
    pub half_open_failure_threshold: usize,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(600),
            half_open_success_threshold: 2,
            half_open_failure_threshold: 1,
        }
    }
}

/// Circuit breaker for protecting against cascading failures.
///
/// Callers bracket each guarded operation with `can_proceed()` and then
/// exactly one of `record_success()` / `record_failure()`. The `call`
/// combinator does the bracketing for single-future operations.
pub struct CircuitBreaker {
    state: Arc<RwLock<BreakerState>>,
    config: BreakerConfig,
    name: String,
}

struct BreakerState {
    state: CircuitState,
    failure_count: usize,
    success_count: usize,
    half_open_failures: usize,
    last_failure_time: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            state: Arc::new(RwLock::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                half_open_failures: 0,
                last_failure_time: None,
            })),
            config,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether a call may be attempted right now. Evaluates the
    /// Open -> HalfOpen transition when the recovery timeout has elapsed,
    /// regardless of traffic in between.
    pub async fn can_proceed(&self) -> bool {
        let mut state = self.state.write().await;
        match state.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = state
                    .last_failure_time
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::ZERO);
                if elapsed > self.config.recovery_timeout {
                    info!(
                        "CircuitBreaker [{}]: Transitioning Open -> HalfOpen (recovery timeout elapsed)",
                        self.name
                    );
                    state.state = CircuitState::HalfOpen;
                    state.success_count = 0;
                    state.half_open_failures = 0;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful call
    pub async fn record_success(&self) {
        let mut state = self.state.write().await;
        match state.state {
            CircuitState::HalfOpen => {
                state.success_count += 1;
                if state.success_count >= self.config.half_open_success_threshold {
                    info!(
                        "CircuitBreaker [{}]: Transitioning HalfOpen -> Closed ({} probe successes)",
                        self.name, state.success_count
                    );
                    state.state = CircuitState::Closed;
                    state.failure_count = 0;
                    state.success_count = 0;
                    state.half_open_failures = 0;
                }
            }
            CircuitState::Closed => {
                state.failure_count = 0;
            }
            CircuitState::Open => {
                warn!(
                    "CircuitBreaker [{}]: Success recorded in Open state (unexpected)",
                    self.name
                );
            }
        }
    }

    /// Record a failed call
    pub async fn record_failure(&self) {
        let mut state = self.state.write().await;
        state.failure_count += 1;
        state.last_failure_time = Some(Instant::now());

        match state.state {
            CircuitState::Closed => {
                if state.failure_count >= self.config.failure_threshold {
                    error!(
                        "CircuitBreaker [{}]: Transitioning Closed -> Open ({} failures)",
                        self.name, state.failure_count
                    );
                    state.state = CircuitState::Open;
                }
            }
            CircuitState::HalfOpen => {
                state.half_open_failures += 1;
                if state.half_open_failures >= self.config.half_open_failure_threshold {
                    warn!(
                        "CircuitBreaker [{}]: Transitioning HalfOpen -> Open (failure during recovery)",
                        self.name
                    );
                    state.state = CircuitState::Open;
                    state.success_count = 0;
                    state.half_open_failures = 0;
                }
            }
            CircuitState::Open => {
                // Already open, just track the failure time.
            }
        }
    }

    /// Execute a future with circuit breaker protection.
    pub async fn call<F, T, E>(&self, f: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: std::future::Future<Output = Result<T, E>>,
    {
        if !self.can_proceed().await {
            return Err(CircuitBreakerError::Open(format!(
                "Circuit breaker [{}] is open",
                self.name
            )));
        }

        match f.await {
            Ok(result) => {
                self.record_success().await;
                Ok(result)
            }
            Err(e) => {
                self.record_failure().await;
                Err(CircuitBreakerError::Inner(e))
            }
        }
    }

    /// Get current circuit state
    pub async fn state(&self) -> CircuitState {
        self.state.read().await.state
    }
}

/// Error type for circuit breaker
#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    #[error("Circuit breaker is open: {0}")]
    Open(String),

    #[error(transparent)]
    Inner(E),
}
