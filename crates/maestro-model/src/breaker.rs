//! Per-provider circuit breaker.
//!
//! Three states.  CLOSED counts consecutive failures and opens at the
//! threshold; OPEN fails fast until the recovery window elapses; the first
//! caller after the window becomes the HALF_OPEN probe while concurrent
//! callers keep failing fast; enough probe successes close the circuit, any
//! probe failure reopens it.

use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use maestro_domain::{Error, Result};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure: Option<Instant>,
    /// True while the single half-open probe call is in flight.
    probing: bool,
}

/// Point-in-time view of a circuit, for health endpoints and logs.
#[derive(Debug, Clone)]
pub struct CircuitSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub last_failure_age: Option<Duration>,
    pub seconds_until_retry: Option<u64>,
}

pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    recovery_timeout: Duration,
    success_threshold: u32,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(
        name: impl Into<String>,
        failure_threshold: u32,
        recovery_timeout: Duration,
        success_threshold: u32,
    ) -> Self {
        Self {
            name: name.into(),
            failure_threshold,
            recovery_timeout,
            success_threshold,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure: None,
                probing: false,
            }),
        }
    }

    /// Execute `f` under circuit protection.
    ///
    /// When the circuit is OPEN inside the recovery window — or a half-open
    /// probe is already in flight — this fails fast with
    /// [`Error::CircuitOpen`] without invoking `f`.
    pub async fn call<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        {
            let mut inner = self.inner.lock().expect("circuit lock poisoned");
            match inner.state {
                CircuitState::Open => {
                    let elapsed = inner
                        .last_failure
                        .map(|t| t.elapsed())
                        .unwrap_or(self.recovery_timeout);
                    if elapsed >= self.recovery_timeout {
                        inner.state = CircuitState::HalfOpen;
                        inner.success_count = 0;
                        inner.probing = true;
                        info!(circuit = %self.name, "circuit OPEN → HALF_OPEN");
                    } else {
                        let retry_in =
                            (self.recovery_timeout - elapsed).as_secs().max(1);
                        return Err(Error::CircuitOpen {
                            provider: self.name.clone(),
                            retry_in,
                        });
                    }
                }
                CircuitState::HalfOpen => {
                    if inner.probing {
                        return Err(Error::CircuitOpen {
                            provider: self.name.clone(),
                            retry_in: 1,
                        });
                    }
                    inner.probing = true;
                }
                CircuitState::Closed => {}
            }
        }

        match f().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                self.record_failure();
                Err(err)
            }
        }
    }

    fn record_success(&self) {
        let mut inner = self.inner.lock().expect("circuit lock poisoned");
        inner.probing = false;
        match inner.state {
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    info!(circuit = %self.name, "circuit HALF_OPEN → CLOSED");
                }
            }
            CircuitState::Closed => inner.failure_count = 0,
            CircuitState::Open => {}
        }
    }

    fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("circuit lock poisoned");
        inner.probing = false;
        inner.failure_count += 1;
        inner.last_failure = Some(Instant::now());
        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                warn!(circuit = %self.name, "circuit HALF_OPEN → OPEN (probe failed)");
            }
            CircuitState::Closed => {
                if inner.failure_count >= self.failure_threshold {
                    inner.state = CircuitState::Open;
                    error!(
                        circuit = %self.name,
                        failures = inner.failure_count,
                        "circuit CLOSED → OPEN"
                    );
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.inner.lock().expect("circuit lock poisoned");
        let last_failure_age = inner.last_failure.map(|t| t.elapsed());
        let seconds_until_retry = match (inner.state, last_failure_age) {
            (CircuitState::Open, Some(age)) => {
                Some(self.recovery_timeout.saturating_sub(age).as_secs())
            }
            (CircuitState::Open, None) => Some(0),
            _ => None,
        };
        CircuitSnapshot {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            last_failure_age,
            seconds_until_retry,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
