//! Connection supervision: retry-with-backoff and liveness monitoring.
//!
//! Every managed connection (each gateway transport and the bus client)
//! goes through the same two steps:
//!
//! 1. [`Supervisor::establish`] drives blocking connect attempts until one
//!    succeeds, sleeping `min(base * 2^attempt, max) ± 25%` between them.
//! 2. [`Supervisor::spawn_monitor`] polls liveness on a fixed interval and
//!    re-runs the same infinite-retry connect when the link has dropped.
//!
//! Cancellation aborts immediately and is reported as
//! [`RetryError::Cancelled`], never retried.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

// ── RetryPolicy ──────────────────────────────────────────────────────

/// Exponential backoff configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the first retry. Default: 2s.
    pub base_delay: Duration,

    /// Upper bound on the un-jittered delay. Default: 300s.
    pub max_delay: Duration,

    /// Retries after the first failed attempt. `None` retries forever.
    pub max_retries: Option<u32>,

    /// Relative jitter applied to every delay. Default: 0.25 (±25%).
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(300),
            max_retries: None,
            jitter: 0.25,
        }
    }
}

impl RetryPolicy {
    /// Un-jittered delay for `attempt`: `min(base * 2^attempt, max)`.
    pub fn nominal_delay(&self, attempt: u32) -> Duration {
        let exp = 2.0_f64.powi(i32::try_from(attempt).unwrap_or(i32::MAX));
        let base = self.base_delay.as_secs_f64() * exp;
        Duration::from_secs_f64(base.min(self.max_delay.as_secs_f64()))
    }

    /// Delay for `attempt` with uniform jitter in `[-jitter, +jitter]`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let nominal = self.nominal_delay(attempt).as_secs_f64();
        let jitter = self.jitter.abs();
        let factor = if jitter > 0.0 {
            1.0 + rand::thread_rng().gen_range(-jitter..=jitter)
        } else {
            1.0
        };
        Duration::from_secs_f64((nominal * factor).max(0.0))
    }
}

// ── retry_with_backoff ───────────────────────────────────────────────

/// Why a retry loop stopped without success.
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("operation cancelled")]
    Cancelled,

    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },
}

/// Run `op` until it succeeds or the attempts run out. `cancel` aborts early.
///
/// `operation` names the loop in log output.
pub async fn retry_with_backoff<T, E, F, Fut>(
    operation: &str,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled);
        }

        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(RetryError::Cancelled),
            result = op() => result,
        };

        match result {
            Ok(value) => {
                if attempt > 0 {
                    info!(operation, attempts = attempt + 1, "operation succeeded after retries");
                }
                return Ok(value);
            }
            Err(e) => {
                if policy.max_retries.is_some_and(|max| attempt >= max) {
                    return Err(RetryError::Exhausted {
                        attempts: attempt + 1,
                        last: e,
                    });
                }

                let delay = policy.backoff_delay(attempt);
                warn!(
                    operation,
                    attempt = attempt + 1,
                    retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %e,
                    "operation failed, retrying"
                );

                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return Err(RetryError::Cancelled),
                    () = tokio::time::sleep(delay) => {}
                }

                attempt = attempt.saturating_add(1);
            }
        }
    }
}

// ── ConnectionState ──────────────────────────────────────────────────

/// Lifecycle phase of one managed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Disconnected,
    Connecting,
    Connected,
}

/// Observable state of one managed connection. Written only by its
/// [`Supervisor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionState {
    pub phase: Phase,
    pub consecutive_failures: u32,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self {
            phase: Phase::Disconnected,
            consecutive_failures: 0,
        }
    }
}

// ── Supervisor ───────────────────────────────────────────────────────

/// Drives one connection through initial connect and reconnects.
pub struct Supervisor {
    name: String,
    policy: RetryPolicy,
    liveness_interval: Duration,
    state: watch::Sender<ConnectionState>,
}

impl Supervisor {
    pub fn new(name: impl Into<String>, policy: RetryPolicy, liveness_interval: Duration) -> Self {
        let (state, _) = watch::channel(ConnectionState::default());
        Self {
            name: name.into(),
            policy,
            liveness_interval,
            state,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Connect with backoff until the link is up or `cancel` fires.
    pub async fn establish<E, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut connect: F,
    ) -> Result<(), RetryError<E>>
    where
        E: Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), E>>,
    {
        self.state.send_modify(|s| s.phase = Phase::Connecting);

        let state = &self.state;
        let result = retry_with_backoff(&self.name, &self.policy, cancel, move || {
            let attempt = connect();
            async move {
                let result = attempt.await;
                if result.is_err() {
                    state.send_modify(|s| {
                        s.consecutive_failures = s.consecutive_failures.saturating_add(1);
                    });
                }
                result
            }
        })
        .await;

        match &result {
            Ok(()) => {
                self.state.send_replace(ConnectionState {
                    phase: Phase::Connected,
                    consecutive_failures: 0,
                });
                info!(connection = %self.name, "connected");
            }
            Err(_) => self.state.send_modify(|s| s.phase = Phase::Disconnected),
        }
        result
    }

    /// Spawn the liveness loop for this connection.
    ///
    /// Every `liveness_interval` the loop calls `is_alive`; when it reports
    /// a dropped link the loop runs [`establish`](Self::establish) again
    /// with `connect` before resuming polling.
    pub fn spawn_monitor<E, P, F, Fut>(
        self: &Arc<Self>,
        cancel: CancellationToken,
        is_alive: P,
        mut connect: F,
    ) -> JoinHandle<()>
    where
        E: Display + Send + 'static,
        P: Fn() -> bool + Send + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
    {
        let supervisor = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(supervisor.liveness_interval);
            interval.tick().await; // consume the immediate first tick

            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        if is_alive() {
                            continue;
                        }
                        info!(connection = %supervisor.name, "connection lost, reconnecting");
                        supervisor.state.send_modify(|s| s.phase = Phase::Disconnected);

                        match supervisor.establish(&cancel, &mut connect).await {
                            Ok(()) => info!(connection = %supervisor.name, "reconnected"),
                            Err(RetryError::Cancelled) => break,
                            Err(e) => warn!(connection = %supervisor.name, error = %e, "reconnect failed"),
                        }
                    }
                }
            }

            debug!(connection = %supervisor.name, "liveness monitor exiting");
        })
    }
}

// ── Tests ────────────────────────────────────────────────────────────
