//! Process lifecycle: Starting → Ready → Draining → Stopped.
//!
//! The [`Lifecycle`] owns the process state and the in-flight invocation
//! count. Transports consult it before accepting work; the shutdown sequence
//! uses it to stop admitting new calls and wait for running ones.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Notify, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Externally observable process state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessState {
    /// Listener is open, catalog not yet built.
    Starting,
    /// Catalog built; invocations accepted.
    Ready,
    /// Termination requested; in-flight calls finishing, new ones refused.
    Draining,
    /// Terminal.
    Stopped,
}

impl ProcessState {
    /// Lowercase name as reported by health endpoints.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        }
    }

    /// Whether `self → next` is a legal transition.
    pub fn can_transition_to(self, next: ProcessState) -> bool {
        use ProcessState::*;
        matches!(
            (self, next),
            (Starting, Ready)
                | (Starting, Draining)
                | (Starting, Stopped)
                | (Ready, Draining)
                | (Draining, Stopped)
        )
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle misuse.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    /// The requested transition is not allowed from the current state.
    #[error("Invalid lifecycle transition from {from} to {to}")]
    InvalidTransition {
        from: ProcessState,
        to: ProcessState,
    },
}

#[derive(Default)]
struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

struct Inner {
    state: watch::Sender<ProcessState>,
    in_flight: Arc<InFlight>,
    shutdown: CancellationToken,
    started_at: Instant,
}

/// Shared lifecycle controller. Cloning yields another handle to the same
/// state.
#[derive(Clone)]
pub struct Lifecycle {
    inner: Arc<Inner>,
}

impl Lifecycle {
    /// Create a controller in `Starting`.
    pub fn new() -> Self {
        let (state, _) = watch::channel(ProcessState::Starting);
        Self {
            inner: Arc::new(Inner {
                state,
                in_flight: Arc::new(InFlight::default()),
                shutdown: CancellationToken::new(),
                started_at: Instant::now(),
            }),
        }
    }

    /// Current state.
    pub fn state(&self) -> ProcessState {
        *self.inner.state.borrow()
    }

    /// Whether invocations are currently accepted.
    pub fn is_ready(&self) -> bool {
        self.state() == ProcessState::Ready
    }

    /// Watch state changes.
    pub fn subscribe(&self) -> watch::Receiver<ProcessState> {
        self.inner.state.subscribe()
    }

    /// Time since the controller was created.
    pub fn uptime(&self) -> Duration {
        self.inner.started_at.elapsed()
    }

    /// Number of invocations currently holding a guard.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.count.load(Ordering::SeqCst)
    }

    /// Token cancelled once the process reaches `Stopped`.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    /// `Starting → Ready`.
    pub fn mark_ready(&self) -> Result<(), LifecycleError> {
        self.transition(ProcessState::Ready)
    }

    /// `Starting|Ready → Draining`.
    pub fn begin_draining(&self) -> Result<(), LifecycleError> {
        self.transition(ProcessState::Draining)
    }

    /// `Starting|Draining → Stopped`.
    pub fn mark_stopped(&self) -> Result<(), LifecycleError> {
        self.transition(ProcessState::Stopped)
    }

    fn transition(&self, next: ProcessState) -> Result<(), LifecycleError> {
        let mut result = Ok(());
        self.inner.state.send_if_modified(|current| {
            if current.can_transition_to(next) {
                debug!("Lifecycle: {} -> {}", current, next);
                *current = next;
                true
            } else {
                result = Err(LifecycleError::InvalidTransition {
                    from: *current,
                    to: next,
                });
                false
            }
        });
        result?;

        info!("Server state: {}", next);
        if next == ProcessState::Stopped {
            self.inner.shutdown.cancel();
        }
        Ok(())
    }

    /// Register an invocation. Returns `None` unless the process is `Ready`.
    ///
    /// The count is raised before the state is checked, so a caller that
    /// observes `Ready` is always visible to a concurrent [`wait_idle`].
    ///
    /// [`wait_idle`]: Lifecycle::wait_idle
    pub fn try_begin(&self) -> Option<InFlightGuard> {
        let guard = InFlightGuard::new(Arc::clone(&self.inner.in_flight));
        if self.is_ready() { Some(guard) } else { None }
    }

    /// Wait until no invocation is in flight or `grace` elapses.
    ///
    /// Returns `true` when everything finished in time.
    pub async fn wait_idle(&self, grace: Duration) -> bool {
        let deadline = Instant::now() + grace;
        let in_flight = &self.inner.in_flight;

        loop {
            let notified = in_flight.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let remaining = in_flight.count.load(Ordering::SeqCst);
            if remaining == 0 {
                return true;
            }
            debug!("Waiting for {} in-flight invocations", remaining);

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return in_flight.count.load(Ordering::SeqCst) == 0;
            }
        }
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifecycle")
            .field("state", &self.state())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

/// Marks one running invocation; dropping it releases the slot.
#[must_use = "the invocation is only counted while the guard is alive"]
pub struct InFlightGuard {
    in_flight: Arc<InFlight>,
}

impl InFlightGuard {
    fn new(in_flight: Arc<InFlight>) -> Self {
        in_flight.count.fetch_add(1, Ordering::SeqCst);
        Self { in_flight }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.in_flight.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.in_flight.idle.notify_waiters();
        }
    }
}
