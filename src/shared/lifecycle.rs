//! The `Created → Running → Closing → Closed` state machine shared by every
//! component that owns a worker.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::component::State;

/// Tracks the state of one component and signals its shutdown.
///
/// `shutdown` is cancelled when a close is requested and `closed` when the
/// worker has fully stopped, so [`Lifecycle::wait_for_close`] waits on an
/// actual completion signal instead of polling.
#[derive(Debug)]
pub(crate) struct Lifecycle {
    state: Mutex<State>,
    shutdown: CancellationToken,
    closed: CancellationToken,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(State::Created),
            shutdown: CancellationToken::new(),
            closed: CancellationToken::new(),
        }
    }

    pub(crate) fn state(&self) -> State {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Moves `Created` to `Running`. Any other state is returned as the error,
    /// since a component never re-enters `Running`.
    pub(crate) fn start(&self) -> Result<(), State> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match *state {
            State::Created => {
                *state = State::Running;
                Ok(())
            }
            other => Err(other),
        }
    }

    /// Requests shutdown. Idempotent, and never blocks.
    ///
    /// A component that never started has nothing to drain and goes straight
    /// to `Closed`.
    pub(crate) fn close_async(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match *state {
            State::Created => {
                *state = State::Closed;
                self.shutdown.cancel();
                self.closed.cancel();
            }
            State::Running => {
                *state = State::Closing;
                self.shutdown.cancel();
            }
            State::Closing | State::Closed => {}
        }
    }

    /// Cancelled once a close has been requested.
    pub(crate) fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Returns a guard that marks the component `Closed` when dropped. The
    /// worker holds it for its whole run so that even a panicking worker
    /// releases anyone waiting on close.
    pub(crate) fn closed_guard(self: &Arc<Self>) -> ClosedGuard {
        ClosedGuard {
            lifecycle: Arc::clone(self),
        }
    }

    /// Waits until the component is `Closed`. Returns false if `timeout`
    /// elapsed first; the component keeps shutting down in that case.
    pub(crate) async fn wait_for_close(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.closed.cancelled())
            .await
            .is_ok()
    }

    fn mark_closed(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        *state = State::Closed;
        self.shutdown.cancel();
        self.closed.cancel();
    }
}

/// Marks the owning component as closed on drop.
#[derive(Debug)]
pub(crate) struct ClosedGuard {
    lifecycle: Arc<Lifecycle>,
}

impl Drop for ClosedGuard {
    fn drop(&mut self) {
        self.lifecycle.mark_closed();
    }
}
