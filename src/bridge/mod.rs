// Synchronous-call bridge over the asynchronous sound-server protocol
//
// The server link runs its event loop on one dedicated background thread and
// delivers every completion callback there. All other threads are callers
// that block inside `run_and_wait` until their operation's callback has fired
// its single signal. Waits are bounded everywhere, including connect; running
// out of budget is a hard timeout error.

pub mod pending;

use std::sync::{Arc, Condvar, Mutex};

use tracing::{debug, info, warn};

use crate::error::{ControlError, Result};
use crate::server::ServerLink;

pub use pending::{pending, Completion, PendingOp, WaitPolicy};

/// Lifecycle of the server connection as reported by the link's notifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Ready,
    Failed,
    Terminated,
}

impl ConnectionState {
    /// Failed and Terminated are terminal; no transition leaves them.
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Failed | ConnectionState::Terminated)
    }
}

struct StateCell {
    state: Mutex<ConnectionState>,
    cond: Condvar,
}

/// Handle through which a link's state notifier publishes transitions.
#[derive(Clone)]
pub struct StateTx {
    cell: Arc<StateCell>,
}

impl StateTx {
    /// Publish a state transition and wake anyone waiting on the connection.
    pub fn transition(&self, next: ConnectionState) {
        let mut state = self
            .cell
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if state.is_terminal() {
            // Late notifications after failure are ignored.
            return;
        }
        *state = next;
        self.cell.cond.notify_all();
    }
}

/// Owns the server connection and exposes the one blocking primitive every
/// other component uses: submit a request, block until its callback fires,
/// return the result.
pub struct Bridge<L: ServerLink> {
    link: L,
    states: Arc<StateCell>,
    submit_lock: Mutex<()>,
    policy: WaitPolicy,
}

impl<L: ServerLink> Bridge<L> {
    /// Open the connection and block until it is ready.
    ///
    /// Starts the link's event-loop thread, registers the state notifier, and
    /// waits (bounded) for `Ready`. Reaching `Failed`/`Terminated` first, or
    /// exhausting the wait budget, fails the whole construction.
    pub fn connect(link: L, policy: WaitPolicy) -> Result<Self> {
        let states = Arc::new(StateCell {
            state: Mutex::new(ConnectionState::Connecting),
            cond: Condvar::new(),
        });

        if let Err(err) = link.start(StateTx {
            cell: Arc::clone(&states),
        }) {
            link.shutdown();
            return Err(ControlError::ConnectionFailed(err.to_string()));
        }

        let mut guard = states
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut spent = 0u32;
        loop {
            match *guard {
                ConnectionState::Ready => break,
                state if state.is_terminal() => {
                    drop(guard);
                    link.shutdown();
                    return Err(ControlError::ConnectionFailed(format!(
                        "connection reached {state:?} before becoming ready"
                    )));
                }
                _ => {
                    if spent >= policy.cycles {
                        drop(guard);
                        link.shutdown();
                        warn!(cycles = policy.cycles, "timed out waiting for the connection");
                        return Err(ControlError::ConnectionFailed(
                            "timed out waiting for the connection to become ready".to_string(),
                        ));
                    }
                    let (g, _) = states
                        .cond
                        .wait_timeout(guard, policy.cycle)
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                    guard = g;
                    spent += 1;
                }
            }
        }
        drop(guard);

        info!("sound server connection ready");
        Ok(Self {
            link,
            states,
            submit_lock: Mutex::new(()),
            policy,
        })
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self
            .states
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Submit one request and block until its completion fires.
    ///
    /// The closure receives the link and the request's uniquely-owned
    /// [`Completion`]; a submission that resolves the completion before
    /// returning is treated as already finished and never blocks. Callers not
    /// on the event-loop thread serialize submissions through the bridge
    /// lock; completion callbacks re-entering from the loop thread skip it,
    /// since taking it there would self-deadlock.
    pub fn run_and_wait<T>(&self, submit: impl FnOnce(&L, Completion<T>)) -> Result<T> {
        let (op, completion) = pending();

        let guard = if self.link.in_loop_thread() {
            None
        } else {
            Some(
                self.submit_lock
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner()),
            )
        };
        submit(&self.link, completion);
        drop(guard);

        op.wait(&self.policy)
    }

    /// The wait policy applied to every blocking call on this bridge.
    pub fn policy(&self) -> &WaitPolicy {
        &self.policy
    }

    /// Direct access to the link, for state inspection only.
    pub fn link(&self) -> &L {
        &self.link
    }
}

impl<L: ServerLink> Drop for Bridge<L> {
    fn drop(&mut self) {
        debug!("disconnecting from the sound server");
        self.link.shutdown();
    }
}
