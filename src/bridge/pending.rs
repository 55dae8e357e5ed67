// One-shot completion primitive for in-flight server requests
//
// Every asynchronous request gets its own uniquely-owned pair: the caller
// keeps the `PendingOp` and blocks on it, the request callback receives the
// `Completion` and must fire it exactly once. Firing consumes the handle;
// dropping an unfired handle signals an abort, so a waiter can never be left
// sleeping because a callback forgot to signal on an error path.

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::error::{ControlError, Result};

/// Bounded-wait policy applied to every wait path.
///
/// A wait is at most `cycles` rounds of `cycle` each; exceeding the budget is
/// a hard [`ControlError::OperationTimeout`], never silent progress.
#[derive(Debug, Clone, Copy)]
pub struct WaitPolicy {
    /// Maximum number of wait rounds before giving up.
    pub cycles: u32,
    /// Length of one wait round.
    pub cycle: Duration,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            cycles: 100,
            cycle: Duration::from_millis(50),
        }
    }
}

/// Terminal state of one request, as reported by its callback.
#[derive(Debug)]
enum Outcome<T> {
    Done(T),
    Failed(String),
    Aborted,
}

struct Shared<T> {
    slot: Mutex<Option<Outcome<T>>>,
    cond: Condvar,
}

/// Caller-side handle for one in-flight request.
pub struct PendingOp<T> {
    shared: Arc<Shared<T>>,
}

/// Callback-side handle; fires exactly once.
pub struct Completion<T> {
    shared: Option<Arc<Shared<T>>>,
}

/// Create a connected pair for one request.
pub fn pending<T>() -> (PendingOp<T>, Completion<T>) {
    let shared = Arc::new(Shared {
        slot: Mutex::new(None),
        cond: Condvar::new(),
    });
    (
        PendingOp {
            shared: Arc::clone(&shared),
        },
        Completion {
            shared: Some(shared),
        },
    )
}

impl<T> PendingOp<T> {
    /// Block until the completion fires, within the bounded wait policy.
    pub fn wait(self, policy: &WaitPolicy) -> Result<T> {
        let mut slot = self
            .shared
            .slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut spent = 0u32;
        while slot.is_none() {
            if spent >= policy.cycles {
                return Err(ControlError::OperationTimeout {
                    cycles: policy.cycles,
                });
            }
            let (guard, _timed_out) = self
                .shared
                .cond
                .wait_timeout(slot, policy.cycle)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            slot = guard;
            spent += 1;
        }

        match slot.take() {
            Some(Outcome::Done(value)) => Ok(value),
            Some(Outcome::Failed(message)) => Err(ControlError::ServerError(message)),
            Some(Outcome::Aborted) | None => Err(ControlError::Aborted),
        }
    }

    /// Whether the completion has already fired.
    pub fn is_complete(&self) -> bool {
        self.shared
            .slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_some()
    }
}

impl<T> Completion<T> {
    fn settle(mut self, outcome: Outcome<T>) {
        if let Some(shared) = self.shared.take() {
            let mut slot = shared
                .slot
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            // The outcome is written before the signal, so a waiter that
            // checks after a timed-out round still observes it.
            *slot = Some(outcome);
            shared.cond.notify_all();
        }
    }

    /// Report success with the request's result.
    pub fn resolve(self, value: T) {
        self.settle(Outcome::Done(value));
    }

    /// Report a server-side failure with its diagnostic text.
    pub fn fail(self, message: impl Into<String>) {
        self.settle(Outcome::Failed(message.into()));
    }
}

impl<T> Drop for Completion<T> {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            let mut slot = shared
                .slot
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if slot.is_none() {
                *slot = Some(Outcome::Aborted);
                shared.cond.notify_all();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    fn quick_policy() -> WaitPolicy {
        WaitPolicy {
            cycles: 5,
            cycle: Duration::from_millis(10),
        }
    }

    #[test]
    fn test_resolve_before_wait_returns_immediately() {
        let (op, completion) = pending::<u32>();
        completion.resolve(42);
        assert!(op.is_complete());
        assert_eq!(op.wait(&quick_policy()).unwrap(), 42);
    }

    #[test]
    fn test_resolve_from_another_thread_wakes_waiter() {
        let (op, completion) = pending::<String>();
        let worker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(15));
            completion.resolve("done".to_string());
        });
        let value = op.wait(&WaitPolicy::default()).unwrap();
        assert_eq!(value, "done");
        worker.join().unwrap();
    }

    #[test]
    fn test_unfired_completion_times_out_within_budget() {
        let policy = quick_policy();
        let (op, completion) = pending::<()>();
        let start = Instant::now();
        let err = op.wait(&policy).unwrap_err();
        // Keep the completion alive past the wait so the timeout path is the
        // one exercised, not the drop-abort path.
        drop(completion);
        assert!(matches!(err, ControlError::OperationTimeout { cycles: 5 }));
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_dropped_completion_aborts_waiter() {
        let (op, completion) = pending::<()>();
        drop(completion);
        assert!(matches!(
            op.wait(&WaitPolicy::default()),
            Err(ControlError::Aborted)
        ));
    }

    #[test]
    fn test_failure_carries_server_diagnostic() {
        let (op, completion) = pending::<()>();
        completion.fail("no such entity");
        match op.wait(&quick_policy()) {
            Err(ControlError::ServerError(message)) => assert_eq!(message, "no such entity"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
