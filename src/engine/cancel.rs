// ABOUTME: Cooperative run-level stop signal shared by every host task.
// ABOUTME: The first stop reason wins; later requests are ignored.

use crate::types::Outcome;
use tokio::sync::watch;

/// Why a run was stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The global run deadline elapsed.
    Deadline,
    /// The caller asked for the run to stop.
    Requested,
    /// A host failed and the run does not continue on error.
    FailFast,
}

impl StopReason {
    /// Outcome recorded for a host that was interrupted by this stop.
    pub fn outcome(&self) -> Outcome {
        match self {
            StopReason::Deadline => Outcome::TimedOut,
            StopReason::Requested | StopReason::FailFast => Outcome::Cancelled,
        }
    }
}

/// Cloneable handle that can stop a run and be awaited by host tasks.
#[derive(Debug, Clone)]
pub struct StopSignal {
    tx: watch::Sender<Option<StopReason>>,
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// Request a stop. Returns true if this call was the one that stopped the run.
    pub fn stop(&self, reason: StopReason) -> bool {
        self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        })
    }

    pub fn reason(&self) -> Option<StopReason> {
        *self.tx.borrow()
    }

    pub fn is_stopped(&self) -> bool {
        self.reason().is_some()
    }

    /// Resolves once the run has been stopped.
    pub async fn stopped(&self) -> StopReason {
        let mut rx = self.tx.subscribe();
        loop {
            if let Some(reason) = *rx.borrow_and_update() {
                return reason;
            }
            // The sender lives in self, so the channel cannot close while we wait.
            if rx.changed().await.is_err() {
                return StopReason::Requested;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_reason_wins() {
        let signal = StopSignal::new();
        assert!(signal.stop(StopReason::FailFast));
        assert!(!signal.stop(StopReason::Deadline));
        assert_eq!(signal.reason(), Some(StopReason::FailFast));
    }

    #[tokio::test]
    async fn stopped_resolves_for_waiters() {
        let signal = StopSignal::new();
        let waiter = signal.clone();
        let task = tokio::spawn(async move { waiter.stopped().await });
        tokio::task::yield_now().await;
        signal.stop(StopReason::Requested);
        assert_eq!(task.await.unwrap(), StopReason::Requested);
    }

    #[test]
    fn deadline_maps_to_timed_out() {
        assert_eq!(StopReason::Deadline.outcome(), Outcome::TimedOut);
        assert_eq!(StopReason::Requested.outcome(), Outcome::Cancelled);
    }
}
