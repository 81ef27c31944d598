// ABOUTME: Result collector: a synchronized per-target sink plus the caller-facing RunHandle.
// ABOUTME: Outcomes stream out in completion order; the final Report is in submission order.

use super::cancel::{StopReason, StopSignal};
use crate::types::{HostState, Outcome, OutcomeKind, Target, TargetId};
use chrono::{DateTime, Utc};
use futures::Stream;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{Notify, mpsc};
use tracing::warn;

#[derive(Debug)]
struct Slot {
    state: HostState,
    outcome: Option<Outcome>,
}

#[derive(Debug)]
struct Slots {
    slots: Vec<Slot>,
    finished: usize,
}

/// Shared per-target state, readable by the caller and written by host tasks.
#[derive(Debug, Clone)]
pub(crate) struct Board {
    inner: Arc<Mutex<Slots>>,
}

impl Board {
    fn new(count: usize) -> Self {
        let slots = (0..count)
            .map(|_| Slot {
                state: HostState::Pending,
                outcome: None,
            })
            .collect();
        Self {
            inner: Arc::new(Mutex::new(Slots { slots, finished: 0 })),
        }
    }

    fn set_state(&self, index: usize, state: HostState) {
        let mut inner = self.inner.lock();
        if let Some(slot) = inner.slots.get_mut(index) {
            if slot.outcome.is_none() {
                slot.state = state;
            }
        }
    }

    /// Store an outcome unless one is already present. The first write wins.
    fn record(&self, index: usize, outcome: Outcome) -> bool {
        let mut inner = self.inner.lock();
        let Some(slot) = inner.slots.get_mut(index) else {
            return false;
        };
        if let Some(existing) = &slot.outcome {
            warn!(
                index,
                existing = existing.label(),
                ignored = outcome.label(),
                "host already has an outcome"
            );
            return false;
        }

        slot.state = HostState::from(&outcome);
        slot.outcome = Some(outcome);
        inner.finished += 1;
        true
    }

    /// Give every unfinished host a terminal outcome: `Cancelled` if it was never
    /// admitted, `TimedOut` otherwise. Returns the indexes that were filled.
    fn fill_unfinished(&self) -> Vec<usize> {
        let unfinished: Vec<(usize, HostState)> = {
            let inner = self.inner.lock();
            inner
                .slots
                .iter()
                .enumerate()
                .filter(|(_, slot)| slot.outcome.is_none())
                .map(|(index, slot)| (index, slot.state))
                .collect()
        };
        unfinished
            .into_iter()
            .filter_map(|(index, state)| {
                let outcome = if state.was_admitted() {
                    Outcome::TimedOut
                } else {
                    Outcome::Cancelled
                };
                self.record(index, outcome).then_some(index)
            })
            .collect()
    }

    fn is_complete(&self) -> bool {
        let inner = self.inner.lock();
        inner.finished == inner.slots.len()
    }

    fn state(&self, index: usize) -> Option<HostState> {
        self.inner.lock().slots.get(index).map(|slot| slot.state)
    }

    fn outcome(&self, index: usize) -> Option<Outcome> {
        self.inner
            .lock()
            .slots
            .get(index)
            .and_then(|slot| slot.outcome.clone())
    }

    fn in_flight(&self) -> usize {
        self.inner
            .lock()
            .slots
            .iter()
            .filter(|slot| slot.outcome.is_none() && slot.state.was_admitted())
            .count()
    }
}

/// Write side of the collector, cloned into every host task.
///
/// The completion stream closes once every clone is dropped.
#[derive(Debug, Clone)]
pub(crate) struct Sink {
    board: Board,
    tx: mpsc::UnboundedSender<usize>,
    complete: Arc<Notify>,
}

impl Sink {
    pub(crate) fn new(count: usize) -> (Self, Board, mpsc::UnboundedReceiver<usize>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let board = Board::new(count);
        let sink = Self {
            board: board.clone(),
            tx,
            complete: Arc::new(Notify::new()),
        };
        (sink, board, rx)
    }

    /// Move a host to a new non-terminal state. Ignored once the host has an outcome.
    pub(crate) fn set_state(&self, index: usize, state: HostState) {
        self.board.set_state(index, state);
    }

    /// Record the terminal outcome for a host and publish it. The first write wins.
    pub(crate) fn finish(&self, index: usize, outcome: Outcome) -> bool {
        if !self.board.record(index, outcome) {
            return false;
        }
        self.publish(index);
        true
    }

    /// Fill every host still without an outcome and publish them.
    pub(crate) fn fill_unfinished(&self) -> usize {
        let filled = self.board.fill_unfinished();
        for &index in &filled {
            self.publish(index);
        }
        filled.len()
    }

    /// Resolves once every host has an outcome.
    pub(crate) async fn completed(&self) {
        let notified = self.complete.notified();
        if self.board.is_complete() {
            return;
        }
        notified.await;
    }

    fn publish(&self, index: usize) {
        // The receiver only disappears when the caller dropped the handle.
        let _ = self.tx.send(index);
        if self.board.is_complete() {
            self.complete.notify_waiters();
        }
    }
}

/// Caller side of a running job.
///
/// Yields `(Target, Outcome)` pairs as hosts finish, or can be collected into a
/// [`Report`]. Dropping the handle stops the run.
pub struct RunHandle {
    targets: Arc<[Target]>,
    index: HashMap<TargetId, usize>,
    board: Board,
    rx: mpsc::UnboundedReceiver<usize>,
    stop: StopSignal,
    remaining: usize,
    salvaged: VecDeque<usize>,
    started_at: DateTime<Utc>,
}

impl RunHandle {
    pub(crate) fn new(
        targets: Arc<[Target]>,
        board: Board,
        rx: mpsc::UnboundedReceiver<usize>,
        stop: StopSignal,
    ) -> Self {
        let index = targets
            .iter()
            .enumerate()
            .map(|(i, target)| (target.id(), i))
            .collect();
        Self {
            remaining: targets.len(),
            targets,
            index,
            board,
            rx,
            stop,
            salvaged: VecDeque::new(),
            started_at: Utc::now(),
        }
    }

    /// Next finished host, in completion order. `None` once every host has reported.
    pub async fn next(&mut self) -> Option<(Target, Outcome)> {
        std::future::poll_fn(|cx| Pin::new(&mut *self).poll_next(cx)).await
    }

    /// Wait for every host and return the aggregate.
    pub async fn collect(mut self) -> Report {
        while self.next().await.is_some() {}
        let entries = self
            .targets
            .iter()
            .enumerate()
            .map(|(i, target)| {
                let outcome = self.board.outcome(i).unwrap_or(Outcome::Cancelled);
                (target.clone(), outcome)
            })
            .collect();
        Report {
            entries,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }

    /// Ask every host to stop. Queued hosts become `Cancelled`.
    pub fn stop(&self) {
        self.stop.stop(StopReason::Requested);
    }

    /// A handle that can stop this run from elsewhere, e.g. a signal handler.
    pub fn stopper(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn state(&self, id: &TargetId) -> Option<HostState> {
        self.index.get(id).and_then(|&i| self.board.state(i))
    }

    /// Hosts currently connecting, authenticating or executing.
    pub fn in_flight(&self) -> usize {
        self.board.in_flight()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    fn take(&mut self, index: usize) -> Option<(Target, Outcome)> {
        let target = self.targets.get(index)?.clone();
        let outcome = self.board.outcome(index)?;
        self.remaining = self.remaining.saturating_sub(1);
        Some((target, outcome))
    }
}

impl Stream for RunHandle {
    type Item = (Target, Outcome);

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if this.remaining == 0 {
                return Poll::Ready(None);
            }
            if let Some(index) = this.salvaged.pop_front() {
                if let Some(item) = this.take(index) {
                    return Poll::Ready(Some(item));
                }
                continue;
            }
            match this.rx.poll_recv(cx) {
                Poll::Ready(Some(index)) => {
                    if let Some(item) = this.take(index) {
                        return Poll::Ready(Some(item));
                    }
                }
                Poll::Ready(None) => {
                    // Every writer is gone; whatever is still open will never report.
                    let filled = this.board.fill_unfinished();
                    if filled.is_empty() {
                        this.remaining = 0;
                        return Poll::Ready(None);
                    }
                    this.salvaged.extend(filled);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl Drop for RunHandle {
    fn drop(&mut self) {
        self.stop.stop(StopReason::Requested);
    }
}

/// Counts of outcomes by kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    pub succeeded: usize,
    /// Commands that ran but exited non-zero.
    pub warned: usize,
    pub failed: usize,
}

/// Every target's outcome, in the order the targets were submitted.
#[derive(Debug, Clone)]
pub struct Report {
    entries: Vec<(Target, Outcome)>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl Report {
    pub fn get(&self, id: &TargetId) -> Option<&Outcome> {
        self.entries
            .iter()
            .find(|(target, _)| &target.id() == id)
            .map(|(_, outcome)| outcome)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Target, &Outcome)> {
        self.entries.iter().map(|(target, outcome)| (target, outcome))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Outcomes keyed by target identity.
    pub fn outcomes(&self) -> BTreeMap<TargetId, Outcome> {
        self.entries
            .iter()
            .map(|(target, outcome)| (target.id(), outcome.clone()))
            .collect()
    }

    pub fn summary(&self) -> Summary {
        let mut summary = Summary::default();
        for (_, outcome) in &self.entries {
            match outcome.kind() {
                OutcomeKind::Success => summary.succeeded += 1,
                OutcomeKind::Warning => summary.warned += 1,
                OutcomeKind::Failure => summary.failed += 1,
            }
        }
        summary
    }

    pub fn all_succeeded(&self) -> bool {
        self.entries.iter().all(|(_, outcome)| outcome.is_success())
    }
}
