// ABOUTME: Scheduler: admits hosts through a FIFO semaphore and drives each host's workflow.
// ABOUTME: Handles fail-fast, explicit stop and the global run deadline.

use super::cancel::{StopReason, StopSignal};
use super::collector::{Report, RunHandle, Sink};
use super::connect::{CLOSE_TIMEOUT, PhaseObserver, establish};
use super::execute::execute;
use super::options::RunConfig;
use crate::error::{Error, Result};
use crate::transport::Transport;
use crate::types::{HostState, Job, Outcome, OutcomeKind, Target};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{Instrument, debug, info, info_span, warn};

/// How long a host stopped by the deadline waits for the peer to acknowledge the
/// disconnect. Hosts still unreported after `CLOSE_TIMEOUT` plus this are filled in.
const DEADLINE_GRACE: Duration = Duration::from_secs(1);

/// Runs one job across many targets with bounded concurrency.
pub struct Runner<T: Transport> {
    transport: Arc<T>,
    config: Arc<RunConfig>,
}

impl<T: Transport> std::fmt::Debug for Runner<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<T: Transport> Runner<T> {
    pub fn new(transport: T, config: RunConfig) -> Self {
        Self::with_transport(Arc::new(transport), config)
    }

    /// Use a transport that is shared with other owners.
    pub fn with_transport(transport: Arc<T>, config: RunConfig) -> Self {
        Self {
            transport,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Start a run and return a handle that streams outcomes as hosts finish.
    ///
    /// Fails without contacting any host if the targets, job or limits are unusable.
    /// Must be called from within a tokio runtime.
    pub fn spawn(&self, targets: Vec<Target>, job: Job) -> Result<RunHandle> {
        validate(&targets, &job, &self.config)?;

        let targets: Arc<[Target]> = targets.into();
        let (sink, board, rx) = Sink::new(targets.len());
        let stop = StopSignal::new();
        let handle = RunHandle::new(Arc::clone(&targets), board, rx, stop.clone());

        info!(
            hosts = targets.len(),
            concurrency = self.config.concurrency,
            "starting run"
        );

        if let Some(deadline) = self.config.deadline {
            tokio::spawn(watch_deadline(deadline, stop.clone(), sink.clone()));
        }

        let dispatcher = Dispatcher {
            transport: Arc::clone(&self.transport),
            config: Arc::clone(&self.config),
            job: Arc::new(job),
            targets,
            sink,
            stop,
        };
        tokio::spawn(dispatcher.run());

        Ok(handle)
    }

    /// Run to completion and return every target's outcome.
    pub async fn run(&self, targets: Vec<Target>, job: Job) -> Result<Report> {
        Ok(self.spawn(targets, job)?.collect().await)
    }
}

fn validate(targets: &[Target], job: &Job, config: &RunConfig) -> Result<()> {
    if targets.is_empty() {
        return Err(Error::NoTargets);
    }
    if config.concurrency == 0 {
        return Err(Error::InvalidConcurrency);
    }
    job.validate()?;

    let mut seen = HashSet::with_capacity(targets.len());
    for target in targets {
        let id = target.id();
        if !seen.insert(id.clone()) {
            return Err(Error::DuplicateTarget(id));
        }
    }
    Ok(())
}

/// Admits hosts in submission order as permits free up.
struct Dispatcher<T: Transport> {
    transport: Arc<T>,
    config: Arc<RunConfig>,
    job: Arc<Job>,
    targets: Arc<[Target]>,
    sink: Sink,
    stop: StopSignal,
}

impl<T: Transport> Dispatcher<T> {
    async fn run(self) {
        // tokio's semaphore is fair, so waiters are admitted in FIFO order.
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));

        for (index, target) in self.targets.iter().enumerate() {
            let permit = tokio::select! {
                biased;
                reason = self.stop.stopped() => {
                    self.cancel_queued(index, reason);
                    return;
                }
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => {
                        self.cancel_queued(index, StopReason::Requested);
                        return;
                    }
                },
            };

            if let Some(reason) = self.stop.reason() {
                self.cancel_queued(index, reason);
                return;
            }

            self.sink.set_state(index, HostState::Connecting);
            let host = HostContext {
                index,
                target: target.clone(),
                job: Arc::clone(&self.job),
                transport: Arc::clone(&self.transport),
                config: Arc::clone(&self.config),
                sink: self.sink.clone(),
                stop: self.stop.clone(),
            };
            let span = info_span!("host", host = %target);
            tokio::spawn(host.run(permit).instrument(span));
        }
    }

    /// Hosts from `from` onwards were never admitted.
    fn cancel_queued(&self, from: usize, reason: StopReason) {
        let count = self.targets.len().saturating_sub(from);
        if count > 0 {
            debug!(count, ?reason, "cancelling queued hosts");
        }
        for index in from..self.targets.len() {
            self.sink.finish(index, Outcome::Cancelled);
        }
    }
}

/// Everything one host task needs; nothing here is shared mutably except the sink.
struct HostContext<T: Transport> {
    index: usize,
    target: Target,
    job: Arc<Job>,
    transport: Arc<T>,
    config: Arc<RunConfig>,
    sink: Sink,
    stop: StopSignal,
}

impl<T: Transport> HostContext<T> {
    async fn run(self, permit: OwnedSemaphorePermit) {
        let outcome = self.drive().await;

        match outcome.kind() {
            OutcomeKind::Success => info!(outcome = %outcome, "host finished"),
            _ => warn!(outcome = %outcome, "host finished"),
        }

        let failed = !outcome.is_success();
        self.sink.finish(self.index, outcome);

        if failed && !self.config.continue_on_error && self.stop.stop(StopReason::FailFast) {
            info!("stopping run after first failure");
        }

        // The slot frees only after the session is closed and the outcome recorded.
        drop(permit);
    }

    /// Connect, authenticate and execute, closing the session on every path.
    async fn drive(&self) -> Outcome {
        debug!("connecting");
        let connecting = establish(
            self.transport.as_ref(),
            &self.target,
            self.config.connect_timeout,
            self.config.auth_timeout,
            self,
        );
        let session = tokio::select! {
            reason = self.stop.stopped() => return reason.outcome(),
            result = connecting => match result {
                Ok(session) => session,
                Err(e) => return e.into(),
            },
        };

        debug!("executing");
        self.sink.set_state(self.index, HostState::Executing);
        let limit = self.target.timeout.unwrap_or(self.config.job_timeout);
        let outcome = tokio::select! {
            reason = self.stop.stopped() => reason.outcome(),
            outcome = execute(&session, &self.target, &self.job, limit, self.config.output_limit) => outcome,
        };

        // Past the deadline the peer gets only the grace period to acknowledge the disconnect.
        match self.stop.reason() {
            Some(StopReason::Deadline) => session.close_within(DEADLINE_GRACE).await,
            _ => session.close().await,
        }
        outcome
    }
}

impl<T: Transport> PhaseObserver for HostContext<T> {
    fn authenticating(&self) {
        debug!("authenticating");
        self.sink.set_state(self.index, HostState::Authenticating);
    }
}

/// Stop the run when the deadline passes, then fill in any host that still has
/// not reported once the grace period is over.
async fn watch_deadline(deadline: Duration, stop: StopSignal, sink: Sink) {
    tokio::select! {
        _ = sink.completed() => return,
        _ = tokio::time::sleep(deadline) => {}
    }

    if stop.stop(StopReason::Deadline) {
        warn!(?deadline, "run deadline reached");
    }

    tokio::select! {
        _ = sink.completed() => return,
        _ = tokio::time::sleep(CLOSE_TIMEOUT + DEADLINE_GRACE) => {}
    }

    let filled = sink.fill_unfinished();
    if filled > 0 {
        warn!(count = filled, "hosts did not wind down after the deadline");
    }
}
