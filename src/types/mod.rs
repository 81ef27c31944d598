// ABOUTME: Domain model for a run: targets, the job, and per-host outcomes.
// ABOUTME: All of these are immutable once a run has started.

mod job;
mod outcome;
mod target;

pub use job::{Direction, Job, JobError, Transfer};
pub use outcome::{CommandOutput, HostState, Outcome, OutcomeKind};
pub use target::{AuthMethod, Secret, Target, TargetId};
