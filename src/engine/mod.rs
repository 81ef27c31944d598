// ABOUTME: The run engine: connection manager, executor, scheduler and result collector.
// ABOUTME: Generic over the transport so it can be driven by russh or by test fakes.

mod cancel;
mod collector;
mod connect;
mod execute;
mod options;
mod scheduler;
pub mod scp;

pub use cancel::{StopReason, StopSignal};
pub use collector::{Report, RunHandle, Summary};
pub use connect::{CLOSE_TIMEOUT, ConnectError, PhaseObserver, Session, establish};
pub use execute::execute;
pub use options::{
    DEFAULT_AUTH_TIMEOUT, DEFAULT_CONCURRENCY, DEFAULT_CONNECT_TIMEOUT, DEFAULT_JOB_TIMEOUT,
    DEFAULT_OUTPUT_LIMIT, RunConfig,
};
pub use scheduler::Runner;
