// ABOUTME: Run-wide limits: concurrency, per-phase timeouts, deadline and capture size.
// ABOUTME: Built by callers and passed unchanged to every host task of a run.

use std::time::Duration;

pub const DEFAULT_CONCURRENCY: usize = 10;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_OUTPUT_LIMIT: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    /// Maximum number of hosts connecting, authenticating or executing at once.
    pub concurrency: usize,
    pub connect_timeout: Duration,
    /// Applies to each authentication method separately.
    pub auth_timeout: Duration,
    /// Bound on one command or transfer. `Target::timeout` overrides it per host.
    pub job_timeout: Duration,
    /// Wall-clock bound on the whole run, measured from spawn.
    pub deadline: Option<Duration>,
    /// When false, the first failed host stops the run.
    pub continue_on_error: bool,
    /// Bytes kept per output stream; the remainder is discarded.
    pub output_limit: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            auth_timeout: DEFAULT_AUTH_TIMEOUT,
            job_timeout: DEFAULT_JOB_TIMEOUT,
            deadline: None,
            continue_on_error: true,
            output_limit: DEFAULT_OUTPUT_LIMIT,
        }
    }
}

impl RunConfig {
    pub fn concurrency(mut self, limit: usize) -> Self {
        self.concurrency = limit;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn auth_timeout(mut self, timeout: Duration) -> Self {
        self.auth_timeout = timeout;
        self
    }

    pub fn job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }

    pub fn output_limit(mut self, bytes: usize) -> Self {
        self.output_limit = bytes;
        self
    }
}
