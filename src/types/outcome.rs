// ABOUTME: Terminal per-host results and the per-host workflow states.
// ABOUTME: Exactly one Outcome is recorded for every target of a run.

use std::fmt;

/// Captured result of a remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit status reported by the server, if it sent one.
    pub exit_code: Option<u32>,
    /// Signal name when the remote process was killed instead of exiting.
    pub signal: Option<String>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Set when either stream exceeded the capture limit and was cut short.
    pub truncated: bool,
    /// Transport-level reason when no exit status could be obtained.
    pub error: Option<String>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    pub(crate) fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// Terminal result for one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Command exited with status 0.
    Success(CommandOutput),
    /// Transfer completed and the byte count matched the source size.
    Transferred { bytes: u64 },
    /// TCP connect, DNS, handshake or host key verification failed.
    ConnectFailed(String),
    /// Every configured authentication method was rejected; holds the last reason.
    AuthFailed(String),
    /// Command ran but did not exit with status 0.
    CommandFailed(CommandOutput),
    TransferFailed(String),
    /// A per-host timeout or the run deadline fired while the host was active.
    TimedOut,
    /// The run was stopped before or while this host was active.
    Cancelled,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_) | Outcome::Transferred { .. })
    }

    pub fn kind(&self) -> OutcomeKind {
        match self {
            Outcome::Success(_) | Outcome::Transferred { .. } => OutcomeKind::Success,
            Outcome::CommandFailed(output) if output.exit_code.is_some() => OutcomeKind::Warning,
            _ => OutcomeKind::Failure,
        }
    }

    /// Stable snake_case label, used in JSON output.
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Success(_) => "success",
            Outcome::Transferred { .. } => "transferred",
            Outcome::ConnectFailed(_) => "connect_failed",
            Outcome::AuthFailed(_) => "auth_failed",
            Outcome::CommandFailed(_) => "command_failed",
            Outcome::TransferFailed(_) => "transfer_failed",
            Outcome::TimedOut => "timed_out",
            Outcome::Cancelled => "cancelled",
        }
    }

    pub fn command_output(&self) -> Option<&CommandOutput> {
        match self {
            Outcome::Success(output) | Outcome::CommandFailed(output) => Some(output),
            _ => None,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success(_) => write!(f, "success"),
            Outcome::Transferred { bytes } => write!(f, "transferred {bytes} bytes"),
            Outcome::ConnectFailed(reason) => write!(f, "connection failed: {reason}"),
            Outcome::AuthFailed(reason) => write!(f, "authentication failed: {reason}"),
            Outcome::CommandFailed(output) => match (output.exit_code, &output.signal, &output.error) {
                (Some(code), _, _) => write!(f, "exit status = {code}"),
                (None, Some(signal), _) => write!(f, "killed by signal {signal}"),
                (None, None, Some(error)) => write!(f, "command failed: {error}"),
                (None, None, None) => write!(f, "command ended without exit status"),
            },
            Outcome::TransferFailed(reason) => write!(f, "transfer failed: {reason}"),
            Outcome::TimedOut => write!(f, "timed out"),
            Outcome::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Coarse classification used for summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    Success,
    /// The command ran to completion but exited non-zero.
    Warning,
    Failure,
}

/// Where a host currently is in its workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostState {
    /// Queued behind the concurrency limit.
    Pending,
    Connecting,
    Authenticating,
    Executing,
    Succeeded,
    Failed,
    TimedOut,
    Cancelled,
}

impl HostState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            HostState::Succeeded | HostState::Failed | HostState::TimedOut | HostState::Cancelled
        )
    }

    /// True once the host has been admitted past the concurrency gate.
    pub fn was_admitted(&self) -> bool {
        !matches!(self, HostState::Pending | HostState::Cancelled)
    }
}

impl From<&Outcome> for HostState {
    fn from(outcome: &Outcome) -> Self {
        match outcome {
            Outcome::Success(_) | Outcome::Transferred { .. } => HostState::Succeeded,
            Outcome::TimedOut => HostState::TimedOut,
            Outcome::Cancelled => HostState::Cancelled,
            _ => HostState::Failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nonzero_exit_is_a_warning() {
        let outcome = Outcome::CommandFailed(CommandOutput {
            exit_code: Some(3),
            ..Default::default()
        });
        assert_eq!(outcome.kind(), OutcomeKind::Warning);
        assert_eq!(outcome.to_string(), "exit status = 3");
    }

    #[test]
    fn missing_exit_status_is_a_failure() {
        let outcome = Outcome::CommandFailed(CommandOutput::failed("channel closed"));
        assert_eq!(outcome.kind(), OutcomeKind::Failure);
    }

    #[test]
    fn terminal_states_follow_outcomes() {
        assert_eq!(HostState::from(&Outcome::TimedOut), HostState::TimedOut);
        assert_eq!(
            HostState::from(&Outcome::AuthFailed("no".into())),
            HostState::Failed
        );
        assert!(HostState::Succeeded.is_terminal());
        assert!(!HostState::Executing.is_terminal());
    }
}
