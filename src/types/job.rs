// ABOUTME: The single unit of work applied to every target in a run.
// ABOUTME: Either a shell command or an SCP transfer in one direction.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum JobError {
    #[error("command cannot be empty")]
    EmptyCommand,

    #[error("local path cannot be empty")]
    EmptyLocalPath,

    #[error("remote path cannot be empty")]
    EmptyRemotePath,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Local file to remote path.
    Upload,
    /// Remote file into a local directory, one file per host.
    Download,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    pub direction: Direction,
    pub local_path: PathBuf,
    pub remote_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    Command(String),
    Transfer(Transfer),
}

impl Job {
    pub fn command(command: impl Into<String>) -> Self {
        Job::Command(command.into())
    }

    pub fn upload(local_path: impl Into<PathBuf>, remote_path: impl Into<String>) -> Self {
        Job::Transfer(Transfer {
            direction: Direction::Upload,
            local_path: local_path.into(),
            remote_path: remote_path.into(),
        })
    }

    /// Download `remote_path` from every host into `local_dir`.
    ///
    /// Each host's copy is written to `local_dir/<user@host:port>` so hosts never
    /// overwrite each other.
    pub fn download(remote_path: impl Into<String>, local_dir: impl Into<PathBuf>) -> Self {
        Job::Transfer(Transfer {
            direction: Direction::Download,
            local_path: local_dir.into(),
            remote_path: remote_path.into(),
        })
    }

    pub fn validate(&self) -> Result<(), JobError> {
        match self {
            Job::Command(command) if command.trim().is_empty() => Err(JobError::EmptyCommand),
            Job::Command(_) => Ok(()),
            Job::Transfer(transfer) => {
                if transfer.local_path.as_os_str().is_empty() {
                    return Err(JobError::EmptyLocalPath);
                }
                if transfer.remote_path.trim().is_empty() {
                    return Err(JobError::EmptyRemotePath);
                }
                Ok(())
            }
        }
    }
}
