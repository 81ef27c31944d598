// ABOUTME: Application-wide error types for herd.
// ABOUTME: Covers configuration and run-setup failures; per-host failures are Outcomes instead.

use crate::types::{JobError, TargetId};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration file not found in {0}")]
    ConfigNotFound(PathBuf),

    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("no targets to run on")]
    NoTargets,

    #[error("duplicate target: {0}")]
    DuplicateTarget(TargetId),

    #[error("invalid job: {0}")]
    InvalidJob(#[from] JobError),

    #[error("concurrency limit must be at least 1")]
    InvalidConcurrency,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Error kind for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The inventory could not be found, read or parsed.
    Config,
    /// The targets, job or limits given to the runner are unusable.
    InvalidRun,
    Io,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ConfigNotFound(_)
            | Error::MissingEnvVar(_)
            | Error::InvalidConfig(_)
            | Error::Yaml(_)
            | Error::Json(_) => ErrorKind::Config,
            Error::NoTargets
            | Error::DuplicateTarget(_)
            | Error::InvalidJob(_)
            | Error::InvalidConcurrency => ErrorKind::InvalidRun,
            Error::Io(_) => ErrorKind::Io,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
