// ABOUTME: SSH-specific error types.
// ABOUTME: Covers connection, host key, authentication material, and channel failures.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("host key for {host}:{port} rejected")]
    HostKeyRejected { host: String, port: u16 },

    #[error("SSH agent not available: {0}")]
    AgentUnavailable(String),

    #[error("failed to load key from {path}: {reason}")]
    KeyLoadFailed { path: PathBuf, reason: String },

    #[error("channel error: {0}")]
    Channel(String),

    #[error("channel closed unexpectedly")]
    ChannelClosed,

    #[error("SSH protocol error: {0}")]
    Protocol(#[from] russh::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_failing_host_or_key() {
        let rejected = Error::HostKeyRejected {
            host: "web-1".to_string(),
            port: 2222,
        };
        assert_eq!(rejected.to_string(), "host key for web-1:2222 rejected");

        let unreadable = Error::KeyLoadFailed {
            path: PathBuf::from("/keys/id_ed25519"),
            reason: "bad passphrase".to_string(),
        };
        assert_eq!(
            unreadable.to_string(),
            "failed to load key from /keys/id_ed25519: bad passphrase"
        );
    }

    #[test]
    fn protocol_errors_convert_from_russh() {
        let err: Error = russh::Error::UnknownKey.into();
        assert!(matches!(err, Error::Protocol(_)));
    }
}
