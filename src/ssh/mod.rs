// ABOUTME: SSH client module for remote server connections.
// ABOUTME: Supports password, key and agent authentication with known_hosts verification.

mod client;
mod error;

pub use client::{HostKeyPolicy, SshChannel, SshConfig, SshConnection, SshTransport};
pub use error::{Error, Result};
