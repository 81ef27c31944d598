// ABOUTME: Capability traits the engine drives: connect, authenticate, open channels.
// ABOUTME: Implemented by the russh-backed ssh module and by fakes in tests.

use async_trait::async_trait;

use crate::ssh::Result;
use crate::types::{AuthMethod, Target};

/// Server verdict on one authentication attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthResult {
    Accepted,
    /// Rejected by the server, with a human-readable reason.
    Rejected(String),
}

/// Message received from the remote end of a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
    ExitStatus(u32),
    ExitSignal(String),
    Eof,
    Close,
}

/// Opens network connections to targets.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    type Connection: Connection;

    /// Open the transport and complete the protocol handshake, without authenticating.
    async fn connect(&self, target: &Target) -> Result<Self::Connection>;
}

/// One live connection to one host.
///
/// Dropping a connection must release the underlying socket; `close` is the
/// graceful path.
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    type Channel: Channel;

    /// Attempt a single authentication method.
    ///
    /// Local failures (unreadable key, no agent) are returned as errors; a server
    /// refusal is `Ok(AuthResult::Rejected)`.
    async fn authenticate(&mut self, user: &str, method: &AuthMethod) -> Result<AuthResult>;

    async fn open_channel(&self) -> Result<Self::Channel>;

    async fn close(self) -> Result<()>;
}

/// A session channel used for exactly one exec request.
#[async_trait]
pub trait Channel: Send + 'static {
    async fn exec(&mut self, command: &str) -> Result<()>;

    /// Next message from the remote side, or `None` once the channel is gone.
    async fn recv(&mut self) -> Option<ChannelEvent>;

    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Signal end of input to the remote process.
    async fn eof(&mut self) -> Result<()>;

    async fn close(&mut self) -> Result<()>;
}
