// ABOUTME: Connection manager: transport connect then ordered authentication for one target.
// ABOUTME: Produces a Session that must be closed on every exit path.

use crate::transport::{AuthResult, Connection, Transport};
use crate::types::{Outcome, Target};
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Why a session could not be established.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    Connect(String),
    Auth(String),
}

impl From<ConnectError> for Outcome {
    fn from(err: ConnectError) -> Self {
        match err {
            ConnectError::Connect(reason) => Outcome::ConnectFailed(reason),
            ConnectError::Auth(reason) => Outcome::AuthFailed(reason),
        }
    }
}

/// An authenticated connection owned by exactly one host task.
pub struct Session<C: Connection> {
    connection: C,
}

impl<C: Connection> Session<C> {
    pub fn connection(&self) -> &C {
        &self.connection
    }

    /// Close the underlying connection. Errors are logged, not returned.
    ///
    /// A peer that does not answer the disconnect within `CLOSE_TIMEOUT` is dropped.
    pub async fn close(self) {
        self.close_within(CLOSE_TIMEOUT).await;
    }

    /// Like [`Session::close`], but gives the peer only `limit` to answer.
    pub async fn close_within(self, limit: Duration) {
        close_quietly(self.connection, limit).await;
    }
}

/// Signals that the connect/authenticate phase moved on, for state tracking.
pub trait PhaseObserver {
    fn authenticating(&self);
}

impl PhaseObserver for () {
    fn authenticating(&self) {}
}

/// Connect to `target` and authenticate with the first accepted method.
///
/// Dropping the returned future at any await point drops the connection with it.
pub async fn establish<T: Transport>(
    transport: &T,
    target: &Target,
    connect_timeout: Duration,
    auth_timeout: Duration,
    observer: &impl PhaseObserver,
) -> Result<Session<T::Connection>, ConnectError> {
    let mut connection = match timeout(connect_timeout, transport.connect(target)).await {
        Ok(Ok(connection)) => connection,
        Ok(Err(e)) => return Err(ConnectError::Connect(e.to_string())),
        Err(_) => {
            return Err(ConnectError::Connect(format!(
                "timed out after {:?}",
                connect_timeout
            )));
        }
    };

    observer.authenticating();

    if target.auth.is_empty() {
        close_quietly(connection, auth_timeout).await;
        return Err(ConnectError::Auth("no authentication methods configured".to_string()));
    }

    let mut last_reason = String::new();
    for method in &target.auth {
        debug!(method = method.name(), "trying authentication method");
        let attempt = timeout(auth_timeout, connection.authenticate(&target.user, method)).await;
        last_reason = match attempt {
            Ok(Ok(AuthResult::Accepted)) => {
                debug!(method = method.name(), "authenticated");
                return Ok(Session { connection });
            }
            Ok(Ok(AuthResult::Rejected(reason))) => format!("{}: {}", method.name(), reason),
            Ok(Err(e)) => format!("{}: {}", method.name(), e),
            Err(_) => format!("{}: timed out after {:?}", method.name(), auth_timeout),
        };
        debug!(reason = %last_reason, "authentication method failed");
    }

    close_quietly(connection, auth_timeout).await;
    Err(ConnectError::Auth(last_reason))
}

async fn close_quietly<C: Connection>(connection: C, limit: Duration) {
    match timeout(limit, connection.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!("error while closing connection: {}", e),
        Err(_) => debug!("closing connection timed out; dropping it"),
    }
}
