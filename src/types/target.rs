// ABOUTME: Remote host description: address, port, user and ordered auth methods.
// ABOUTME: TargetId (user@host:port) is the identity that must be unique within a run.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Identity of a target within a run.
///
/// Two targets with the same address, port and username are the same host as far
/// as a run is concerned, and submitting both is a configuration error.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId {
    host: String,
    port: u16,
    user: String,
}

impl TargetId {
    pub fn new(host: impl Into<String>, port: u16, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            user: user.into(),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn user(&self) -> &str {
        &self.user
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // IPv6 literals need brackets so the port separator stays unambiguous.
        if self.host.contains(':') {
            write!(f, "{}@[{}]:{}", self.user, self.host, self.port)
        } else {
            write!(f, "{}@{}:{}", self.user, self.host, self.port)
        }
    }
}

/// A credential value that must not end up in logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// One way of proving the user's identity to a host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMethod {
    /// Plain password authentication.
    Password(Secret),
    /// Public key authentication with a private key file on disk.
    PrivateKey {
        path: PathBuf,
        passphrase: Option<Secret>,
    },
    /// Public key authentication delegated to the running SSH agent.
    Agent,
}

impl AuthMethod {
    pub fn password(password: impl Into<String>) -> Self {
        AuthMethod::Password(Secret::new(password))
    }

    pub fn private_key(path: impl Into<PathBuf>) -> Self {
        AuthMethod::PrivateKey {
            path: path.into(),
            passphrase: None,
        }
    }

    pub fn private_key_with_passphrase(
        path: impl Into<PathBuf>,
        passphrase: impl Into<String>,
    ) -> Self {
        AuthMethod::PrivateKey {
            path: path.into(),
            passphrase: Some(Secret::new(passphrase)),
        }
    }

    /// Short name used in log lines and rejection reasons.
    pub fn name(&self) -> &'static str {
        match self {
            AuthMethod::Password(_) => "password",
            AuthMethod::PrivateKey { .. } => "publickey",
            AuthMethod::Agent => "agent",
        }
    }
}

/// A remote host plus everything needed to reach it.
#[derive(Debug, Clone)]
pub struct Target {
    pub host: String,
    pub port: u16,
    pub user: String,
    /// Methods tried in order; the first accepted one wins.
    pub auth: Vec<AuthMethod>,
    /// Overrides the run-wide job timeout for this host only.
    pub timeout: Option<Duration>,
}

impl Target {
    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 22,
            user: user.into(),
            auth: Vec::new(),
            timeout: None,
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Append an authentication method to the end of the try-list.
    pub fn auth(mut self, method: AuthMethod) -> Self {
        self.auth.push(method);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn id(&self) -> TargetId {
        TargetId::new(&self.host, self.port, &self.user)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.id().fmt(f)
    }
}
