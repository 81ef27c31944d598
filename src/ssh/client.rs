// ABOUTME: SSH transport using russh.
// ABOUTME: Handles TCP connect, host key verification, authentication, and exec channels.

use super::error::{Error, Result};
use crate::transport::{AuthResult, Channel, ChannelEvent, Connection, Transport};
use crate::types::{AuthMethod, Target};
use async_trait::async_trait;
use russh::client::{self, Config, Handle, Msg};
use russh::keys::agent::client::AgentClient;
use russh::keys::known_hosts::{
    check_known_hosts, check_known_hosts_path, learn_known_hosts, learn_known_hosts_path,
};
use russh::keys::{PrivateKeyWithHashAlg, load_secret_key, ssh_key};
use russh::{ChannelMsg, Disconnect};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;

/// What to do with server host keys.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HostKeyPolicy {
    /// Only hosts already present in known_hosts are accepted.
    Strict,
    /// Unknown hosts are accepted and learned (Trust On First Use).
    #[default]
    AcceptNew,
    /// No verification at all.
    AcceptAny,
}

/// Transport-wide SSH settings shared by every connection of a run.
#[derive(Debug, Clone)]
pub struct SshConfig {
    pub host_key_policy: HostKeyPolicy,
    /// Optional path to known_hosts file.
    /// If None, uses the default ~/.ssh/known_hosts.
    pub known_hosts_path: Option<PathBuf>,
    /// Idle connections are dropped by russh after this long.
    pub inactivity_timeout: Option<Duration>,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            host_key_policy: HostKeyPolicy::default(),
            known_hosts_path: None,
            inactivity_timeout: Some(Duration::from_secs(30)),
        }
    }
}

impl SshConfig {
    pub fn host_key_policy(mut self, policy: HostKeyPolicy) -> Self {
        self.host_key_policy = policy;
        self
    }

    pub fn known_hosts_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.known_hosts_path = Some(path.into());
        self
    }
}

/// SSH client handler for russh.
pub(crate) struct SshHandler {
    host: String,
    port: u16,
    policy: HostKeyPolicy,
    known_hosts_path: Option<PathBuf>,
}

impl client::Handler for SshHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &ssh_key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        if self.policy == HostKeyPolicy::AcceptAny {
            return Ok(true);
        }

        let check_result = match &self.known_hosts_path {
            Some(path) => check_known_hosts_path(&self.host, self.port, server_public_key, path),
            None => check_known_hosts(&self.host, self.port, server_public_key),
        };

        match check_result {
            Ok(true) => Ok(true),
            Ok(false) if self.policy == HostKeyPolicy::AcceptNew => {
                tracing::warn!(
                    "Trust-On-First-Use: accepting unknown host key for {}:{}",
                    self.host,
                    self.port
                );
                let learn_result = match &self.known_hosts_path {
                    Some(path) => {
                        learn_known_hosts_path(&self.host, self.port, server_public_key, path)
                    }
                    None => learn_known_hosts(&self.host, self.port, server_public_key),
                };
                if let Err(e) = learn_result {
                    tracing::warn!("Failed to save host key to known_hosts: {}", e);
                }
                Ok(true)
            }
            Ok(false) => Ok(false),
            Err(russh::keys::Error::KeyChanged { line }) => {
                tracing::warn!(
                    "Host key for {}:{} does not match known_hosts line {}",
                    self.host,
                    self.port,
                    line
                );
                Ok(false)
            }
            // Unreadable known_hosts is treated like an unknown host.
            Err(_) => Ok(self.policy == HostKeyPolicy::AcceptNew),
        }
    }
}

/// Opens russh connections for a run.
pub struct SshTransport {
    config: SshConfig,
    client_config: Arc<Config>,
}

impl std::fmt::Debug for SshTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshTransport")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SshTransport {
    pub fn new(config: SshConfig) -> Self {
        let client_config = Config {
            inactivity_timeout: config.inactivity_timeout,
            ..Default::default()
        };
        Self {
            config,
            client_config: Arc::new(client_config),
        }
    }
}

impl Default for SshTransport {
    fn default() -> Self {
        Self::new(SshConfig::default())
    }
}

#[async_trait]
impl Transport for SshTransport {
    type Connection = SshConnection;

    async fn connect(&self, target: &Target) -> Result<SshConnection> {
        let stream = TcpStream::connect((target.host.as_str(), target.port))
            .await
            .map_err(|e| Error::Connection(format!("{}:{}: {}", target.host, target.port, e)))?;

        let handler = SshHandler {
            host: target.host.clone(),
            port: target.port,
            policy: self.config.host_key_policy,
            known_hosts_path: self.config.known_hosts_path.clone(),
        };

        let handle = client::connect_stream(Arc::clone(&self.client_config), stream, handler)
            .await
            .map_err(|e| match e {
                russh::Error::UnknownKey => Error::HostKeyRejected {
                    host: target.host.clone(),
                    port: target.port,
                },
                other => Error::Connection(format!(
                    "handshake with {}:{} failed: {}",
                    target.host, target.port, other
                )),
            })?;

        Ok(SshConnection { handle })
    }
}

/// An established russh connection to one host.
pub struct SshConnection {
    handle: Handle<SshHandler>,
}

impl std::fmt::Debug for SshConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshConnection").finish_non_exhaustive()
    }
}

impl SshConnection {
    async fn authenticate_agent(&mut self, user: &str) -> Result<AuthResult> {
        let mut agent = AgentClient::connect_env()
            .await
            .map_err(|e| Error::AgentUnavailable(e.to_string()))?;

        let keys = agent
            .request_identities()
            .await
            .map_err(|e| Error::AgentUnavailable(format!("failed to list agent keys: {}", e)))?;

        if keys.is_empty() {
            return Err(Error::AgentUnavailable("no keys in SSH agent".to_string()));
        }

        for key in &keys {
            match self
                .handle
                .authenticate_publickey_with(user, key.clone(), None, &mut agent)
                .await
            {
                Ok(result) if result.success() => return Ok(AuthResult::Accepted),
                _ => continue,
            }
        }

        Ok(AuthResult::Rejected(format!(
            "none of the {} agent key(s) were accepted",
            keys.len()
        )))
    }

    async fn authenticate_key(
        &mut self,
        user: &str,
        path: &PathBuf,
        passphrase: Option<&str>,
    ) -> Result<AuthResult> {
        // The decrypted key only lives for the duration of this attempt.
        let key = load_secret_key(path, passphrase).map_err(|e| Error::KeyLoadFailed {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        let hash_alg = self.handle.best_supported_rsa_hash().await?.flatten();

        let result = self
            .handle
            .authenticate_publickey(user, PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg))
            .await?;

        if result.success() {
            Ok(AuthResult::Accepted)
        } else {
            Ok(AuthResult::Rejected(format!(
                "public key {} was rejected",
                path.display()
            )))
        }
    }
}

#[async_trait]
impl Connection for SshConnection {
    type Channel = SshChannel;

    async fn authenticate(&mut self, user: &str, method: &AuthMethod) -> Result<AuthResult> {
        match method {
            AuthMethod::Password(password) => {
                let result = self
                    .handle
                    .authenticate_password(user, password.expose())
                    .await?;
                if result.success() {
                    Ok(AuthResult::Accepted)
                } else {
                    Ok(AuthResult::Rejected("password was rejected".to_string()))
                }
            }
            AuthMethod::PrivateKey { path, passphrase } => {
                self.authenticate_key(user, path, passphrase.as_ref().map(|p| p.expose()))
                    .await
            }
            AuthMethod::Agent => self.authenticate_agent(user).await,
        }
    }

    async fn open_channel(&self) -> Result<SshChannel> {
        let inner = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| Error::Channel(format!("failed to open channel: {}", e)))?;
        Ok(SshChannel { inner })
    }

    async fn close(self) -> Result<()> {
        self.handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
            .map_err(Error::Protocol)?;
        Ok(())
    }
}

/// A russh session channel.
pub struct SshChannel {
    inner: russh::Channel<Msg>,
}

#[async_trait]
impl Channel for SshChannel {
    async fn exec(&mut self, command: &str) -> Result<()> {
        self.inner
            .exec(true, command)
            .await
            .map_err(|e| Error::Channel(format!("failed to exec command: {}", e)))
    }

    async fn recv(&mut self) -> Option<ChannelEvent> {
        loop {
            let event = match self.inner.wait().await? {
                ChannelMsg::Data { data } => ChannelEvent::Stdout(data.to_vec()),
                // ext 1 is stderr; other extended streams are not defined.
                ChannelMsg::ExtendedData { data, ext: 1 } => ChannelEvent::Stderr(data.to_vec()),
                ChannelMsg::ExitStatus { exit_status } => ChannelEvent::ExitStatus(exit_status),
                ChannelMsg::ExitSignal { signal_name, .. } => {
                    ChannelEvent::ExitSignal(format!("{:?}", signal_name))
                }
                ChannelMsg::Eof => ChannelEvent::Eof,
                ChannelMsg::Close => ChannelEvent::Close,
                _ => continue,
            };
            return Some(event);
        }
    }

    async fn send(&mut self, data: &[u8]) -> Result<()> {
        self.inner.data(data).await?;
        Ok(())
    }

    async fn eof(&mut self) -> Result<()> {
        self.inner.eof().await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.inner.close().await?;
        Ok(())
    }
}
