// ABOUTME: Inventory types and parsing for herd.yml / herd.json.
// ABOUTME: Turns host entries plus defaults into validated Targets and run settings.

mod auth;
mod host;

pub use auth::{AuthEntry, NamedAuth};
pub use host::HostConfig;

use crate::engine::{
    DEFAULT_AUTH_TIMEOUT, DEFAULT_CONCURRENCY, DEFAULT_CONNECT_TIMEOUT, DEFAULT_JOB_TIMEOUT,
    DEFAULT_OUTPUT_LIMIT, RunConfig,
};
use crate::error::{Error, Result};
use crate::ssh::{HostKeyPolicy, SshConfig};
use crate::types::Target;
use auth::deserialize_auth_list;
use host::HostEntry;
use nonempty::NonEmpty;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILENAME: &str = "herd.yml";
pub const CONFIG_FILENAME_ALT: &str = "herd.yaml";
pub const CONFIG_FILENAME_JSON: &str = "herd.json";

#[derive(Debug, Clone, Deserialize)]
pub struct Inventory {
    #[serde(default)]
    pub defaults: Defaults,

    #[serde(deserialize_with = "deserialize_hosts")]
    pub hosts: NonEmpty<HostConfig>,

    #[serde(default)]
    pub run: RunSettings,

    #[serde(default)]
    pub ssh: SshSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Defaults {
    /// Falls back to `$USER`, then `root`.
    #[serde(default)]
    pub user: Option<String>,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_auth", deserialize_with = "deserialize_auth_list")]
    pub auth: Vec<AuthEntry>,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            user: None,
            port: default_port(),
            auth: default_auth(),
        }
    }
}

fn default_port() -> u16 {
    22
}

fn default_auth() -> Vec<AuthEntry> {
    vec![AuthEntry::Named(NamedAuth::Agent)]
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    /// Zero means one slot per host.
    pub concurrency: usize,
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub auth_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub job_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub deadline: Option<Duration>,
    pub continue_on_error: bool,
    pub output_limit: usize,
}

impl Default for RunSettings {
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

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SshSettings {
    pub host_key: HostKeyPolicy,
    /// Defaults to ~/.ssh/known_hosts.
    pub known_hosts: Option<PathBuf>,
}

impl Inventory {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(Error::from)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(Error::from)
    }

    /// Load a file, picking the format from its extension (YAML unless `.json`).
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json(&content),
            _ => Self::from_yaml(&content),
        }
    }

    pub fn discover(dir: &Path) -> Result<Self> {
        let candidates = [
            dir.join(CONFIG_FILENAME),
            dir.join(CONFIG_FILENAME_ALT),
            dir.join(CONFIG_FILENAME_JSON),
        ];

        for path in &candidates {
            if path.exists() {
                return Self::load(path);
            }
        }

        Err(Error::ConfigNotFound(dir.to_path_buf()))
    }

    /// Build one Target per host, with defaults applied and secrets resolved.
    pub fn targets(&self) -> Result<Vec<Target>> {
        let default_user = self
            .defaults
            .user
            .clone()
            .unwrap_or_else(|| std::env::var("USER").unwrap_or_else(|_| "root".to_string()));

        let mut seen = HashSet::new();
        let mut targets = Vec::with_capacity(self.hosts.len());
        for host in self.hosts.iter() {
            let user = host.user.clone().unwrap_or_else(|| default_user.clone());
            let mut target = Target::new(&host.host, user).port(host.port.unwrap_or(self.defaults.port));

            let entries = host.auth.as_ref().unwrap_or(&self.defaults.auth);
            for entry in entries {
                target = target.auth(entry.resolve()?);
            }
            if let Some(timeout) = host.timeout {
                target = target.timeout(timeout);
            }

            if !seen.insert(target.id()) {
                return Err(Error::DuplicateTarget(target.id()));
            }
            targets.push(target);
        }
        Ok(targets)
    }

    pub fn run_config(&self) -> RunConfig {
        let concurrency = match self.run.concurrency {
            0 => self.hosts.len(),
            n => n,
        };
        let config = RunConfig::default()
            .concurrency(concurrency)
            .connect_timeout(self.run.connect_timeout)
            .auth_timeout(self.run.auth_timeout)
            .job_timeout(self.run.job_timeout)
            .continue_on_error(self.run.continue_on_error)
            .output_limit(self.run.output_limit);
        match self.run.deadline {
            Some(deadline) => config.deadline(deadline),
            None => config,
        }
    }

    pub fn ssh_config(&self) -> SshConfig {
        let config = SshConfig::default().host_key_policy(self.ssh.host_key);
        match &self.ssh.known_hosts {
            Some(path) => config.known_hosts_path(path),
            None => config,
        }
    }
}

fn deserialize_hosts<'de, D>(deserializer: D) -> std::result::Result<NonEmpty<HostConfig>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let values: Vec<HostEntry> = Vec::deserialize(deserializer)?;
    let hosts = values
        .into_iter()
        .map(|entry| entry.into_host_config())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(serde::de::Error::custom)?;

    NonEmpty::from_vec(hosts).ok_or_else(|| serde::de::Error::custom("at least one host is required"))
}
