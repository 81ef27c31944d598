// ABOUTME: Host entries for the inventory.
// ABOUTME: Parses formats like "host", "user@host", "host:port", "user@[::1]:port".

use super::auth::{AuthEntry, deserialize_auth_list_option};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HostConfig {
    #[serde(alias = "addr")]
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default, deserialize_with = "deserialize_auth_list_option")]
    pub auth: Option<Vec<AuthEntry>>,
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
}

impl HostConfig {
    pub fn parse(s: &str) -> Result<Self, String> {
        let s = s.trim();
        if s.is_empty() {
            return Err("host address cannot be empty".to_string());
        }

        // Parse format: [user@]host[:port]
        let (user, rest) = match s.rfind('@') {
            Some(at_pos) => (Some(&s[..at_pos]), &s[at_pos + 1..]),
            None => (None, s),
        };
        if user == Some("") {
            return Err(format!("empty user in {:?}", s));
        }

        let (host, port) = if let Some(bracketed) = rest.strip_prefix('[') {
            let close = bracketed
                .find(']')
                .ok_or_else(|| format!("unterminated '[' in {:?}", s))?;
            let host = &bracketed[..close];
            let port = match &bracketed[close + 1..] {
                "" => None,
                tail => Some(parse_port(tail.strip_prefix(':').ok_or_else(|| {
                    format!("unexpected {:?} after address in {:?}", tail, s)
                })?)?),
            };
            (host, port)
        } else if rest.matches(':').count() > 1 {
            // Bare IPv6 literal; a port needs the bracketed form.
            (rest, None)
        } else if let Some(colon_pos) = rest.rfind(':') {
            (&rest[..colon_pos], Some(parse_port(&rest[colon_pos + 1..])?))
        } else {
            (rest, None)
        };

        if host.is_empty() {
            return Err("hostname cannot be empty".to_string());
        }

        Ok(HostConfig {
            host: host.to_string(),
            port,
            user: user.map(|u| u.to_string()),
            auth: None,
            timeout: None,
        })
    }
}

fn parse_port(s: &str) -> Result<u16, String> {
    s.parse::<u16>()
        .map_err(|_| format!("invalid port: {}", s))
}

/// A host written either as a string or as a map.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum HostEntry {
    Simple(String),
    Detailed(HostConfig),
}

impl HostEntry {
    pub(crate) fn into_host_config(self) -> Result<HostConfig, String> {
        match self {
            HostEntry::Simple(s) => HostConfig::parse(&s),
            HostEntry::Detailed(c) => Ok(c),
        }
    }
}
