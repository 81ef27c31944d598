// ABOUTME: Authentication entries as written in the inventory.
// ABOUTME: Resolves env-backed passwords and `~` in key paths into AuthMethods.

use crate::error::{Error, Result};
use crate::types::AuthMethod;
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NamedAuth {
    Agent,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum AuthEntry {
    Named(NamedAuth),
    Password {
        password: String,
    },
    PasswordEnv {
        password_env: String,
    },
    Key {
        #[serde(alias = "pubkey")]
        key: PathBuf,
        #[serde(default)]
        passphrase: Option<String>,
    },
}

impl AuthEntry {
    pub fn resolve(&self) -> Result<AuthMethod> {
        match self {
            AuthEntry::Named(NamedAuth::Agent) => Ok(AuthMethod::Agent),
            AuthEntry::Password { password } => Ok(AuthMethod::password(password.as_str())),
            AuthEntry::PasswordEnv { password_env } => std::env::var(password_env)
                .map(AuthMethod::password)
                .map_err(|_| Error::MissingEnvVar(password_env.clone())),
            AuthEntry::Key { key, passphrase } => {
                let path = expand_tilde(key);
                Ok(match passphrase {
                    Some(passphrase) => {
                        AuthMethod::private_key_with_passphrase(path, passphrase.as_str())
                    }
                    None => AuthMethod::private_key(path),
                })
            }
        }
    }
}

/// Accepts a single entry or a list of entries.
pub fn deserialize_auth_list<'de, D>(deserializer: D) -> std::result::Result<Vec<AuthEntry>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(AuthEntry),
        Many(Vec<AuthEntry>),
    }

    match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(entry) => Ok(vec![entry]),
        OneOrMany::Many(entries) if entries.is_empty() => Err(serde::de::Error::custom(
            "auth list cannot be empty",
        )),
        OneOrMany::Many(entries) => Ok(entries),
    }
}

pub fn deserialize_auth_list_option<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<Vec<AuthEntry>>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct AuthList(#[serde(deserialize_with = "deserialize_auth_list")] Vec<AuthEntry>);

    // An explicit `null` means "use the defaults", same as leaving the key out.
    Option::<AuthList>::deserialize(deserializer).map(|list| list.map(|AuthList(entries)| entries))
}

fn expand_tilde(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match std::env::var_os("HOME") {
            Some(home) => PathBuf::from(home).join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_forms() {
        let yaml = r#"
- agent
- password: hunter2
- password_env: DEPLOY_PASSWORD
- key: /keys/id_ed25519
  passphrase: open sesame
- pubkey: /keys/id_rsa
"#;
        let entries: Vec<AuthEntry> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(entries[0], AuthEntry::Named(NamedAuth::Agent));
        assert_eq!(
            entries[1],
            AuthEntry::Password {
                password: "hunter2".to_string()
            }
        );
        assert!(matches!(entries[2], AuthEntry::PasswordEnv { .. }));
        assert!(matches!(
            &entries[3],
            AuthEntry::Key { passphrase: Some(p), .. } if p == "open sesame"
        ));
        assert!(matches!(&entries[4], AuthEntry::Key { passphrase: None, .. }));
    }

    #[test]
    fn expands_home() {
        temp_env::with_var("HOME", Some("/home/ops"), || {
            assert_eq!(
                expand_tilde(Path::new("~/.ssh/id_ed25519")),
                PathBuf::from("/home/ops/.ssh/id_ed25519")
            );
            assert_eq!(
                expand_tilde(Path::new("/etc/key")),
                PathBuf::from("/etc/key")
            );
        });
    }

    #[test]
    fn missing_password_env_is_an_error() {
        temp_env::with_var_unset("HERD_TEST_MISSING_PASSWORD", || {
            let entry = AuthEntry::PasswordEnv {
                password_env: "HERD_TEST_MISSING_PASSWORD".to_string(),
            };
            assert!(matches!(entry.resolve(), Err(Error::MissingEnvVar(_))));
        });
    }
}
