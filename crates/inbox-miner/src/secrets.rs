//! Secret resolution for mailbox passwords, OAuth2 client credentials and
//! pre-issued access tokens.
//!
//! A secret can be configured in three ways, checked in this order:
//!
//! 1. **Direct value** - quick local testing (`"passwordInsecure": "hunter2"`)
//! 2. **File** - Docker secrets (`"passwordFile": "/run/secrets/imap"`)
//! 3. **Environment variable** - production (`"passwordEnvVar": "IMAP_PASSWORD"`)
//!
//! Empty strings count as "not configured" so that a blank field in a config
//! file falls through to the next source.

use secrecy::SecretString;
use std::fs;

/// Error type for secret resolution failures.
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("No secret source provided (need one of: direct value, file path, or env var name)")]
    NoSourceProvided,

    #[error("Failed to read secret from file '{path}': {source}")]
    FileReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Environment variable '{name}' not set")]
    EnvVarNotSet { name: String },

    #[error("Environment variable '{name}' contains invalid UTF-8")]
    EnvVarNotUnicode { name: String },

    #[error("Secret from {origin} is empty")]
    Empty { origin: String },
}

/// Result type for secret resolution.
pub type Result<T> = std::result::Result<T, SecretError>;

/// Where a resolved secret came from. Safe to log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretOrigin {
    Direct,
    File(String),
    EnvVar(String),
}

impl std::fmt::Display for SecretOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SecretOrigin::Direct => f.write_str("inline config value"),
            SecretOrigin::File(path) => write!(f, "file '{}'", path),
            SecretOrigin::EnvVar(name) => write!(f, "environment variable '{}'", name),
        }
    }
}

fn configured(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

/// Picks the highest-priority configured source without reading it.
pub fn select_source(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> Option<SecretOrigin> {
    if configured(direct).is_some() {
        Some(SecretOrigin::Direct)
    } else if let Some(path) = configured(file_path) {
        Some(SecretOrigin::File(expand_home(path)))
    } else {
        configured(env_var).map(|name| SecretOrigin::EnvVar(name.to_string()))
    }
}

/// Resolves a secret from the first configured source.
///
/// File contents and environment values are trimmed, since both commonly
/// carry a trailing newline. A source that resolves to an empty value is an
/// error rather than a silent empty password.
pub fn resolve_secret(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> Result<SecretString> {
    let origin =
        select_source(direct, file_path, env_var).ok_or(SecretError::NoSourceProvided)?;

    let value = match &origin {
        SecretOrigin::Direct => direct.unwrap_or_default().to_string(),
        SecretOrigin::File(path) => fs::read_to_string(path)
            .map_err(|source| SecretError::FileReadError {
                path: path.clone(),
                source,
            })?
            .trim()
            .to_string(),
        SecretOrigin::EnvVar(name) => match std::env::var(name) {
            Ok(value) => value.trim().to_string(),
            Err(std::env::VarError::NotPresent) => {
                return Err(SecretError::EnvVarNotSet { name: name.clone() })
            }
            Err(std::env::VarError::NotUnicode(_)) => {
                return Err(SecretError::EnvVarNotUnicode { name: name.clone() })
            }
        },
    };

    if value.is_empty() {
        return Err(SecretError::Empty {
            origin: origin.to_string(),
        });
    }

    log::debug!("Resolved secret from {}", origin);
    Ok(SecretString::from(value))
}

/// Like [`resolve_secret`], but `Ok(None)` when nothing is configured.
pub fn resolve_secret_optional(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> Result<Option<SecretString>> {
    match resolve_secret(direct, file_path, env_var) {
        Ok(secret) => Ok(Some(secret)),
        Err(SecretError::NoSourceProvided) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Checks if at least one secret source is configured (non-empty).
pub fn has_secret_source(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> bool {
    select_source(direct, file_path, env_var).is_some()
}

/// Expands a leading `~` to the user's home directory (HOME, then USERPROFILE).
///
/// `~user/path` is not supported.
pub fn expand_home(path: &str) -> String {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = std::env::var_os("HOME").or_else(|| std::env::var_os("USERPROFILE")) {
            let home = home.to_string_lossy();
            return format!("{}{}", home, &path[1..]);
        }
    }
    path.to_string()
}
