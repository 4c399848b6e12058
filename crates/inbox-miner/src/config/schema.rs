use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::mail::OAuth2Provider;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default)]
    pub mailbox: MailboxSettings,
    #[serde(default)]
    pub database: DatabaseSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
    /// Named extraction profiles, e.g. one per bank or newsletter.
    #[serde(default)]
    pub processors: BTreeMap<String, ProcessorProfile>,
}

/// Which retrieval protocol to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MailboxBackend {
    #[default]
    Imap,
    Graph,
}

/// Mailbox account and backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailboxSettings {
    #[serde(default)]
    pub backend: MailboxBackend,

    /// Account name (typically the email address). Checked at connect time.
    #[serde(default)]
    pub username: String,

    /// Folder to search (IMAP only; Graph always reads the inbox).
    #[serde(default = "default_folder")]
    pub folder: String,

    /// Upper bound for every network call, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub imap: ImapSettings,

    #[serde(default)]
    pub graph: GraphSettings,

    #[serde(default)]
    pub auth: AuthSettings,
}

fn default_folder() -> String {
    "INBOX".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for MailboxSettings {
    fn default() -> Self {
        Self {
            backend: MailboxBackend::default(),
            username: String::new(),
            folder: default_folder(),
            timeout_secs: default_timeout_secs(),
            imap: ImapSettings::default(),
            graph: GraphSettings::default(),
            auth: AuthSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImapSettings {
    #[serde(default = "default_imap_host")]
    pub host: String,

    #[serde(default = "default_imap_port")]
    pub port: u16,

    /// Plain TCP is allowed but logged as a warning.
    #[serde(default = "default_true")]
    pub use_tls: bool,
}

fn default_imap_host() -> String {
    "outlook.office365.com".to_string()
}

fn default_imap_port() -> u16 {
    993
}

fn default_true() -> bool {
    true
}

impl Default for ImapSettings {
    fn default() -> Self {
        Self {
            host: default_imap_host(),
            port: default_imap_port(),
            use_tls: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphSettings {
    #[serde(default = "default_graph_base_url")]
    pub base_url: String,

    /// `$top` value for each page.
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Query `/me/...`; when false, `/users/{username}/...`.
    #[serde(default = "default_true")]
    pub use_me_endpoint: bool,
}

fn default_graph_base_url() -> String {
    "https://graph.microsoft.com/v1.0".to_string()
}

fn default_page_size() -> u32 {
    50
}

impl Default for GraphSettings {
    fn default() -> Self {
        Self {
            base_url: default_graph_base_url(),
            page_size: default_page_size(),
            use_me_endpoint: true,
        }
    }
}

/// How the mailbox credential is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthType {
    #[default]
    Password,
    OAuth2,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSettings {
    #[serde(rename = "type", default)]
    pub auth_type: AuthType,

    /// Environment variable containing the password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_env_var: Option<String>,

    /// Direct password value (for local development).
    /// WARNING: Storing passwords directly in config files is insecure.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "passwordInsecure",
        alias = "password"
    )]
    pub password_insecure: Option<String>,

    /// Path to file containing the password (for Docker secrets).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_file: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth2: Option<OAuth2Settings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuth2Settings {
    #[serde(default)]
    pub provider: OAuth2Provider,

    /// Azure AD tenant; only used by the Microsoft provider.
    #[serde(default = "default_tenant")]
    pub tenant: String,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "clientId",
        alias = "clientIdInsecure"
    )]
    pub client_id_insecure: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id_file: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id_env_var: Option<String>,

    /// Only confidential clients have one; public device-flow clients do not.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "clientSecret",
        alias = "clientSecretInsecure"
    )]
    pub client_secret_insecure: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret_file: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret_env_var: Option<String>,

    /// Pre-issued access token. When any source is set, the device flow and
    /// token cache are bypassed.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "accessToken",
        alias = "accessTokenInsecure"
    )]
    pub access_token_insecure: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token_file: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token_env_var: Option<String>,

    /// Overrides the provider's default scopes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes: Option<Vec<String>>,

    /// Required for the custom provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_auth_url: Option<String>,

    /// Required for the custom provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_url: Option<String>,
}

fn default_tenant() -> String {
    "consumers".to_string()
}

impl Default for OAuth2Settings {
    fn default() -> Self {
        Self {
            provider: OAuth2Provider::default(),
            tenant: default_tenant(),
            client_id_insecure: None,
            client_id_file: None,
            client_id_env_var: None,
            client_secret_insecure: None,
            client_secret_file: None,
            client_secret_env_var: None,
            access_token_insecure: None,
            access_token_file: None,
            access_token_env_var: None,
            scopes: None,
            device_auth_url: None,
            token_url: None,
        }
    }
}

impl OAuth2Settings {
    pub fn has_static_token(&self) -> bool {
        crate::secrets::has_secret_source(
            self.access_token_insecure.as_deref(),
            self.access_token_file.as_deref(),
            self.access_token_env_var.as_deref(),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseSettings {
    /// SQLite database file; parent directories are created on open.
    #[serde(default = "default_database_path")]
    pub path: String,
}

fn default_database_path() -> String {
    "./data/emails.db".to_string()
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingSettings {
    /// Default filter level; `RUST_LOG` takes precedence when set.
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// A named set of sender/subject patterns that produces one extraction
/// batch per sender pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessorProfile {
    #[serde(default)]
    pub sender_patterns: Vec<String>,

    #[serde(default)]
    pub subject_patterns: Vec<String>,

    #[serde(default = "default_true")]
    pub enabled: bool,
}
