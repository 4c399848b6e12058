use std::path::Path;

use log::debug;

use crate::config::schema::{AuthType, MailboxBackend, OAuth2Settings, Settings};
use crate::error::ConfigError;

/// Largest `$top` Microsoft Graph accepts for message listing.
const MAX_GRAPH_PAGE_SIZE: u32 = 1000;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Reads a JSON config file, applies environment overrides and validates.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Settings, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut settings: Settings = serde_json::from_str(&content)?;
    apply_env_overrides(&mut settings)?;
    validate_config(&settings)?;

    Ok(settings)
}

/// Built-in defaults plus environment overrides, for running without a file.
pub fn load_default_config() -> Result<Settings, ConfigError> {
    let mut settings = Settings::default();
    apply_env_overrides(&mut settings)?;
    validate_config(&settings)?;
    Ok(settings)
}

/// Parses and validates a JSON config. Environment variables are not read.
pub fn load_config_from_str(content: &str) -> Result<Settings, ConfigError> {
    let settings: Settings = serde_json::from_str(content)?;
    validate_config(&settings)?;
    Ok(settings)
}

/// Overrides individual settings from well-known environment variables.
///
/// | Variable        | Setting                              |
/// |-----------------|--------------------------------------|
/// | `EMAIL_HOST`    | `mailbox.imap.host`                  |
/// | `EMAIL_PORT`    | `mailbox.imap.port`                  |
/// | `EMAIL_USER`    | `mailbox.username`                   |
/// | `EMAIL_USE_SSL` | `mailbox.imap.useTls`                |
/// | `DATABASE_PATH` | `database.path`                      |
/// | `MS_CLIENT_ID`  | `mailbox.auth.oauth2.clientId`       |
/// | `MS_TENANT_ID`  | `mailbox.auth.oauth2.tenant`         |
/// | `MS_SCOPES`     | `mailbox.auth.oauth2.scopes`         |
/// | `LOG_LEVEL`     | `logging.level`                      |
pub fn apply_env_overrides(settings: &mut Settings) -> Result<(), ConfigError> {
    if let Some(host) = env_value("EMAIL_HOST") {
        settings.mailbox.imap.host = host;
    }

    if let Some(port) = env_value("EMAIL_PORT") {
        settings.mailbox.imap.port = port.parse().map_err(|_| {
            ConfigError::validation(format!("EMAIL_PORT is not a valid port: {}", port))
        })?;
    }

    if let Some(user) = env_value("EMAIL_USER") {
        settings.mailbox.username = user;
    }

    if let Some(use_ssl) = env_value("EMAIL_USE_SSL") {
        settings.mailbox.imap.use_tls = parse_bool(&use_ssl).ok_or_else(|| {
            ConfigError::validation(format!("EMAIL_USE_SSL is not a boolean: {}", use_ssl))
        })?;
    }

    if let Some(path) = env_value("DATABASE_PATH") {
        settings.database.path = path;
    }

    if let Some(client_id) = env_value("MS_CLIENT_ID") {
        oauth2_mut(settings).client_id_insecure = Some(client_id);
    }

    if let Some(tenant) = env_value("MS_TENANT_ID") {
        oauth2_mut(settings).tenant = tenant;
    }

    if let Some(scopes) = env_value("MS_SCOPES") {
        oauth2_mut(settings).scopes = Some(split_scopes(&scopes));
    }

    if let Some(level) = env_value("LOG_LEVEL") {
        settings.logging.level = level;
    }

    Ok(())
}

fn env_value(name: &str) -> Option<String> {
    let value = std::env::var(name).ok()?;
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    debug!("Config override from {}", name);
    Some(value.to_string())
}

fn oauth2_mut(settings: &mut Settings) -> &mut OAuth2Settings {
    settings
        .mailbox
        .auth
        .oauth2
        .get_or_insert_with(OAuth2Settings::default)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Splits a scope list on whitespace and commas.
pub fn split_scopes(scopes: &str) -> Vec<String> {
    scopes
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn validate_config(settings: &Settings) -> Result<(), ConfigError> {
    let mailbox = &settings.mailbox;

    if mailbox.timeout_secs == 0 {
        return Err(ConfigError::validation("mailbox.timeoutSecs must be greater than 0"));
    }

    if mailbox.folder.trim().is_empty() {
        return Err(ConfigError::validation("mailbox.folder must not be empty"));
    }

    if mailbox.imap.port == 0 {
        return Err(ConfigError::validation("mailbox.imap.port must not be 0"));
    }

    if mailbox.backend == MailboxBackend::Imap && mailbox.imap.host.trim().is_empty() {
        return Err(ConfigError::validation("mailbox.imap.host must not be empty"));
    }

    if !(1..=MAX_GRAPH_PAGE_SIZE).contains(&mailbox.graph.page_size) {
        return Err(ConfigError::validation(format!(
            "mailbox.graph.pageSize must be between 1 and {}",
            MAX_GRAPH_PAGE_SIZE
        )));
    }

    match mailbox.auth.auth_type {
        AuthType::OAuth2 => {
            if mailbox.auth.oauth2.is_none() {
                return Err(ConfigError::validation(
                    "mailbox.auth.oauth2 is required when auth type is oauth2",
                ));
            }
        }
        AuthType::Password => {
            if mailbox.backend == MailboxBackend::Graph {
                return Err(ConfigError::validation(
                    "The graph backend requires oauth2 authentication",
                ));
            }
        }
    }

    if settings.database.path.trim().is_empty() {
        return Err(ConfigError::validation("database.path must not be empty"));
    }

    let level = settings.logging.level.to_ascii_lowercase();
    if !LOG_LEVELS.contains(&level.as_str()) {
        return Err(ConfigError::validation(format!(
            "Unknown log level '{}' (expected one of: {})",
            settings.logging.level,
            LOG_LEVELS.join(", ")
        )));
    }

    for (name, profile) in &settings.processors {
        if name.trim().is_empty() {
            return Err(ConfigError::validation("Processor names must not be empty"));
        }
        if profile.enabled && profile.sender_patterns.iter().all(|p| p.trim().is_empty()) {
            return Err(ConfigError::validation(format!(
                "Processor '{}' is enabled but has no sender patterns",
                name
            )));
        }
    }

    Ok(())
}
