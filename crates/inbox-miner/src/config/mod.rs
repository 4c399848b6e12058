pub mod loader;
pub mod schema;

pub use loader::{
    apply_env_overrides, load_config, load_config_from_str, load_default_config, validate_config,
};
pub use schema::{
    AuthSettings, AuthType, DatabaseSettings, GraphSettings, ImapSettings, LogFormat,
    LoggingSettings, MailboxBackend, MailboxSettings, OAuth2Settings, ProcessorProfile, Settings,
};
