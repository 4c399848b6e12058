pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod mail;
pub mod pipeline;
pub mod secrets;

pub use config::{load_config, Settings};
pub use db::{Database, EmailSink, StoreOutcome};
pub use error::{ConfigError, InboxMinerError, Result};
pub use mail::{
    connector_from_settings, credentials_from_settings, DatePredicate, EmailFilter,
    FetchedMessage, MailError, MailboxConnector, MessageHandle,
};
pub use pipeline::{ExtractionReport, ExtractionRequest, IngestionPipeline, PipelineError};
pub use secrets::{resolve_secret, resolve_secret_optional, SecretError};
