//! Mailbox access error types.

use thiserror::Error;

use super::MessageHandle;

/// Errors raised by mailbox connectors and their collaborators.
#[derive(Error, Debug)]
pub enum MailError {
    /// A required identity or credential setting is missing or invalid.
    /// Raised before any network activity.
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// The credential provider could not produce a credential, or the
    /// server rejected it.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Transport or session failure, including timeouts.
    #[error("Connection failed: {0}")]
    Connectivity(String),

    /// `search` or `fetch` was called without a live session.
    #[error("Not connected to the mail server")]
    NotConnected,

    /// The server rejected a search command or returned something unreadable.
    #[error("Mail protocol error: {0}")]
    Protocol(String),

    /// A single message could not be retrieved or decoded.
    #[error("Failed to fetch message {handle}: {reason}")]
    Fetch {
        handle: MessageHandle,
        reason: String,
    },
}

impl MailError {
    pub(crate) fn fetch(handle: &MessageHandle, reason: impl Into<String>) -> Self {
        MailError::Fetch {
            handle: handle.clone(),
            reason: reason.into(),
        }
    }

    /// Whether this error only affects a single message.
    pub fn is_per_message(&self) -> bool {
        matches!(self, MailError::Fetch { .. })
    }
}

impl From<async_native_tls::Error> for MailError {
    fn from(err: async_native_tls::Error) -> Self {
        MailError::Connectivity(format!("TLS error: {}", err))
    }
}

impl From<crate::secrets::SecretError> for MailError {
    fn from(err: crate::secrets::SecretError) -> Self {
        MailError::Authentication(err.to_string())
    }
}

/// Result type for mailbox operations.
pub type Result<T> = std::result::Result<T, MailError>;
