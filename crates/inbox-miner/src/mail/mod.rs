//! Mailbox retrieval.
//!
//! This module provides the [`MailboxConnector`] contract and its two
//! implementations: [`ImapConnector`] for IMAP servers and [`GraphConnector`]
//! for the Microsoft Graph REST API. Both accept the same [`EmailFilter`] and
//! hand back the same [`FetchedMessage`] record, so the ingestion pipeline does
//! not care which one it drives.

pub mod credentials;
pub mod device_auth;
pub mod error;
pub mod filter;
pub mod graph;
pub mod imap;
pub mod parser;
pub mod query;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::config::{MailboxBackend, MailboxSettings};

pub use credentials::{
    credentials_from_settings, CredentialKind, CredentialProvider, OAuthCredentialProvider,
    StaticCredentialProvider,
};
pub use device_auth::{DeviceCodeResponse, DeviceFlowAuth, OAuth2Provider, TokenResponse};
pub use error::{MailError, Result};
pub use filter::{DatePredicate, EmailFilter};
pub use graph::GraphConnector;
pub use imap::ImapConnector;
pub use query::{compile_graph, compile_imap, ClientFilter, GraphQuery, ImapQuery};

/// Opaque, backend-specific message identifier.
///
/// For IMAP this is the message UID in the examined folder; for Graph it is
/// the REST message id. Handles are only meaningful to the connector that
/// produced them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageHandle(String);

impl MessageHandle {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<u32> for MessageHandle {
    fn from(uid: u32) -> Self {
        Self(uid.to_string())
    }
}

/// A fully parsed message as returned by [`MailboxConnector::fetch`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchedMessage {
    /// Message-ID without angle brackets, or `generated-<handle>`.
    pub message_id: String,
    /// First From address, rendered `Name <addr>` or bare.
    pub sender: String,
    pub subject: String,
    /// Received time in UTC.
    pub received_at: NaiveDateTime,
    pub body_plain: String,
    pub body_html: String,
    /// Every header in original order as `Name: Value` lines.
    pub raw_headers: String,
}

/// A live session against a mailbox backend.
///
/// Callers bracket work with [`connect`](Self::connect) and
/// [`disconnect`](Self::disconnect); `search` and `fetch` fail with
/// [`MailError::NotConnected`] outside that window.
#[async_trait]
pub trait MailboxConnector: Send {
    /// Opens and authenticates a session. No-op when already connected.
    async fn connect(&mut self) -> Result<()>;

    /// Closes the session. Teardown errors are logged, never returned.
    async fn disconnect(&mut self);

    /// Returns the handles of every message matching `filter`.
    async fn search(&mut self, filter: &EmailFilter) -> Result<Vec<MessageHandle>>;

    /// Retrieves and parses one message.
    async fn fetch(&mut self, handle: &MessageHandle) -> Result<FetchedMessage>;

    fn is_connected(&self) -> bool;

    /// Short backend name used in logs.
    fn backend_name(&self) -> &'static str;
}

/// Builds the connector selected by `settings.backend`.
pub fn connector_from_settings(
    settings: &MailboxSettings,
    credentials: Arc<dyn CredentialProvider>,
) -> Result<Box<dyn MailboxConnector>> {
    match settings.backend {
        MailboxBackend::Imap => Ok(Box::new(ImapConnector::new(settings.clone(), credentials))),
        MailboxBackend::Graph => Ok(Box::new(GraphConnector::new(
            settings.clone(),
            credentials,
        )?)),
    }
}
