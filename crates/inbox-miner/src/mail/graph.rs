//! Microsoft Graph mailbox connector.
//!
//! Messages are listed through `mailFolders/{folder}/messages` and downloaded
//! as raw MIME through `messages/{id}/$value`, so Graph and IMAP messages go
//! through the same extractor. The stored timestamp is Graph's
//! `receivedDateTime` from the listing, the same field the date filter
//! matches on; the MIME `Date` header is only used for handles that were not
//! listed in this session.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use log::{debug, info};
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::config::MailboxSettings;

use super::credentials::{CredentialKind, CredentialProvider};
use super::device_auth::truncate_error_body;
use super::error::{MailError, Result};
use super::filter::EmailFilter;
use super::parser::parse_message;
use super::query::compile_graph;
use super::{FetchedMessage, MailboxConnector, MessageHandle};

const CONNECT_TIMEOUT_SECS: u64 = 10;
const MESSAGE_SELECT_FIELDS: &str = "id,subject,from,receivedDateTime";

/// Guards against a server that keeps handing out the same `nextLink`.
const MAX_PAGES: usize = 10_000;

#[derive(Debug, Deserialize)]
struct MessagePage {
    #[serde(default)]
    value: Vec<MessageSummary>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageSummary {
    id: String,
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    from: Option<Recipient>,
    #[serde(default)]
    received_date_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Recipient {
    email_address: EmailAddress,
}

#[derive(Debug, Deserialize)]
struct EmailAddress {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    address: Option<String>,
}

/// Graph connector. A session is just a validated bearer token.
pub struct GraphConnector {
    settings: MailboxSettings,
    credentials: Arc<dyn CredentialProvider>,
    client: Client,
    token: Option<SecretString>,
    /// `receivedDateTime` of every handle returned by the last search.
    received: HashMap<MessageHandle, NaiveDateTime>,
}

impl GraphConnector {
    pub fn new(settings: MailboxSettings, credentials: Arc<dyn CredentialProvider>) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| {
                MailError::Configuration(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            settings,
            credentials,
            client,
            token: None,
            received: HashMap::new(),
        })
    }

    /// `{base}/me` or `{base}/users/{username}`.
    fn mailbox_root(&self) -> String {
        let base = self.settings.graph.base_url.trim_end_matches('/');
        if self.settings.graph.use_me_endpoint {
            format!("{}/me", base)
        } else {
            format!("{}/users/{}", base, self.settings.username)
        }
    }

    /// Graph spells the well-known inbox folder in lower case.
    fn folder_segment(&self) -> String {
        let folder = self.settings.folder.trim();
        if folder.eq_ignore_ascii_case("inbox") {
            "inbox".to_string()
        } else {
            folder.to_string()
        }
    }

    fn folder_url(&self) -> Result<Url> {
        let mut url = parse_url(&self.mailbox_root())?;
        url.path_segments_mut()
            .map_err(|_| MailError::Configuration("graph.baseUrl cannot be a base".to_string()))?
            .push("mailFolders")
            .push(&self.folder_segment());
        Ok(url)
    }

    fn message_value_url(&self, handle: &MessageHandle) -> Result<Url> {
        let mut url = parse_url(&self.mailbox_root())?;
        url.path_segments_mut()
            .map_err(|_| MailError::Configuration("graph.baseUrl cannot be a base".to_string()))?
            .push("messages")
            .push(handle.as_str())
            .push("$value");
        Ok(url)
    }

    fn authorized(&self, request: RequestBuilder) -> Result<RequestBuilder> {
        let token = self.token.as_ref().ok_or(MailError::NotConnected)?;
        Ok(request.bearer_auth(token.expose_secret()))
    }

    async fn get_page(&self, url: &str) -> Result<MessagePage> {
        let request = self.authorized(self.client.get(url))?;
        let response = request
            .header("accept", "application/json")
            .send()
            .await
            .map_err(|e| transport_error("message list", e))?;

        let response = check_status(response, "message list")
            .await
            .map_err(|(status, body)| {
                MailError::Protocol(format!("Message list rejected ({}): {}", status, body))
            })?;

        response
            .json::<MessagePage>()
            .await
            .map_err(|e| MailError::Protocol(format!("Malformed message list: {}", e)))
    }
}

fn parse_url(value: &str) -> Result<Url> {
    Url::parse(value)
        .map_err(|e| MailError::Configuration(format!("Invalid Graph URL '{}': {}", value, e)))
}

fn transport_error(what: &str, e: reqwest::Error) -> MailError {
    if e.is_timeout() {
        MailError::Connectivity(format!("Graph {} request timed out", what))
    } else {
        MailError::Connectivity(format!("Graph {} request failed: {}", what, e))
    }
}

/// Passes successful responses through; otherwise returns the status and a
/// truncated body.
async fn check_status(
    response: Response,
    what: &str,
) -> std::result::Result<Response, (StatusCode, String)> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    debug!("Graph {} returned {}: {}", what, status, body);
    Err((status, truncate_error_body(&body)))
}

#[async_trait]
impl MailboxConnector for GraphConnector {
    async fn connect(&mut self) -> Result<()> {
        if self.token.is_some() {
            debug!("Already connected to Microsoft Graph");
            return Ok(());
        }

        if self.settings.username.trim().is_empty() {
            return Err(MailError::Configuration(
                "mailbox.username is not set".to_string(),
            ));
        }

        if self.credentials.kind() != CredentialKind::BearerToken {
            return Err(MailError::Configuration(
                "Microsoft Graph requires OAuth2 credentials".to_string(),
            ));
        }

        let token = self.credentials.acquire().await?;
        let url = self.folder_url()?;
        info!("Connecting to Microsoft Graph at {}", url);

        let response = self
            .client
            .get(url)
            .bearer_auth(token.expose_secret())
            .header("accept", "application/json")
            .send()
            .await
            .map_err(|e| transport_error("folder", e))?;

        match check_status(response, "folder").await {
            Ok(_) => {}
            Err((status, body))
                if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN =>
            {
                return Err(MailError::Authentication(format!(
                    "Graph rejected the access token ({}): {}",
                    status, body
                )));
            }
            Err((status, body)) => {
                return Err(MailError::Connectivity(format!(
                    "Cannot open folder '{}' ({}): {}",
                    self.settings.folder, status, body
                )));
            }
        }

        info!("Connected to Microsoft Graph as {}", self.settings.username);
        self.token = Some(token);
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.received.clear();
        if self.token.take().is_some() {
            info!("Disconnecting from Microsoft Graph");
        }
    }

    async fn search(&mut self, filter: &EmailFilter) -> Result<Vec<MessageHandle>> {
        if self.token.is_none() {
            return Err(MailError::NotConnected);
        }

        let query = compile_graph(filter);

        let mut url = self.folder_url()?;
        url.path_segments_mut()
            .map_err(|_| MailError::Configuration("graph.baseUrl cannot be a base".to_string()))?
            .push("messages");
        url.query_pairs_mut()
            .append_pair("$select", MESSAGE_SELECT_FIELDS)
            .append_pair("$top", &self.settings.graph.page_size.to_string());
        if let Some(odata) = &query.odata_filter {
            url.query_pairs_mut().append_pair("$filter", odata);
        }
        info!(
            "Searching with filter: {}",
            query.odata_filter.as_deref().unwrap_or("(none)")
        );

        self.received.clear();
        let mut handles = Vec::new();
        let mut scanned = 0usize;
        let mut next = Some(url.to_string());
        let mut pages = 0usize;

        while let Some(page_url) = next.take() {
            pages += 1;
            if pages > MAX_PAGES {
                return Err(MailError::Protocol(format!(
                    "Gave up after {} result pages",
                    MAX_PAGES
                )));
            }

            let page = self.get_page(&page_url).await?;
            debug!("Page {} returned {} messages", pages, page.value.len());
            scanned += page.value.len();

            for message in page.value {
                let (address, name) = match &message.from {
                    Some(from) => (
                        from.email_address.address.as_deref(),
                        from.email_address.name.as_deref(),
                    ),
                    None => (None, None),
                };
                if query
                    .client_filter
                    .matches(address, name, message.subject.as_deref())
                {
                    let handle = MessageHandle::new(message.id);
                    if let Some(at) = message.received_date_time {
                        self.received.insert(handle.clone(), at.naive_utc());
                    }
                    handles.push(handle);
                }
            }

            next = page.next_link;
        }

        info!(
            "Found {} messages matching criteria ({} scanned)",
            handles.len(),
            scanned
        );
        Ok(handles)
    }

    async fn fetch(&mut self, handle: &MessageHandle) -> Result<FetchedMessage> {
        if self.token.is_none() {
            return Err(MailError::NotConnected);
        }

        let url = self
            .message_value_url(handle)
            .map_err(|e| MailError::fetch(handle, e.to_string()))?;
        debug!("Fetching message {}", handle);

        let response = self
            .authorized(self.client.get(url))?
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    MailError::fetch(handle, "request timed out")
                } else {
                    MailError::fetch(handle, e.to_string())
                }
            })?;

        let response = check_status(response, "message")
            .await
            .map_err(|(status, body)| MailError::fetch(handle, format!("{}: {}", status, body)))?;

        let raw = response
            .bytes()
            .await
            .map_err(|e| MailError::fetch(handle, e.to_string()))?;

        let mut message = parse_message(&raw, handle)?;
        if let Some(at) = self.received.get(handle) {
            message.received_at = *at;
        }
        Ok(message)
    }

    fn is_connected(&self) -> bool {
        self.token.is_some()
    }

    fn backend_name(&self) -> &'static str {
        "graph"
    }
}
