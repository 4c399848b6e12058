//! IMAP mailbox connector.

use std::future::Future;
use std::io;
use std::net::TcpStream;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_imap::{Client, Session};
use async_native_tls::TlsConnector;
use async_trait::async_trait;
use futures_util::io::{AsyncRead, AsyncWrite};
use futures_util::StreamExt;
use log::{debug, info, warn};
use secrecy::ExposeSecret;

use crate::config::{ImapSettings, MailboxSettings};

use super::credentials::{CredentialKind, CredentialProvider};
use super::error::{MailError, Result};
use super::filter::EmailFilter;
use super::parser::parse_message;
use super::query::compile_imap;
use super::{FetchedMessage, MailboxConnector, MessageHandle};

/// Async TCP stream driven by the async-io reactor.
type AsyncTcpStream = async_io::Async<TcpStream>;

/// Transport under the IMAP session: TLS or, when configured, plain TCP.
pub enum MailStream {
    Tls(async_native_tls::TlsStream<AsyncTcpStream>),
    Plain(AsyncTcpStream),
}

impl std::fmt::Debug for MailStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MailStream::Tls(_) => f.write_str("MailStream::Tls"),
            MailStream::Plain(_) => f.write_str("MailStream::Plain"),
        }
    }
}

impl AsyncRead for MailStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            MailStream::Tls(stream) => Pin::new(stream).poll_read(cx, buf),
            MailStream::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MailStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            MailStream::Tls(stream) => Pin::new(stream).poll_write(cx, buf),
            MailStream::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MailStream::Tls(stream) => Pin::new(stream).poll_flush(cx),
            MailStream::Plain(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MailStream::Tls(stream) => Pin::new(stream).poll_close(cx),
            MailStream::Plain(stream) => Pin::new(stream).poll_close(cx),
        }
    }
}

/// XOAUTH2 SASL response.
///
/// async-imap base64-encodes whatever `process` returns, so the response is
/// the raw `user=...^Aauth=Bearer ...^A^A` string. If the server answers with
/// an error challenge, an empty response lets it finish with a tagged NO.
struct XOAuth2Authenticator {
    response: Vec<u8>,
    sent: bool,
}

impl XOAuth2Authenticator {
    fn new(user: &str, access_token: &str) -> Self {
        Self {
            response: format!("user={}\x01auth=Bearer {}\x01\x01", user, access_token).into_bytes(),
            sent: false,
        }
    }
}

impl async_imap::Authenticator for XOAuth2Authenticator {
    type Response = Vec<u8>;

    fn process(&mut self, _challenge: &[u8]) -> Self::Response {
        if self.sent {
            Vec::new()
        } else {
            self.sent = true;
            std::mem::take(&mut self.response)
        }
    }
}

/// Runs `fut` under `limit`, mapping expiry to [`MailError::Connectivity`].
async fn bounded<T, F>(limit: Duration, what: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(limit, fut).await.map_err(|_| {
        MailError::Connectivity(format!("{} timed out after {}s", what, limit.as_secs()))
    })?
}

/// Resolves the server address and opens the TCP (and TLS) transport.
async fn open_stream(settings: &ImapSettings) -> Result<MailStream> {
    let addrs = tokio::net::lookup_host((settings.host.as_str(), settings.port))
        .await
        .map_err(|e| {
            MailError::Connectivity(format!("Cannot resolve {}: {}", settings.host, e))
        })?;

    let mut last_error = None;
    let mut tcp = None;
    for addr in addrs {
        match AsyncTcpStream::connect(addr).await {
            Ok(stream) => {
                tcp = Some(stream);
                break;
            }
            Err(e) => {
                debug!("Connecting to {} failed: {}", addr, e);
                last_error = Some(e);
            }
        }
    }

    let tcp = tcp.ok_or_else(|| {
        MailError::Connectivity(format!(
            "Cannot reach {}:{}: {}",
            settings.host,
            settings.port,
            last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no addresses resolved".to_string())
        ))
    })?;

    if settings.use_tls {
        let tls = TlsConnector::new().connect(&settings.host, tcp).await?;
        Ok(MailStream::Tls(tls))
    } else {
        warn!(
            "Connecting to {}:{} without TLS; credentials are sent in clear text",
            settings.host, settings.port
        );
        Ok(MailStream::Plain(tcp))
    }
}

/// Downloads the full RFC822 source of one message.
async fn fetch_raw(
    session: &mut Session<MailStream>,
    uid: u32,
) -> std::result::Result<Option<Vec<u8>>, async_imap::error::Error> {
    let messages = session.uid_fetch(uid.to_string(), "RFC822").await?;
    let mut messages = Box::pin(messages);

    // Drain the stream so the tagged completion is consumed before the
    // session is reused.
    let mut body = None;
    while let Some(message) = messages.next().await {
        let message = message?;
        if body.is_none() {
            body = message.body().map(|b| b.to_vec());
        }
    }
    Ok(body)
}

/// IMAP connector. Opens the configured folder read-only with `EXAMINE`.
pub struct ImapConnector {
    settings: MailboxSettings,
    credentials: Arc<dyn CredentialProvider>,
    session: Option<Session<MailStream>>,
    /// Whether the server advertises `LITERAL+`, asked on the first
    /// non-ASCII search of a session.
    literal_plus: Option<bool>,
}

impl ImapConnector {
    pub fn new(settings: MailboxSettings, credentials: Arc<dyn CredentialProvider>) -> Self {
        Self {
            settings,
            credentials,
            session: None,
            literal_plus: None,
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.settings.timeout_secs)
    }

    async fn authenticate(
        &self,
        client: Client<MailStream>,
        secret: &str,
    ) -> Result<Session<MailStream>> {
        let username = &self.settings.username;
        match self.credentials.kind() {
            CredentialKind::Password => client
                .login(username, secret)
                .await
                .map_err(|(e, _)| MailError::Authentication(format!("LOGIN rejected: {}", e))),
            CredentialKind::BearerToken => client
                .authenticate("XOAUTH2", XOAuth2Authenticator::new(username, secret))
                .await
                .map_err(|(e, _)| MailError::Authentication(format!("XOAUTH2 rejected: {}", e))),
        }
    }

    async fn open_session(&self) -> Result<Session<MailStream>> {
        let limit = self.timeout();
        let imap = &self.settings.imap;
        info!("Connecting to IMAP server at {}:{}", imap.host, imap.port);

        let secret = self.credentials.acquire().await?;

        let stream = bounded(limit, "IMAP connect", open_stream(imap)).await?;
        let mut client = Client::new(stream);

        // The greeting has to be consumed before AUTHENTICATE, or the
        // handshake reads it in place of the continuation request.
        bounded(limit, "IMAP greeting", async {
            client
                .read_response()
                .await
                .map_err(|e| MailError::Connectivity(format!("Failed to read greeting: {}", e)))
        })
        .await?;

        let mut session = bounded(
            limit,
            "IMAP authentication",
            self.authenticate(client, secret.expose_secret()),
        )
        .await?;

        let folder = &self.settings.folder;
        let examined = bounded(limit, "IMAP EXAMINE", async {
            session
                .examine(folder)
                .await
                .map_err(|e| MailError::Connectivity(format!("Cannot open folder '{}': {}", folder, e)))
        })
        .await;

        match examined {
            Ok(mailbox) => {
                debug!(
                    "Folder '{}' opened read-only ({} messages)",
                    folder, mailbox.exists
                );
                Ok(session)
            }
            Err(e) => {
                if let Err(logout_err) = session.logout().await {
                    debug!("Logout after failed EXAMINE also failed: {}", logout_err);
                }
                Err(e)
            }
        }
    }
}

#[async_trait]
impl MailboxConnector for ImapConnector {
    async fn connect(&mut self) -> Result<()> {
        if self.session.is_some() {
            debug!("Already connected to IMAP server");
            return Ok(());
        }

        if self.settings.username.trim().is_empty() {
            return Err(MailError::Configuration(
                "mailbox.username is not set".to_string(),
            ));
        }

        let session = self.open_session().await?;
        info!(
            "Connected to {} as {}",
            self.settings.imap.host, self.settings.username
        );
        self.session = Some(session);
        Ok(())
    }

    async fn disconnect(&mut self) {
        let limit = self.timeout();
        self.literal_plus = None;
        if let Some(mut session) = self.session.take() {
            info!("Disconnecting from IMAP server");
            match tokio::time::timeout(limit, session.logout()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("IMAP LOGOUT failed: {}", e),
                Err(_) => warn!("IMAP LOGOUT timed out after {}s", limit.as_secs()),
            }
        }
    }

    async fn search(&mut self, filter: &EmailFilter) -> Result<Vec<MessageHandle>> {
        let limit = self.timeout();
        let session = self.session.as_mut().ok_or(MailError::NotConnected)?;

        let query = compile_imap(filter);
        let literal_plus = if query.is_ascii() {
            false
        } else if let Some(known) = self.literal_plus {
            known
        } else {
            let capabilities = bounded(limit, "IMAP CAPABILITY", async {
                session
                    .capabilities()
                    .await
                    .map_err(|e| MailError::Protocol(format!("CAPABILITY failed: {}", e)))
            })
            .await?;
            let supported = capabilities.has_str("LITERAL+");
            if !supported {
                warn!(
                    "Server does not advertise LITERAL+; sending non-ASCII search values as quoted strings"
                );
            }
            self.literal_plus = Some(supported);
            supported
        };

        let arguments = query.search_arguments(literal_plus);
        info!("Searching with criteria: {}", query);

        let uids = bounded(limit, "IMAP SEARCH", async {
            session
                .uid_search(&arguments)
                .await
                .map_err(|e| MailError::Protocol(format!("SEARCH failed: {}", e)))
        })
        .await?;

        let mut uids: Vec<u32> = uids.into_iter().collect();
        uids.sort_unstable();
        info!("Found {} messages matching criteria", uids.len());

        Ok(uids.into_iter().map(MessageHandle::from).collect())
    }

    async fn fetch(&mut self, handle: &MessageHandle) -> Result<FetchedMessage> {
        let limit = self.timeout();
        let session = self.session.as_mut().ok_or(MailError::NotConnected)?;

        let uid: u32 = handle
            .as_str()
            .parse()
            .map_err(|_| MailError::fetch(handle, "not an IMAP UID"))?;

        debug!("Fetching message UID {}", uid);

        let raw = tokio::time::timeout(limit, fetch_raw(session, uid))
            .await
            .map_err(|_| MailError::fetch(handle, format!("timed out after {}s", limit.as_secs())))?
            .map_err(|e| MailError::fetch(handle, e.to_string()))?
            .ok_or_else(|| MailError::fetch(handle, "server returned no message body"))?;

        parse_message(&raw, handle)
    }

    fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    fn backend_name(&self) -> &'static str {
        "imap"
    }
}

impl Drop for ImapConnector {
    fn drop(&mut self) {
        if self.session.is_some() {
            warn!("ImapConnector dropped without explicit disconnect - session will be closed");
        }
    }
}
