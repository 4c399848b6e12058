//! OAuth2 Device Authorization Grant (RFC 8628).
//!
//! Lets a headless process obtain mailbox tokens: the user opens the
//! verification URL on any device and types the short user code, while this
//! side polls the token endpoint.

use log::{debug, info, warn};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::{MailboxBackend, OAuth2Settings};

use super::error::{MailError, Result};

/// Maximum length for error bodies echoed into errors and logs.
const MAX_ERROR_BODY_LENGTH: usize = 200;

pub(crate) fn truncate_error_body(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY_LENGTH {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY_LENGTH;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated)", &body[..end])
}

/// OAuth2 provider presets with known endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OAuth2Provider {
    /// Microsoft identity platform (Outlook.com, Microsoft 365).
    #[default]
    #[serde(alias = "outlook")]
    Microsoft,
    Gmail,
    Custom,
}

impl OAuth2Provider {
    /// Device authorization endpoint. `tenant` only affects Microsoft.
    pub fn device_auth_url(&self, tenant: &str) -> Option<String> {
        match self {
            OAuth2Provider::Microsoft => Some(format!(
                "https://login.microsoftonline.com/{}/oauth2/v2.0/devicecode",
                tenant
            )),
            OAuth2Provider::Gmail => Some("https://oauth2.googleapis.com/device/code".to_string()),
            OAuth2Provider::Custom => None,
        }
    }

    /// Token endpoint. `tenant` only affects Microsoft.
    pub fn token_url(&self, tenant: &str) -> Option<String> {
        match self {
            OAuth2Provider::Microsoft => Some(format!(
                "https://login.microsoftonline.com/{}/oauth2/v2.0/token",
                tenant
            )),
            OAuth2Provider::Gmail => Some("https://oauth2.googleapis.com/token".to_string()),
            OAuth2Provider::Custom => None,
        }
    }

    /// Scopes needed to read mail through `backend`.
    ///
    /// Microsoft needs `offline_access` to issue refresh tokens; Gmail gets
    /// them through `access_type=offline` instead.
    pub fn default_scopes(&self, backend: MailboxBackend) -> &'static [&'static str] {
        match (self, backend) {
            (OAuth2Provider::Microsoft, MailboxBackend::Imap) => &[
                "https://outlook.office.com/IMAP.AccessAsUser.All",
                "offline_access",
            ],
            (OAuth2Provider::Microsoft, MailboxBackend::Graph) => &["Mail.Read", "offline_access"],
            (OAuth2Provider::Gmail, _) => &["https://mail.google.com/"],
            (OAuth2Provider::Custom, _) => &[],
        }
    }
}

/// Response from the device authorization request.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceCodeResponse {
    pub device_code: String,

    /// Code the user types at the verification URL.
    pub user_code: String,

    #[serde(alias = "verification_url")]
    pub verification_uri: String,

    #[serde(default)]
    pub verification_uri_complete: Option<String>,

    /// Lifetime in seconds of the device and user codes.
    pub expires_in: u64,

    /// Minimum polling interval in seconds.
    #[serde(default = "default_interval")]
    pub interval: u64,

    /// Human-readable instructions (Microsoft only).
    #[serde(default)]
    pub message: Option<String>,
}

fn default_interval() -> u64 {
    5
}

/// Response from the token endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,

    #[serde(default)]
    pub token_type: Option<String>,

    /// Lifetime in seconds of the access token.
    #[serde(default)]
    pub expires_in: Option<u64>,

    /// Not every grant returns a new refresh token.
    #[serde(default)]
    pub refresh_token: Option<String>,

    /// Space-separated list of granted scopes.
    #[serde(default)]
    pub scope: Option<String>,
}

/// Error response from the token endpoint.
#[derive(Debug, Clone, Deserialize)]
struct TokenErrorResponse {
    error: String,

    #[serde(default)]
    error_description: Option<String>,
}

/// Default connect timeout for HTTP requests (10 seconds).
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default request timeout for HTTP requests (30 seconds).
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Floor for the polling deadline, for servers that send a tiny expires_in.
const MIN_POLL_TTL_SECS: u64 = 5;

/// RFC 8628 device authorization grant type.
const DEVICE_CODE_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:device_code";

fn create_http_client() -> Result<Client> {
    Client::builder()
        .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
        .timeout(DEFAULT_REQUEST_TIMEOUT)
        .build()
        .map_err(|e| MailError::Authentication(format!("Failed to create HTTP client: {}", e)))
}

/// Form parameters shared by every token request.
fn client_params<'a>(
    client_id: &'a str,
    client_secret: Option<&'a SecretString>,
) -> Vec<(&'static str, &'a str)> {
    let mut params = vec![("client_id", client_id)];
    if let Some(secret) = client_secret {
        params.push(("client_secret", secret.expose_secret()));
    }
    params
}

/// OAuth2 Device Flow authentication handler.
pub struct DeviceFlowAuth {
    client: Client,
    provider: OAuth2Provider,
    device_auth_url: String,
    token_url: String,
}

impl DeviceFlowAuth {
    /// Creates a handler for a known provider.
    pub fn new(provider: OAuth2Provider, tenant: &str) -> Result<Self> {
        let missing =
            || MailError::Configuration("Custom OAuth2 provider requires explicit URLs".to_string());
        let device_auth_url = provider.device_auth_url(tenant).ok_or_else(missing)?;
        let token_url = provider.token_url(tenant).ok_or_else(missing)?;

        Ok(Self {
            client: create_http_client()?,
            provider,
            device_auth_url,
            token_url,
        })
    }

    /// Creates a handler with explicit endpoints.
    pub fn with_custom_urls(device_auth_url: String, token_url: String) -> Result<Self> {
        Ok(Self {
            client: create_http_client()?,
            provider: OAuth2Provider::Custom,
            device_auth_url,
            token_url,
        })
    }

    /// Creates a handler from config. Explicit URLs override the preset's.
    pub fn from_settings(settings: &OAuth2Settings) -> Result<Self> {
        let provider = settings.provider;
        let device_auth_url = settings
            .device_auth_url
            .clone()
            .or_else(|| provider.device_auth_url(&settings.tenant));
        let token_url = settings
            .token_url
            .clone()
            .or_else(|| provider.token_url(&settings.tenant));

        match (device_auth_url, token_url) {
            (Some(device_auth_url), Some(token_url)) => Ok(Self {
                client: create_http_client()?,
                provider,
                device_auth_url,
                token_url,
            }),
            _ => Err(MailError::Configuration(
                "Custom OAuth2 provider requires deviceAuthUrl and tokenUrl".to_string(),
            )),
        }
    }

    /// Step 1: request a device code and user code.
    pub async fn request_device_code(
        &self,
        client_id: &str,
        scopes: &[&str],
    ) -> Result<DeviceCodeResponse> {
        let scope = scopes.join(" ");

        info!(
            "Requesting device code from {} for scopes: {}",
            self.device_auth_url, scope
        );

        let mut params: Vec<(&str, &str)> = vec![("client_id", client_id), ("scope", &scope)];
        if self.provider == OAuth2Provider::Gmail {
            params.push(("access_type", "offline"));
        }

        let response = self
            .client
            .post(&self.device_auth_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| {
                MailError::Authentication(format!("Failed to request device code: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(MailError::Authentication(format!(
                "Device code request failed ({}): {}",
                status,
                truncate_error_body(&body)
            )));
        }

        let device_code: DeviceCodeResponse = response.json().await.map_err(|e| {
            MailError::Authentication(format!("Failed to parse device code: {}", e))
        })?;

        debug!(
            "Device code received, expires in {}s, poll interval {}s",
            device_code.expires_in, device_code.interval
        );

        Ok(device_code)
    }

    /// Step 2: poll until the user authorizes, the code expires, or the server
    /// reports a terminal error.
    pub async fn poll_for_token(
        &self,
        device_code: &DeviceCodeResponse,
        client_id: &str,
        client_secret: Option<&SecretString>,
    ) -> Result<TokenResponse> {
        let ttl_secs = device_code.expires_in.max(MIN_POLL_TTL_SECS);
        let deadline = tokio::time::Instant::now() + Duration::from_secs(ttl_secs);

        let min_interval = Duration::from_secs(1);
        let max_interval = Duration::from_secs(30);
        let mut interval = Duration::from_secs(device_code.interval).max(min_interval);

        info!("Waiting for authorization (expires in {}s)", ttl_secs);

        loop {
            if tokio::time::Instant::now() > deadline {
                return Err(MailError::Authentication(
                    "Device code expired before authorization".to_string(),
                ));
            }

            tokio::time::sleep(interval).await;

            let mut params = client_params(client_id, client_secret);
            params.push(("device_code", &device_code.device_code));
            params.push(("grant_type", DEVICE_CODE_GRANT_TYPE));

            let response = self
                .client
                .post(&self.token_url)
                .form(&params)
                .send()
                .await
                .map_err(|e| MailError::Authentication(format!("Token request failed: {}", e)))?;

            if response.status().is_success() {
                let token: TokenResponse = response.json().await.map_err(|e| {
                    MailError::Authentication(format!("Failed to parse token response: {}", e))
                })?;
                info!("Device authorization complete");
                return Ok(token);
            }

            let error: TokenErrorResponse = response.json().await.map_err(|e| {
                MailError::Authentication(format!("Failed to parse error response: {}", e))
            })?;

            match error.error.as_str() {
                "authorization_pending" => {
                    debug!("Authorization pending, continuing to poll");
                }
                "slow_down" => {
                    // RFC 8628 section 3.5
                    interval = (interval + Duration::from_secs(5)).min(max_interval);
                    warn!("Server requested slow down, new interval: {:?}", interval);
                }
                "expired_token" => {
                    return Err(MailError::Authentication(
                        "Device code expired before authorization".to_string(),
                    ));
                }
                "access_denied" | "authorization_declined" => {
                    return Err(MailError::Authentication(
                        "User denied the authorization request".to_string(),
                    ));
                }
                _ => {
                    return Err(MailError::Authentication(format!(
                        "Token request error: {} - {}",
                        error.error,
                        error.error_description.unwrap_or_default()
                    )));
                }
            }
        }
    }

    /// Exchanges a refresh token for a new access token.
    pub async fn refresh_access_token(
        &self,
        refresh_token: &SecretString,
        client_id: &str,
        client_secret: Option<&SecretString>,
        scopes: &[&str],
    ) -> Result<TokenResponse> {
        debug!("Refreshing access token at {}", self.token_url);

        let scope = scopes.join(" ");
        let mut params = client_params(client_id, client_secret);
        params.push(("refresh_token", refresh_token.expose_secret()));
        params.push(("grant_type", "refresh_token"));
        if !scope.is_empty() {
            params.push(("scope", &scope));
        }

        let response = self
            .client
            .post(&self.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| MailError::Authentication(format!("Token refresh failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(MailError::Authentication(format!(
                "Token refresh failed ({}): {}",
                status,
                truncate_error_body(&body)
            )));
        }

        let token: TokenResponse = response.json().await.map_err(|e| {
            MailError::Authentication(format!("Failed to parse refresh response: {}", e))
        })?;

        info!("Access token refreshed");
        Ok(token)
    }

    pub fn device_auth_url(&self) -> &str {
        &self.device_auth_url
    }

    pub fn token_url(&self) -> &str {
        &self.token_url
    }

    pub fn provider(&self) -> OAuth2Provider {
        self.provider
    }
}
