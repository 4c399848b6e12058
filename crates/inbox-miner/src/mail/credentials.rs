//! Credential acquisition for mailbox connectors.
//!
//! Connectors only see the [`CredentialProvider`] trait. Passwords and
//! pre-issued tokens come from [`StaticCredentialProvider`]; OAuth2 tokens
//! that need caching, refreshing or a device-flow login come from
//! [`OAuthCredentialProvider`].

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use log::{debug, info, warn};
use secrecy::{ExposeSecret, SecretString};

use crate::config::{AuthSettings, AuthType, MailboxBackend, MailboxSettings, OAuth2Settings};
use crate::db::oauth_repo::{self, CachedToken};
use crate::db::Database;
use crate::secrets::{resolve_secret, resolve_secret_optional};

use super::device_auth::{DeviceFlowAuth, TokenResponse};
use super::error::{MailError, Result};

/// Cached tokens this close to expiry are treated as expired.
const EXPIRY_MARGIN_SECS: i64 = 300;

/// Assumed lifetime when the token endpoint omits `expires_in`.
const DEFAULT_TOKEN_LIFETIME_SECS: u64 = 3600;

/// Upper bound on any advertised token lifetime.
const MAX_TOKEN_LIFETIME_SECS: u64 = 365 * 24 * 3600;

/// What kind of secret a provider yields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialKind {
    /// Used with IMAP `LOGIN`.
    Password,
    /// OAuth2 access token, used with XOAUTH2 or as an HTTP bearer token.
    BearerToken,
}

/// Supplies the secret a connector authenticates with.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Returns a currently valid secret. Failures are
    /// [`MailError::Authentication`] or [`MailError::Configuration`].
    async fn acquire(&self) -> Result<SecretString>;

    fn kind(&self) -> CredentialKind;
}

/// A password or token read from config, a file or an environment variable.
pub struct StaticCredentialProvider {
    kind: CredentialKind,
    direct: Option<SecretString>,
    file: Option<String>,
    env_var: Option<String>,
}

impl StaticCredentialProvider {
    /// A fixed secret, mostly useful in tests.
    pub fn new(kind: CredentialKind, secret: SecretString) -> Self {
        Self {
            kind,
            direct: Some(secret),
            file: None,
            env_var: None,
        }
    }

    /// Password sources from the `auth` block.
    pub fn password(auth: &AuthSettings) -> Self {
        if auth.password_insecure.is_some() {
            warn!(
                "Using direct password value (passwordInsecure) is not recommended. \
                 Consider using passwordEnvVar or passwordFile instead."
            );
        }
        Self {
            kind: CredentialKind::Password,
            direct: auth.password_insecure.clone().map(SecretString::from),
            file: auth.password_file.clone(),
            env_var: auth.password_env_var.clone(),
        }
    }

    /// Pre-issued access token sources from the `oauth2` block.
    pub fn bearer_token(oauth2: &OAuth2Settings) -> Self {
        Self {
            kind: CredentialKind::BearerToken,
            direct: oauth2.access_token_insecure.clone().map(SecretString::from),
            file: oauth2.access_token_file.clone(),
            env_var: oauth2.access_token_env_var.clone(),
        }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentialProvider {
    async fn acquire(&self) -> Result<SecretString> {
        let secret = resolve_secret(
            self.direct.as_ref().map(|s| s.expose_secret()),
            self.file.as_deref(),
            self.env_var.as_deref(),
        )?;
        Ok(secret)
    }

    fn kind(&self) -> CredentialKind {
        self.kind
    }
}

/// OAuth2 access tokens cached in the `oauth_tokens` table.
///
/// `acquire` returns the cached token while it is valid, otherwise refreshes
/// it, otherwise runs the device flow (logging the verification URL and user
/// code) and stores the result.
pub struct OAuthCredentialProvider {
    db: Database,
    account: String,
    settings: OAuth2Settings,
    scopes: Vec<String>,
    auth: DeviceFlowAuth,
}

impl OAuthCredentialProvider {
    pub fn new(
        db: Database,
        account: impl Into<String>,
        settings: OAuth2Settings,
        backend: MailboxBackend,
    ) -> Result<Self> {
        let auth = DeviceFlowAuth::from_settings(&settings)?;
        let scopes = match &settings.scopes {
            Some(scopes) if !scopes.is_empty() => scopes.clone(),
            _ => settings
                .provider
                .default_scopes(backend)
                .iter()
                .map(|s| s.to_string())
                .collect(),
        };

        Ok(Self {
            db,
            account: account.into(),
            settings,
            scopes,
            auth,
        })
    }

    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    fn client_id(&self) -> Result<SecretString> {
        resolve_secret(
            self.settings.client_id_insecure.as_deref(),
            self.settings.client_id_file.as_deref(),
            self.settings.client_id_env_var.as_deref(),
        )
        .map_err(|e| MailError::Configuration(format!("OAuth2 client ID: {}", e)))
    }

    fn client_secret(&self) -> Result<Option<SecretString>> {
        Ok(resolve_secret_optional(
            self.settings.client_secret_insecure.as_deref(),
            self.settings.client_secret_file.as_deref(),
            self.settings.client_secret_env_var.as_deref(),
        )?)
    }

    fn scope_refs(&self) -> Vec<&str> {
        self.scopes.iter().map(String::as_str).collect()
    }

    fn cached(&self) -> Result<Option<CachedToken>> {
        oauth_repo::load(&self.db, &self.account)
            .map_err(|e| MailError::Authentication(format!("Failed to read token cache: {}", e)))
    }

    fn store(&self, token: &TokenResponse, previous_refresh: Option<String>) -> Result<()> {
        let now = Utc::now();
        let lifetime = token.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);
        let expires_at = now + ChronoDuration::seconds(lifetime.min(MAX_TOKEN_LIFETIME_SECS) as i64);

        let cached = CachedToken {
            account_name: self.account.clone(),
            provider: format!("{:?}", self.settings.provider).to_lowercase(),
            access_token: token.access_token.clone(),
            refresh_token: token.refresh_token.clone().or(previous_refresh),
            expires_at,
            updated_at: now,
        };

        oauth_repo::save(&self.db, &cached)
            .map_err(|e| MailError::Authentication(format!("Failed to store token: {}", e)))
    }

    /// Runs the device flow unconditionally and stores the resulting token.
    pub async fn authorize(&self) -> Result<SecretString> {
        let client_id = self.client_id()?;
        let client_secret = self.client_secret()?;

        let code = self
            .auth
            .request_device_code(client_id.expose_secret(), &self.scope_refs())
            .await?;

        match &code.message {
            Some(message) => warn!("{}", message),
            None => warn!(
                "To authorize mailbox access for {}, open {} and enter code {}",
                self.account, code.verification_uri, code.user_code
            ),
        }

        let token = self
            .auth
            .poll_for_token(&code, client_id.expose_secret(), client_secret.as_ref())
            .await?;

        self.store(&token, None)?;
        info!("Stored OAuth2 token for {}", self.account);
        Ok(SecretString::from(token.access_token))
    }

    /// Drops the cached token so the next `acquire` starts from scratch.
    pub fn forget(&self) -> Result<()> {
        let removed = oauth_repo::forget(&self.db, &self.account)
            .map_err(|e| MailError::Authentication(format!("Failed to clear token cache: {}", e)))?;
        if removed {
            info!("Discarded cached OAuth2 token for {}", self.account);
        }
        Ok(())
    }

    async fn refresh(&self, refresh_token: String) -> Result<SecretString> {
        let client_id = self.client_id()?;
        let client_secret = self.client_secret()?;
        let token = self
            .auth
            .refresh_access_token(
                &SecretString::from(refresh_token.clone()),
                client_id.expose_secret(),
                client_secret.as_ref(),
                &self.scope_refs(),
            )
            .await?;

        self.store(&token, Some(refresh_token))?;
        Ok(SecretString::from(token.access_token))
    }
}

#[async_trait]
impl CredentialProvider for OAuthCredentialProvider {
    async fn acquire(&self) -> Result<SecretString> {
        if let Some(row) = self.cached()? {
            if !row.expires_within(ChronoDuration::seconds(EXPIRY_MARGIN_SECS)) {
                debug!("Using cached OAuth2 token for {}", self.account);
                return Ok(SecretString::from(row.access_token));
            }

            if let Some(refresh_token) = row.refresh_token {
                match self.refresh(refresh_token).await {
                    Ok(token) => return Ok(token),
                    Err(e) => warn!(
                        "Token refresh for {} failed, starting device authorization: {}",
                        self.account, e
                    ),
                }
            }
        }

        self.authorize().await
    }

    fn kind(&self) -> CredentialKind {
        CredentialKind::BearerToken
    }
}

/// Builds the provider selected by the mailbox `auth` block.
pub fn credentials_from_settings(
    mailbox: &MailboxSettings,
    db: &Database,
) -> Result<Arc<dyn CredentialProvider>> {
    match mailbox.auth.auth_type {
        AuthType::Password => Ok(Arc::new(StaticCredentialProvider::password(&mailbox.auth))),
        AuthType::OAuth2 => {
            let oauth2 = mailbox.auth.oauth2.as_ref().ok_or_else(|| {
                MailError::Configuration(
                    "OAuth2 settings required for OAuth2 authentication".to_string(),
                )
            })?;

            if oauth2.has_static_token() {
                return Ok(Arc::new(StaticCredentialProvider::bearer_token(oauth2)));
            }

            Ok(Arc::new(OAuthCredentialProvider::new(
                db.clone(),
                mailbox.username.clone(),
                oauth2.clone(),
                mailbox.backend,
            )?))
        }
    }
}
