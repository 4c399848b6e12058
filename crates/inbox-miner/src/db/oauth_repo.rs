//! Cached OAuth2 tokens, one row per mailbox account.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension};

use super::{Database, DatabaseError};

/// Access token (and refresh token, when issued) for one account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedToken {
    pub account_name: String,
    pub provider: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CachedToken {
    /// True when the token is already expired or expires within `margin`.
    pub fn expires_within(&self, margin: Duration) -> bool {
        self.expires_at <= Utc::now() + margin
    }
}

/// Stores `token`, replacing any earlier token for the same account.
pub fn save(db: &Database, token: &CachedToken) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO oauth_tokens
               (account_name, provider, access_token, refresh_token, expires_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
             ON CONFLICT(account_name) DO UPDATE SET
               provider = excluded.provider,
               access_token = excluded.access_token,
               refresh_token = excluded.refresh_token,
               expires_at = excluded.expires_at,
               updated_at = excluded.updated_at",
            params![
                token.account_name,
                token.provider,
                token.access_token,
                token.refresh_token,
                token.expires_at,
                token.updated_at,
            ],
        )?;
        Ok(())
    })
}

pub fn load(db: &Database, account_name: &str) -> Result<Option<CachedToken>, DatabaseError> {
    db.with_conn(|conn| {
        let token = conn
            .query_row(
                "SELECT account_name, provider, access_token, refresh_token, expires_at, updated_at
                 FROM oauth_tokens WHERE account_name = ?1",
                params![account_name],
                |row| {
                    Ok(CachedToken {
                        account_name: row.get(0)?,
                        provider: row.get(1)?,
                        access_token: row.get(2)?,
                        refresh_token: row.get(3)?,
                        expires_at: row.get(4)?,
                        updated_at: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(token)
    })
}

/// Removes the account's token. Returns false when none was cached.
pub fn forget(db: &Database, account_name: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let removed = conn.execute(
            "DELETE FROM oauth_tokens WHERE account_name = ?1",
            params![account_name],
        )?;
        Ok(removed > 0)
    })
}
