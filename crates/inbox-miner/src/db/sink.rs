//! Storage seam used by the ingestion pipeline.

use async_trait::async_trait;

use crate::mail::FetchedMessage;

use super::activity_repo::{self, NewActivityLog};
use super::email_repo::{self, StoreOutcome};
use super::{Database, DatabaseError};

/// Where fetched messages and their audit trail go.
#[async_trait]
pub trait EmailSink: Send + Sync {
    /// Stores `message` unless its `message_id` is already present.
    async fn store(
        &self,
        message: &FetchedMessage,
        processor_type: Option<&str>,
    ) -> Result<StoreOutcome, DatabaseError>;

    /// Appends one activity log row.
    async fn log_activity(&self, entry: &NewActivityLog) -> Result<i64, DatabaseError>;
}

#[async_trait]
impl EmailSink for Database {
    async fn store(
        &self,
        message: &FetchedMessage,
        processor_type: Option<&str>,
    ) -> Result<StoreOutcome, DatabaseError> {
        email_repo::store(self, message, processor_type)
    }

    async fn log_activity(&self, entry: &NewActivityLog) -> Result<i64, DatabaseError> {
        activity_repo::insert(self, entry)
    }
}
