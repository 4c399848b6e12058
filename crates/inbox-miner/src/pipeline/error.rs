use thiserror::Error;

use crate::db::DatabaseError;
use crate::mail::MailError;

/// Batch-level failures. Per-message failures are counted and audited
/// instead of being returned.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Mailbox error: {0}")]
    Mail(#[from] MailError),

    #[error("Storage failed: {0}")]
    Storage(#[from] DatabaseError),
}
