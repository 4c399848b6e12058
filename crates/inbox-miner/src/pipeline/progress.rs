use crate::mail::MessageHandle;

/// Events emitted by the pipeline while a batch runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// Search finished; `total` messages will be fetched.
    Found { total: usize },
    /// A message was stored. `index` is 1-based.
    Stored {
        index: usize,
        total: usize,
        message_id: String,
    },
    /// A message was already present.
    Skipped {
        index: usize,
        total: usize,
        message_id: String,
    },
    /// Fetching or storing a message failed.
    Failed {
        index: usize,
        total: usize,
        handle: MessageHandle,
        error: String,
    },
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// No-op reporter, the pipeline default.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _event: ProgressEvent) {}
}
