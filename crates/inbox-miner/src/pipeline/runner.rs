//! Idempotent ingestion: search the mailbox, fetch every match, store each
//! message once and audit every outcome.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::db::activity_repo::{ACTION_EXTRACTED, ACTION_EXTRACTION_BATCH};
use crate::db::{ActivityStatus, EmailSink, NewActivityLog, StoreOutcome};
use crate::mail::{EmailFilter, MailError, MailboxConnector, MessageHandle};

use super::error::PipelineError;
use super::progress::{NoopProgress, ProgressEvent, ProgressReporter};
use super::request::{ExtractionReport, ExtractionRequest};

pub struct IngestionPipeline {
    connector: Box<dyn MailboxConnector>,
    sink: Arc<dyn EmailSink>,
    progress: Arc<dyn ProgressReporter>,
}

impl IngestionPipeline {
    pub fn new(connector: Box<dyn MailboxConnector>, sink: Arc<dyn EmailSink>) -> Self {
        Self {
            connector,
            sink,
            progress: Arc::new(NoopProgress),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    /// Runs one batch and returns the number of newly stored messages.
    pub async fn run(&mut self, request: &ExtractionRequest) -> Result<usize, PipelineError> {
        Ok(self.run_with_report(request).await?.stored)
    }

    /// Runs one batch and returns the full outcome counts.
    ///
    /// The connector is connected for the duration of the call and always
    /// disconnected before it returns. Only connect and search failures are
    /// returned as errors; they are also written to the activity log once.
    pub async fn run_with_report(
        &mut self,
        request: &ExtractionRequest,
    ) -> Result<ExtractionReport, PipelineError> {
        let span = info_span!(
            "extraction",
            backend = self.connector.backend_name(),
            processor_type = request.processor_type.as_deref().unwrap_or("none"),
        );
        self.run_batch(request).instrument(span).await
    }

    async fn run_batch(
        &mut self,
        request: &ExtractionRequest,
    ) -> Result<ExtractionReport, PipelineError> {
        let started = Instant::now();
        let filter = request.filter();

        let handles = match self.connect_and_search(&filter).await {
            Ok(handles) => handles,
            Err(e) => {
                self.connector.disconnect().await;
                warn!("Extraction batch failed: {}", e);
                self.record(
                    NewActivityLog::new(ACTION_EXTRACTION_BATCH, ActivityStatus::Error)
                        .with_processor_type(request.processor_type.as_deref())
                        .with_message("Extraction batch failed")
                        .with_error_details(e.to_string()),
                )
                .await;
                return Err(e.into());
            }
        };

        let mut report = ExtractionReport {
            found: handles.len(),
            ..ExtractionReport::default()
        };

        if handles.is_empty() {
            info!("No messages matched");
            self.connector.disconnect().await;
            report.elapsed = started.elapsed();
            return Ok(report);
        }

        self.progress.report(ProgressEvent::Found {
            total: handles.len(),
        });

        for (i, handle) in handles.iter().enumerate() {
            self.ingest_one(handle, i + 1, handles.len(), request, &mut report)
                .instrument(info_span!("message", handle = %handle))
                .await;
        }

        self.connector.disconnect().await;
        report.elapsed = started.elapsed();
        info!("Extraction finished: {}", report);
        Ok(report)
    }

    async fn connect_and_search(
        &mut self,
        filter: &EmailFilter,
    ) -> Result<Vec<MessageHandle>, MailError> {
        self.connector.connect().await?;
        self.connector.search(filter).await
    }

    /// Fetches and stores one message, updating `report`. Never fails the batch.
    async fn ingest_one(
        &mut self,
        handle: &MessageHandle,
        index: usize,
        total: usize,
        request: &ExtractionRequest,
        report: &mut ExtractionReport,
    ) {
        let started = Instant::now();
        let processor_type = request.processor_type.as_deref();

        let message = match self.connector.fetch(handle).await {
            Ok(message) => message,
            Err(e) => {
                report.failed += 1;
                if e.is_per_message() {
                    warn!("Failed to fetch message {}: {}", handle, e);
                } else {
                    error!("Session failure while fetching message {}: {}", handle, e);
                }
                self.progress.report(ProgressEvent::Failed {
                    index,
                    total,
                    handle: handle.clone(),
                    error: e.to_string(),
                });
                self.record(
                    NewActivityLog::new(ACTION_EXTRACTED, ActivityStatus::Error)
                        .with_processor_type(processor_type)
                        .with_message(format!("Failed to fetch message {}", handle))
                        .with_error_details(e.to_string()),
                )
                .await;
                return;
            }
        };

        match self.sink.store(&message, processor_type).await {
            Ok(StoreOutcome::Inserted(id)) => {
                report.stored += 1;
                let elapsed_ms = started.elapsed().as_millis() as i64;
                debug!("Stored {} as row {} in {}ms", message.message_id, id, elapsed_ms);
                self.progress.report(ProgressEvent::Stored {
                    index,
                    total,
                    message_id: message.message_id.clone(),
                });
                self.record(
                    NewActivityLog::new(ACTION_EXTRACTED, ActivityStatus::Success)
                        .with_raw_email_id(id)
                        .with_processor_type(processor_type)
                        .with_message(format!("Extracted email: {}", message.subject))
                        .with_processing_time_ms(elapsed_ms),
                )
                .await;
            }
            Ok(StoreOutcome::AlreadyExists) => {
                report.skipped += 1;
                debug!("Message {} already stored", message.message_id);
                self.progress.report(ProgressEvent::Skipped {
                    index,
                    total,
                    message_id: message.message_id.clone(),
                });
                self.record(
                    NewActivityLog::new(ACTION_EXTRACTED, ActivityStatus::Skipped)
                        .with_processor_type(processor_type)
                        .with_message(format!("Email already exists: {}", message.message_id)),
                )
                .await;
            }
            Err(e) => {
                report.failed += 1;
                warn!("Failed to store message {}: {}", message.message_id, e);
                self.progress.report(ProgressEvent::Failed {
                    index,
                    total,
                    handle: handle.clone(),
                    error: e.to_string(),
                });
                self.record(
                    NewActivityLog::new(ACTION_EXTRACTED, ActivityStatus::Error)
                        .with_processor_type(processor_type)
                        .with_message(format!("Failed to store email {}", message.message_id))
                        .with_error_details(e.to_string()),
                )
                .await;
            }
        }
    }

    /// Appends an activity log row; a failed write is logged and dropped.
    async fn record(&self, entry: NewActivityLog) {
        if let Err(e) = self.sink.log_activity(&entry).await {
            warn!(
                "Failed to write activity log ({} / {}): {}",
                entry.action, entry.status, e
            );
        }
    }
}
