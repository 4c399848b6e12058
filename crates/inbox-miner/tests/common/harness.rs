//! Test harness for pipeline tests.
//!
//! `MockConnector` serves a scripted mailbox from memory and records every
//! call; `CountingSink` wraps a real in-memory `Database` and counts the
//! calls made through the `EmailSink` seam.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use inbox_miner::db::{
    activity_repo, email_repo, ActivityLogRow, Database, DatabaseError, EmailSink, NewActivityLog,
    StoreOutcome,
};
use inbox_miner::mail::{EmailFilter, FetchedMessage, MailError, MailboxConnector, MessageHandle};
use inbox_miner::pipeline::{ExtractionReport, ExtractionRequest, IngestionPipeline};
use inbox_miner::PipelineError;

/// Everything a `MockConnector` was asked to do.
#[derive(Debug, Default, Clone)]
pub struct CallLog {
    pub connects: usize,
    pub disconnects: usize,
    pub searches: Vec<EmailFilter>,
    pub fetches: Vec<MessageHandle>,
}

enum Scripted {
    Message(FetchedMessage),
    FetchError(String),
}

/// In-memory mailbox with scripted failures.
pub struct MockConnector {
    mailbox: Vec<(MessageHandle, Scripted)>,
    connect_error: Option<MailError>,
    search_error: Option<MailError>,
    connected: bool,
    calls: Arc<Mutex<CallLog>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self {
            mailbox: Vec::new(),
            connect_error: None,
            search_error: None,
            connected: false,
            calls: Arc::new(Mutex::new(CallLog::default())),
        }
    }

    pub fn with_message(mut self, handle: &str, message: FetchedMessage) -> Self {
        self.mailbox
            .push((MessageHandle::new(handle), Scripted::Message(message)));
        self
    }

    /// A message that search returns but fetch fails on.
    pub fn with_broken_message(mut self, handle: &str, reason: &str) -> Self {
        self.mailbox.push((
            MessageHandle::new(handle),
            Scripted::FetchError(reason.to_string()),
        ));
        self
    }

    pub fn failing_connect(mut self, error: MailError) -> Self {
        self.connect_error = Some(error);
        self
    }

    pub fn failing_search(mut self, error: MailError) -> Self {
        self.search_error = Some(error);
        self
    }

    /// Shared view of the calls, usable after the connector is boxed.
    pub fn calls(&self) -> Arc<Mutex<CallLog>> {
        self.calls.clone()
    }
}

fn clone_error(error: &MailError) -> MailError {
    match error {
        MailError::Authentication(m) => MailError::Authentication(m.clone()),
        MailError::Connectivity(m) => MailError::Connectivity(m.clone()),
        MailError::Configuration(m) => MailError::Configuration(m.clone()),
        MailError::Protocol(m) => MailError::Protocol(m.clone()),
        other => MailError::Protocol(other.to_string()),
    }
}

#[async_trait]
impl MailboxConnector for MockConnector {
    async fn connect(&mut self) -> inbox_miner::mail::Result<()> {
        self.calls.lock().unwrap().connects += 1;
        if let Some(error) = &self.connect_error {
            return Err(clone_error(error));
        }
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.calls.lock().unwrap().disconnects += 1;
        self.connected = false;
    }

    async fn search(&mut self, filter: &EmailFilter) -> inbox_miner::mail::Result<Vec<MessageHandle>> {
        if !self.connected {
            return Err(MailError::NotConnected);
        }
        self.calls.lock().unwrap().searches.push(filter.clone());
        if let Some(error) = &self.search_error {
            return Err(clone_error(error));
        }
        Ok(self.mailbox.iter().map(|(h, _)| h.clone()).collect())
    }

    async fn fetch(&mut self, handle: &MessageHandle) -> inbox_miner::mail::Result<FetchedMessage> {
        if !self.connected {
            return Err(MailError::NotConnected);
        }
        self.calls.lock().unwrap().fetches.push(handle.clone());
        match self.mailbox.iter().find(|(h, _)| h == handle) {
            Some((_, Scripted::Message(message))) => Ok(message.clone()),
            Some((_, Scripted::FetchError(reason))) => Err(MailError::Fetch {
                handle: handle.clone(),
                reason: reason.clone(),
            }),
            None => Err(MailError::Fetch {
                handle: handle.clone(),
                reason: "no such message".to_string(),
            }),
        }
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn backend_name(&self) -> &'static str {
        "mock"
    }
}

/// `EmailSink` over a real database that counts calls.
pub struct CountingSink {
    pub db: Database,
    pub stores: AtomicUsize,
    pub logs: AtomicUsize,
}

impl CountingSink {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            stores: AtomicUsize::new(0),
            logs: AtomicUsize::new(0),
        }
    }

    pub fn store_calls(&self) -> usize {
        self.stores.load(Ordering::SeqCst)
    }

    pub fn log_calls(&self) -> usize {
        self.logs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmailSink for CountingSink {
    async fn store(
        &self,
        message: &FetchedMessage,
        processor_type: Option<&str>,
    ) -> Result<StoreOutcome, DatabaseError> {
        self.stores.fetch_add(1, Ordering::SeqCst);
        self.db.store(message, processor_type).await
    }

    async fn log_activity(&self, entry: &NewActivityLog) -> Result<i64, DatabaseError> {
        self.logs.fetch_add(1, Ordering::SeqCst);
        self.db.log_activity(entry).await
    }
}

/// One database shared by any number of pipeline runs.
pub struct TestHarness {
    pub sink: Arc<CountingSink>,
}

impl TestHarness {
    pub fn new() -> Self {
        let db = Database::open_in_memory().expect("Failed to create test database");
        Self {
            sink: Arc::new(CountingSink::new(db)),
        }
    }

    pub fn db(&self) -> &Database {
        &self.sink.db
    }

    /// Runs one batch against `connector` and returns the call log with the result.
    pub async fn run(
        &self,
        connector: MockConnector,
        request: &ExtractionRequest,
    ) -> (Result<ExtractionReport, PipelineError>, CallLog) {
        let calls = connector.calls();
        let mut pipeline = IngestionPipeline::new(Box::new(connector), self.sink.clone());
        let result = pipeline.run_with_report(request).await;
        let log = calls.lock().unwrap().clone();
        (result, log)
    }

    pub fn stored_count(&self) -> u64 {
        email_repo::count(self.db()).expect("count rows")
    }

    /// Activity rows, oldest first.
    pub fn activity(&self) -> Vec<ActivityLogRow> {
        let mut rows = activity_repo::list_recent(self.db(), 1000).expect("list activity");
        rows.reverse();
        rows
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
