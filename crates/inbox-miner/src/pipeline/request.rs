use std::fmt;
use std::time::Duration;

use crate::config::ProcessorProfile;
use crate::mail::{DatePredicate, EmailFilter};

/// What one pipeline run should extract.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractionRequest {
    pub sender: Option<String>,
    pub subject: Option<String>,
    pub date: Option<DatePredicate>,
    /// Tag written to every stored row and log entry of the run.
    pub processor_type: Option<String>,
}

impl ExtractionRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_date(mut self, date: DatePredicate) -> Self {
        self.date = Some(date);
        self
    }

    pub fn with_processor_type(mut self, processor_type: impl Into<String>) -> Self {
        self.processor_type = Some(processor_type.into());
        self
    }

    /// The search filter for this request.
    pub fn filter(&self) -> EmailFilter {
        let mut filter = EmailFilter::new();
        if let Some(sender) = &self.sender {
            filter = filter.with_sender(sender.as_str());
        }
        if let Some(subject) = &self.subject {
            filter = filter.with_subject(subject.as_str());
        }
        if let Some(date) = self.date {
            filter = filter.with_date(date);
        }
        filter
    }

    /// Expands this request into the batches a processor profile implies.
    ///
    /// Every batch is tagged with `name`. Without an explicit sender there is
    /// one batch per sender pattern; the profile's first subject pattern is
    /// used when no subject was given.
    pub fn for_profile(&self, name: &str, profile: &ProcessorProfile) -> Vec<ExtractionRequest> {
        let subject = self
            .subject
            .clone()
            .or_else(|| profile.subject_patterns.first().cloned());
        let base = ExtractionRequest {
            subject,
            processor_type: Some(name.to_string()),
            ..self.clone()
        };

        if base.sender.is_some() {
            return vec![base];
        }

        profile
            .sender_patterns
            .iter()
            .map(|pattern| ExtractionRequest {
                sender: Some(pattern.clone()),
                ..base.clone()
            })
            .collect()
    }
}

/// Outcome counts of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractionReport {
    /// Handles returned by the search.
    pub found: usize,
    pub stored: usize,
    /// Already present in storage.
    pub skipped: usize,
    pub failed: usize,
    pub elapsed: Duration,
}

impl fmt::Display for ExtractionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "found {}, stored {}, skipped {}, failed {} in {:.1}s",
            self.found,
            self.stored,
            self.skipped,
            self.failed,
            self.elapsed.as_secs_f64()
        )
    }
}
