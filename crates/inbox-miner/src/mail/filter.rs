//! Protocol-agnostic search criteria.

use chrono::NaiveDate;

use super::error::{MailError, Result};

/// Date constraint applied to the message received date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatePredicate {
    /// Received on exactly this day.
    Equals(NaiveDate),
    /// Received on or after this day.
    After(NaiveDate),
    /// Received between both days, inclusive.
    Range { start: NaiveDate, end: NaiveDate },
}

impl DatePredicate {
    /// Builds an inclusive range, rejecting an inverted one.
    pub fn range(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start > end {
            return Err(MailError::Configuration(format!(
                "Date range start {} is after end {}",
                start, end
            )));
        }
        Ok(DatePredicate::Range { start, end })
    }

    /// Puts the bounds of a hand-built `Range` back in order.
    fn normalized(self) -> Self {
        match self {
            DatePredicate::Range { start, end } if start > end => {
                log::warn!(
                    "Date range start {} is after end {}, swapping the bounds",
                    start,
                    end
                );
                DatePredicate::Range {
                    start: end,
                    end: start,
                }
            }
            other => other,
        }
    }
}

/// Filter applied to a mailbox search.
///
/// All fields are optional; an empty filter matches every message in the
/// folder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmailFilter {
    sender: Option<String>,
    subject: Option<String>,
    date: Option<DatePredicate>,
}

impl EmailFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts to senders whose address or name contains `sender`.
    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = non_blank(sender.into());
        self
    }

    /// Restricts to subjects containing `subject`.
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = non_blank(subject.into());
        self
    }

    /// Restricts by received date. An inverted `Range` is swapped so that no
    /// backend query ever sees `start > end`.
    pub fn with_date(mut self, date: DatePredicate) -> Self {
        self.date = Some(date.normalized());
        self
    }

    pub fn sender(&self) -> Option<&str> {
        self.sender.as_deref()
    }

    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    pub fn date(&self) -> Option<&DatePredicate> {
        self.date.as_ref()
    }

    /// True when no criteria are set and a search would return the whole folder.
    pub fn is_unbounded(&self) -> bool {
        self.sender.is_none() && self.subject.is_none() && self.date.is_none()
    }
}

fn non_blank(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}
