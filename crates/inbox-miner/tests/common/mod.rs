//! Shared test utilities for inbox-miner integration tests.
//!
//! This module provides:
//! - Builders for fetched messages, raw RFC 822 sources and configs
//! - `TestHarness` with a scripted in-memory mailbox and a counting sink
//! - A scripted plain-TCP IMAP server for connector tests

#![allow(dead_code, unused_imports)]

pub mod builders;
pub mod harness;
pub mod imap_server;

pub use builders::*;
pub use harness::{CallLog, CountingSink, MockConnector, TestHarness};
pub use imap_server::FakeImapServer;
