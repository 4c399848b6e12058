//! Builder patterns for creating test data programmatically.

#![allow(dead_code)]

use chrono::{NaiveDate, NaiveDateTime};

use inbox_miner::config::{MailboxSettings, Settings};
use inbox_miner::FetchedMessage;

/// Builder for [`FetchedMessage`] values.
pub struct MessageBuilder {
    message: FetchedMessage,
}

impl MessageBuilder {
    pub fn new(message_id: &str) -> Self {
        Self {
            message: FetchedMessage {
                message_id: message_id.to_string(),
                sender: "Bank Alerts <alerts@bank.example>".to_string(),
                subject: "Transfer received".to_string(),
                received_at: day_time(2025, 1, 14, 9, 0),
                body_plain: "You received 10 EUR".to_string(),
                body_html: String::new(),
                raw_headers: format!("Message-ID: <{}>", message_id),
            },
        }
    }

    pub fn sender(mut self, sender: &str) -> Self {
        self.message.sender = sender.to_string();
        self
    }

    pub fn subject(mut self, subject: &str) -> Self {
        self.message.subject = subject.to_string();
        self
    }

    pub fn received_at(mut self, at: NaiveDateTime) -> Self {
        self.message.received_at = at;
        self
    }

    pub fn plain(mut self, body: &str) -> Self {
        self.message.body_plain = body.to_string();
        self
    }

    pub fn html(mut self, body: &str) -> Self {
        self.message.body_html = body.to_string();
        self
    }

    pub fn build(self) -> FetchedMessage {
        self.message
    }
}

pub fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

pub fn day_time(y: i32, m: u32, d: u32, hour: u32, minute: u32) -> NaiveDateTime {
    day(y, m, d)
        .and_hms_opt(hour, minute, 0)
        .expect("valid time")
}

/// Builder for raw RFC 822 message sources.
pub struct RawMessageBuilder {
    message_id: Option<String>,
    from: String,
    subject: String,
    date: String,
    plain: Option<String>,
    html: Option<String>,
    attachment: Option<(String, String)>,
}

impl RawMessageBuilder {
    pub fn new() -> Self {
        Self {
            message_id: None,
            from: "Bank Alerts <alerts@bank.example>".to_string(),
            subject: "Transfer received".to_string(),
            date: "Tue, 14 Jan 2025 09:00:00 +0000".to_string(),
            plain: None,
            html: None,
            attachment: None,
        }
    }

    pub fn message_id(mut self, id: &str) -> Self {
        self.message_id = Some(id.to_string());
        self
    }

    pub fn from(mut self, from: &str) -> Self {
        self.from = from.to_string();
        self
    }

    pub fn subject(mut self, subject: &str) -> Self {
        self.subject = subject.to_string();
        self
    }

    pub fn date(mut self, date: &str) -> Self {
        self.date = date.to_string();
        self
    }

    pub fn plain(mut self, body: &str) -> Self {
        self.plain = Some(body.to_string());
        self
    }

    pub fn html(mut self, body: &str) -> Self {
        self.html = Some(body.to_string());
        self
    }

    pub fn attachment(mut self, filename: &str, content: &str) -> Self {
        self.attachment = Some((filename.to_string(), content.to_string()));
        self
    }

    /// Single-part when only one body is set, `multipart/mixed` otherwise.
    pub fn build(self) -> String {
        let mut out = String::new();
        if let Some(id) = &self.message_id {
            out.push_str(&format!("Message-ID: <{}>\r\n", id));
        }
        out.push_str(&format!("From: {}\r\n", self.from));
        out.push_str(&format!("Subject: {}\r\n", self.subject));
        out.push_str(&format!("Date: {}\r\n", self.date));
        out.push_str("MIME-Version: 1.0\r\n");

        let mut parts = Vec::new();
        if let Some(plain) = &self.plain {
            parts.push(format!(
                "Content-Type: text/plain; charset=utf-8\r\n\r\n{}\r\n",
                plain
            ));
        }
        if let Some(html) = &self.html {
            parts.push(format!(
                "Content-Type: text/html; charset=utf-8\r\n\r\n{}\r\n",
                html
            ));
        }
        if let Some((filename, content)) = &self.attachment {
            parts.push(format!(
                "Content-Type: text/plain; name=\"{0}\"\r\n\
                 Content-Disposition: attachment; filename=\"{0}\"\r\n\r\n{1}\r\n",
                filename, content
            ));
        }

        if parts.len() == 1 && self.attachment.is_none() {
            out.push_str(&parts[0]);
            return out;
        }

        let boundary = "=_test_boundary_";
        out.push_str(&format!(
            "Content-Type: multipart/mixed; boundary=\"{}\"\r\n\r\n",
            boundary
        ));
        for part in parts {
            out.push_str(&format!("--{}\r\n{}", boundary, part));
        }
        out.push_str(&format!("--{}--\r\n", boundary));
        out
    }
}

impl Default for RawMessageBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for [`Settings`] pointing at a local test server.
pub struct SettingsBuilder {
    settings: Settings,
}

impl SettingsBuilder {
    pub fn new() -> Self {
        let mut settings = Settings::default();
        settings.mailbox.username = "reader@bank.example".to_string();
        settings.mailbox.timeout_secs = 5;
        settings.mailbox.auth.password_insecure = Some("secret".to_string());
        Self { settings }
    }

    /// Plain-TCP IMAP on localhost.
    pub fn local_imap(mut self, port: u16) -> Self {
        self.settings.mailbox.imap.host = "127.0.0.1".to_string();
        self.settings.mailbox.imap.port = port;
        self.settings.mailbox.imap.use_tls = false;
        self
    }

    pub fn username(mut self, username: &str) -> Self {
        self.settings.mailbox.username = username.to_string();
        self
    }

    pub fn password(mut self, password: &str) -> Self {
        self.settings.mailbox.auth.password_insecure = Some(password.to_string());
        self
    }

    pub fn folder(mut self, folder: &str) -> Self {
        self.settings.mailbox.folder = folder.to_string();
        self
    }

    pub fn build(self) -> Settings {
        self.settings
    }

    pub fn mailbox(self) -> MailboxSettings {
        self.settings.mailbox
    }
}

impl Default for SettingsBuilder {
    fn default() -> Self {
        Self::new()
    }
}
