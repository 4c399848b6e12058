//! MIME parsing and body extraction.
//!
//! Raw RFC 5322 bytes are parsed with `mail-parser`, converted into a small
//! [`MimeNode`] tree and walked in document order. Text leaves keep their
//! transfer-decoded bytes, so the charset fallback below applies to them;
//! those that are not attachments are collected into a plain and an HTML
//! body.

use std::borrow::Cow;

use chrono::{DateTime, NaiveDateTime, Utc};
use encoding_rs::{Encoding, WINDOWS_1252};
use log::{debug, warn};
use mail_parser::decoders::base64::base64_decode;
use mail_parser::decoders::quoted_printable::quoted_printable_decode;
use mail_parser::{
    Encoding as TransferEncoding, Message, MessageParser, MessagePart, MimeHeaders, PartType,
};

use super::error::{MailError, Result};
use super::{FetchedMessage, MessageHandle};

/// Separator between multiple text parts of the same kind.
const PART_SEPARATOR: &str = "\n\n";

/// Nesting limit when descending into multiparts and attached messages.
const MAX_DEPTH: usize = 32;

/// Decoded body of a leaf part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeafBody {
    /// Text already decoded by the MIME parser, used when the raw part
    /// could not be transfer-decoded.
    Text(String),
    /// Transfer-decoded bytes still in their declared charset.
    Bytes(Vec<u8>),
}

/// A non-container MIME part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MimeLeaf {
    /// Lowercased `type/subtype`.
    pub content_type: String,
    pub charset: Option<String>,
    /// Content-Disposition is `attachment`.
    pub is_attachment: bool,
    pub body: LeafBody,
}

impl MimeLeaf {
    pub fn text(content_type: &str, body: &str) -> Self {
        Self {
            content_type: content_type.to_ascii_lowercase(),
            charset: None,
            is_attachment: false,
            body: LeafBody::Text(body.to_string()),
        }
    }

    pub fn bytes(content_type: &str, charset: Option<&str>, body: &[u8]) -> Self {
        Self {
            content_type: content_type.to_ascii_lowercase(),
            charset: charset.map(str::to_string),
            is_attachment: false,
            body: LeafBody::Bytes(body.to_vec()),
        }
    }

    pub fn into_attachment(mut self) -> Self {
        self.is_attachment = true;
        self
    }

    fn decoded(&self) -> Cow<'_, str> {
        match &self.body {
            LeafBody::Text(text) => Cow::Borrowed(text.as_str()),
            LeafBody::Bytes(bytes) => Cow::Owned(decode_payload(bytes, self.charset.as_deref())),
        }
    }
}

/// MIME part tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MimeNode {
    /// `multipart/*` or an embedded `message/rfc822`.
    Container(Vec<MimeNode>),
    Leaf(MimeLeaf),
}

/// Plain and HTML bodies extracted from a message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedBodies {
    pub plain: String,
    pub html: String,
}

/// Decodes a payload with its declared charset.
///
/// Falls back to UTF-8, then Latin-1 (as windows-1252), then lossy UTF-8.
pub fn decode_payload(bytes: &[u8], charset: Option<&str>) -> String {
    if let Some(encoding) = charset.and_then(|label| Encoding::for_label(label.trim().as_bytes())) {
        if let Some(text) = encoding.decode_without_bom_handling_and_without_replacement(bytes) {
            return text.into_owned();
        }
        debug!("Payload is not valid {}, trying fallbacks", encoding.name());
    }

    if let Ok(text) = std::str::from_utf8(bytes) {
        return text.to_string();
    }

    let (text, had_errors) = WINDOWS_1252.decode_without_bom_handling(bytes);
    if !had_errors {
        return text.into_owned();
    }

    String::from_utf8_lossy(bytes).into_owned()
}

/// Collects the plain and HTML bodies of a part tree.
///
/// A lone leaf at the root is a single-part message: it is used whatever its
/// disposition, as HTML when it is `text/html` and as plain text otherwise.
pub fn extract_bodies(root: &MimeNode) -> ExtractedBodies {
    let mut plain = Vec::new();
    let mut html = Vec::new();

    match root {
        MimeNode::Leaf(leaf) => {
            let text = leaf.decoded();
            let text = text.trim();
            if !text.is_empty() {
                if leaf.content_type == "text/html" {
                    html.push(text.to_string());
                } else {
                    plain.push(text.to_string());
                }
            }
        }
        MimeNode::Container(_) => collect_text(root, &mut plain, &mut html),
    }

    ExtractedBodies {
        plain: plain.join(PART_SEPARATOR),
        html: html.join(PART_SEPARATOR),
    }
}

fn collect_text(node: &MimeNode, plain: &mut Vec<String>, html: &mut Vec<String>) {
    match node {
        MimeNode::Container(children) => {
            for child in children {
                collect_text(child, plain, html);
            }
        }
        MimeNode::Leaf(leaf) => {
            if leaf.is_attachment {
                return;
            }
            let target = match leaf.content_type.as_str() {
                "text/plain" => &mut *plain,
                "text/html" => &mut *html,
                _ => return,
            };
            let text = leaf.decoded();
            let text = text.trim();
            if !text.is_empty() {
                target.push(text.to_string());
            }
        }
    }
}

/// Renders the header block of a raw message as `Name: Value` lines.
///
/// Headers keep their original order and duplicates; folded values are
/// unfolded onto one line.
pub fn flatten_headers(raw: &[u8]) -> String {
    let block = &raw[..header_block_end(raw)];
    let block = String::from_utf8_lossy(block);

    let mut headers: Vec<(String, String)> = Vec::new();
    for line in block.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.starts_with(' ') || line.starts_with('\t') {
            if let Some((_, value)) = headers.last_mut() {
                let continuation = line.trim();
                if !continuation.is_empty() {
                    if !value.is_empty() {
                        value.push(' ');
                    }
                    value.push_str(continuation);
                }
            }
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            let name = name.trim();
            if !name.is_empty() && !name.contains(' ') {
                headers.push((name.to_string(), value.trim().to_string()));
            }
        }
    }

    headers
        .iter()
        .map(|(name, value)| format!("{}: {}", name, value))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Offset of the blank line that ends the header block.
fn header_block_end(raw: &[u8]) -> usize {
    let crlf = find(raw, b"\r\n\r\n");
    let lf = find(raw, b"\n\n");
    match (crlf, lf) {
        (Some(a), Some(b)) => a.min(b),
        (Some(a), None) => a,
        (None, Some(b)) => b,
        (None, None) => raw.len(),
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Converts a parsed message into a [`MimeNode`] tree rooted at its first part.
pub fn mime_tree(message: &Message<'_>) -> MimeNode {
    node_from_part(message, 0, 0)
}

fn node_from_part(message: &Message<'_>, index: usize, depth: usize) -> MimeNode {
    let Some(part) = message.parts.get(index) else {
        return MimeNode::Container(Vec::new());
    };

    if depth > MAX_DEPTH {
        warn!("MIME nesting deeper than {} levels, ignoring the rest", MAX_DEPTH);
        return MimeNode::Container(Vec::new());
    }

    match &part.body {
        PartType::Multipart(children) => MimeNode::Container(
            children
                .iter()
                .map(|child| node_from_part(message, *child as usize, depth + 1))
                .collect(),
        ),
        PartType::Message(nested) => {
            MimeNode::Container(vec![node_from_part(nested, 0, depth + 1)])
        }
        PartType::Text(text) => MimeNode::Leaf(leaf_from_part(
            part,
            "text/plain",
            text_body(message, part, text),
        )),
        PartType::Html(html) => MimeNode::Leaf(leaf_from_part(
            part,
            "text/html",
            text_body(message, part, html),
        )),
        PartType::Binary(bytes) | PartType::InlineBinary(bytes) => MimeNode::Leaf(leaf_from_part(
            part,
            "application/octet-stream",
            LeafBody::Bytes(bytes.to_vec()),
        )),
    }
}

fn text_body(message: &Message<'_>, part: &MessagePart<'_>, parsed: &str) -> LeafBody {
    match transfer_decoded(message, part) {
        Some(bytes) => LeafBody::Bytes(bytes),
        None => LeafBody::Text(parsed.to_string()),
    }
}

/// Body bytes of `part` with Content-Transfer-Encoding undone, still in the
/// declared charset.
fn transfer_decoded(message: &Message<'_>, part: &MessagePart<'_>) -> Option<Vec<u8>> {
    if part.is_encoding_problem {
        return None;
    }
    let raw = message
        .raw_message
        .get(part.offset_body as usize..part.offset_end as usize)?;
    match part.encoding {
        TransferEncoding::None => Some(raw.to_vec()),
        TransferEncoding::QuotedPrintable => quoted_printable_decode(raw),
        TransferEncoding::Base64 => base64_decode(raw),
    }
}

fn leaf_from_part(part: &MessagePart<'_>, default_type: &str, body: LeafBody) -> MimeLeaf {
    let (content_type, charset) = match part.content_type() {
        Some(ct) => {
            let full = match ct.subtype() {
                Some(subtype) => format!("{}/{}", ct.ctype(), subtype),
                None => ct.ctype().to_string(),
            };
            (full.to_ascii_lowercase(), ct.attribute("charset").map(str::to_string))
        }
        None => (default_type.to_string(), None),
    };

    let is_attachment = part
        .content_disposition()
        .is_some_and(|cd| cd.ctype().eq_ignore_ascii_case("attachment"));

    MimeLeaf {
        content_type,
        charset,
        is_attachment,
        body,
    }
}

/// Parses a raw message into a [`FetchedMessage`].
pub fn parse_message(raw: &[u8], handle: &MessageHandle) -> Result<FetchedMessage> {
    if raw.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(MailError::fetch(handle, "empty message body"));
    }

    let message = MessageParser::default()
        .parse(raw)
        .ok_or_else(|| MailError::fetch(handle, "unparseable MIME message"))?;

    let message_id = message
        .message_id()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("generated-{}", handle));

    let sender = message
        .from()
        .and_then(|addr| addr.first())
        .map(format_address)
        .unwrap_or_default();

    let subject = message.subject().unwrap_or_default().to_string();

    let received_at = message
        .date()
        .and_then(|date| DateTime::<Utc>::from_timestamp(date.to_timestamp(), 0))
        .map(|date| date.naive_utc())
        .unwrap_or_else(|| {
            warn!(
                "Message {} has no usable Date header, using current time",
                handle
            );
            now_utc()
        });

    let bodies = extract_bodies(&mime_tree(&message));

    debug!(
        "Parsed message {} ({} plain bytes, {} html bytes)",
        handle,
        bodies.plain.len(),
        bodies.html.len()
    );

    Ok(FetchedMessage {
        message_id,
        sender,
        subject,
        received_at,
        body_plain: bodies.plain,
        body_html: bodies.html,
        raw_headers: flatten_headers(raw),
    })
}

/// Formats an address as "Name <email@example.com>", or just the address.
fn format_address(addr: &mail_parser::Addr<'_>) -> String {
    let address = addr.address().unwrap_or_default();
    match addr.name().map(str::trim).filter(|name| !name.is_empty()) {
        Some(name) if !address.is_empty() => format!("{} <{}>", name, address),
        Some(name) => name.to_string(),
        None => address.to_string(),
    }
}

fn now_utc() -> NaiveDateTime {
    Utc::now().naive_utc()
}
