//! Compiles an [`EmailFilter`] into backend-specific search queries.
//!
//! IMAP can evaluate every criterion server-side, so the whole filter becomes
//! a list of search keys. Microsoft Graph's `$filter` grammar has no substring
//! operator for `from` or `subject`, so only the date predicate is pushed to
//! the server there; sender and subject are returned as a [`ClientFilter`]
//! that the connector applies to every page it receives. That means a Graph
//! search walks every message in the date window.

use std::fmt;

use chrono::{Days, NaiveDate};
use log::warn;

use super::filter::{DatePredicate, EmailFilter};

/// IMAP date format (RFC 3501 `date`): `01-Jan-2025`.
const IMAP_DATE_FORMAT: &str = "%d-%b-%Y";

#[derive(Debug, Clone, PartialEq, Eq)]
enum SearchKey {
    /// Keyword or date, sent verbatim.
    Atom(String),
    /// User-supplied text, sent as a quoted string or a literal.
    Text(String),
}

impl SearchKey {
    fn atom(value: impl Into<String>) -> Self {
        SearchKey::Atom(value.into())
    }

    fn quoted(&self) -> String {
        match self {
            SearchKey::Atom(atom) => atom.clone(),
            SearchKey::Text(text) => quote_imap(text),
        }
    }
}

/// Search keys for an IMAP `SEARCH` / `UID SEARCH` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImapQuery {
    keys: Vec<SearchKey>,
}

impl ImapQuery {
    /// The individual search keys as they appear on the wire when quoted.
    pub fn keys(&self) -> Vec<String> {
        self.keys.iter().map(SearchKey::quoted).collect()
    }

    /// True when every key is 7-bit and fits in a quoted string.
    pub fn is_ascii(&self) -> bool {
        self.keys.iter().all(|key| match key {
            SearchKey::Atom(value) | SearchKey::Text(value) => value.is_ascii(),
        })
    }

    /// Arguments for `UID SEARCH`.
    ///
    /// Non-ASCII queries declare `CHARSET UTF-8`. Quoted strings are 7-bit
    /// only, so with `literal_plus` (the server advertises `LITERAL+`) every
    /// non-ASCII value is sent as a non-synchronizing literal instead.
    /// Without it the value stays quoted, which lenient servers accept.
    pub fn search_arguments(&self, literal_plus: bool) -> String {
        if self.is_ascii() {
            return self.to_string();
        }

        let keys: Vec<String> = self
            .keys
            .iter()
            .map(|key| match key {
                SearchKey::Text(text) if literal_plus && !text.is_ascii() => {
                    format!("{{{}+}}\r\n{}", text.len(), text)
                }
                other => other.quoted(),
            })
            .collect();
        format!("CHARSET UTF-8 {}", keys.join(" "))
    }
}

impl fmt::Display for ImapQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.keys().join(" "))
    }
}

/// Criteria the Graph API cannot evaluate; applied locally to each page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientFilter {
    sender: Option<String>,
    subject: Option<String>,
}

impl ClientFilter {
    pub fn is_empty(&self) -> bool {
        self.sender.is_none() && self.subject.is_none()
    }

    /// Case-insensitive substring match against the sender address, the
    /// sender display name and the subject.
    pub fn matches(
        &self,
        sender_address: Option<&str>,
        sender_name: Option<&str>,
        subject: Option<&str>,
    ) -> bool {
        if let Some(needle) = &self.sender {
            let needle = needle.to_lowercase();
            let hit = [sender_address, sender_name]
                .into_iter()
                .flatten()
                .any(|value| value.to_lowercase().contains(&needle));
            if !hit {
                return false;
            }
        }

        if let Some(needle) = &self.subject {
            let hit = subject.is_some_and(|s| s.to_lowercase().contains(&needle.to_lowercase()));
            if !hit {
                return false;
            }
        }

        true
    }
}

/// A Graph message query: server-side OData filter plus residual local filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphQuery {
    /// Value for the `$filter` query parameter; `None` means no parameter.
    pub odata_filter: Option<String>,
    /// Sender/subject criteria applied after each page is received.
    pub client_filter: ClientFilter,
}

/// Compiles a filter into IMAP search keys.
pub fn compile_imap(filter: &EmailFilter) -> ImapQuery {
    let mut keys = Vec::new();

    if let Some(sender) = filter.sender() {
        keys.push(SearchKey::atom("FROM"));
        keys.push(SearchKey::Text(sender.to_string()));
    }

    if let Some(subject) = filter.subject() {
        keys.push(SearchKey::atom("SUBJECT"));
        keys.push(SearchKey::Text(subject.to_string()));
    }

    match filter.date() {
        Some(DatePredicate::Equals(day)) => {
            keys.push(SearchKey::atom("ON"));
            keys.push(SearchKey::atom(imap_date(*day)));
        }
        Some(DatePredicate::After(day)) => {
            // SINCE is inclusive of the given day.
            keys.push(SearchKey::atom("SINCE"));
            keys.push(SearchKey::atom(imap_date(*day)));
        }
        Some(DatePredicate::Range { start, end }) => {
            keys.push(SearchKey::atom("SINCE"));
            keys.push(SearchKey::atom(imap_date(*start)));
            // BEFORE is exclusive, so step past the last wanted day.
            if let Some(end_exclusive) = next_day(*end) {
                keys.push(SearchKey::atom("BEFORE"));
                keys.push(SearchKey::atom(imap_date(end_exclusive)));
            }
        }
        None => {}
    }

    if keys.is_empty() {
        warn!("No search criteria given; IMAP search will return the entire folder");
        keys.push(SearchKey::atom("ALL"));
    }

    ImapQuery { keys }
}

/// Compiles a filter into a Graph OData filter plus a client-side filter.
pub fn compile_graph(filter: &EmailFilter) -> GraphQuery {
    let odata_filter = filter.date().map(|date| match date {
        DatePredicate::Equals(day) => match next_day(*day) {
            Some(following) => format!(
                "receivedDateTime ge {} and receivedDateTime lt {}",
                graph_midnight(*day),
                graph_midnight(following)
            ),
            None => format!("receivedDateTime ge {}", graph_midnight(*day)),
        },
        DatePredicate::After(day) => format!("receivedDateTime ge {}", graph_midnight(*day)),
        DatePredicate::Range { start, end } => match next_day(*end) {
            Some(end_exclusive) => format!(
                "receivedDateTime ge {} and receivedDateTime lt {}",
                graph_midnight(*start),
                graph_midnight(end_exclusive)
            ),
            None => format!("receivedDateTime ge {}", graph_midnight(*start)),
        },
    });

    if filter.is_unbounded() {
        warn!("No search criteria given; Graph search will page through the entire folder");
    }

    GraphQuery {
        odata_filter,
        client_filter: ClientFilter {
            sender: filter.sender().map(str::to_string),
            subject: filter.subject().map(str::to_string),
        },
    }
}

/// Quotes a value as an IMAP quoted string.
///
/// Backslash and double quote are escaped. CR and LF are not allowed inside a
/// quoted string at all, so they are folded to spaces.
pub fn quote_imap(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        match c {
            '\\' => quoted.push_str("\\\\"),
            '"' => quoted.push_str("\\\""),
            '\r' | '\n' => quoted.push(' '),
            other => quoted.push(other),
        }
    }
    quoted.push('"');
    quoted
}

fn imap_date(day: NaiveDate) -> String {
    day.format(IMAP_DATE_FORMAT).to_string()
}

fn graph_midnight(day: NaiveDate) -> String {
    format!("{}T00:00:00Z", day.format("%Y-%m-%d"))
}

fn next_day(day: NaiveDate) -> Option<NaiveDate> {
    day.checked_add_days(Days::new(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_imap_after_is_inclusive_since() {
        let filter = EmailFilter::new().with_date(DatePredicate::After(day(2025, 1, 1)));
        assert_eq!(compile_imap(&filter).to_string(), "SINCE 01-Jan-2025");
    }

    #[test]
    fn test_imap_range_end_is_made_inclusive() {
        let filter = EmailFilter::new().with_date(
            DatePredicate::range(day(2024, 1, 1), day(2024, 1, 31)).unwrap(),
        );
        assert_eq!(
            compile_imap(&filter).to_string(),
            "SINCE 01-Jan-2024 BEFORE 01-Feb-2024"
        );
    }

    #[test]
    fn test_imap_range_across_year_boundary() {
        let filter = EmailFilter::new().with_date(
            DatePredicate::range(day(2024, 12, 1), day(2024, 12, 31)).unwrap(),
        );
        assert_eq!(
            compile_imap(&filter).to_string(),
            "SINCE 01-Dec-2024 BEFORE 01-Jan-2025"
        );
    }

    #[test]
    fn test_imap_equals_uses_on() {
        let filter = EmailFilter::new().with_date(DatePredicate::Equals(day(2024, 3, 5)));
        assert_eq!(compile_imap(&filter).to_string(), "ON 05-Mar-2024");
    }

    #[test]
    fn test_imap_sender_and_subject_are_quoted() {
        let filter = EmailFilter::new()
            .with_sender("alerts@bank.example")
            .with_subject("Alertas y Notificaciones");
        let query = compile_imap(&filter);
        assert_eq!(
            query.keys(),
            &[
                "FROM",
                "\"alerts@bank.example\"",
                "SUBJECT",
                "\"Alertas y Notificaciones\""
            ]
        );
    }

    #[test]
    fn test_imap_escapes_double_quote() {
        let filter = EmailFilter::new().with_sender("a\"b@x.com");
        let query = compile_imap(&filter);
        assert_eq!(query.to_string(), r#"FROM "a\"b@x.com""#);
    }

    #[test]
    fn test_imap_escapes_backslash_before_quote() {
        assert_eq!(quote_imap(r#"a\"b"#), r#""a\\\"b""#);
    }

    #[test]
    fn test_imap_quoted_string_is_structurally_valid() {
        // Every quote inside the value must be preceded by an odd run of
        // backslashes so that only the outer quotes terminate the string.
        let quoted = quote_imap(r#"we"ird\\"name\"#);
        let inner = &quoted[1..quoted.len() - 1];
        let mut backslashes = 0;
        for c in inner.chars() {
            match c {
                '\\' => backslashes += 1,
                '"' => {
                    assert_eq!(backslashes % 2, 1, "unescaped quote in {}", quoted);
                    backslashes = 0;
                }
                _ => {
                    assert_eq!(backslashes % 2, 0, "dangling escape in {}", quoted);
                    backslashes = 0;
                }
            }
        }
        assert_eq!(backslashes % 2, 0);
    }

    #[test]
    fn test_imap_folds_line_breaks() {
        assert_eq!(quote_imap("a\r\nb"), "\"a  b\"");
    }

    #[test]
    fn test_imap_non_ascii_declares_charset() {
        let filter = EmailFilter::new().with_subject("Transacción");
        assert_eq!(
            compile_imap(&filter).search_arguments(false),
            "CHARSET UTF-8 SUBJECT \"Transacción\""
        );
        let filter = EmailFilter::new().with_subject("Pago");
        assert_eq!(compile_imap(&filter).search_arguments(true), "SUBJECT \"Pago\"");
    }

    #[test]
    fn test_imap_non_ascii_values_become_literals() {
        let filter = EmailFilter::new()
            .with_sender("banco@example.com")
            .with_subject("Transacción");
        let query = compile_imap(&filter);
        assert!(!query.is_ascii());
        // "Transacción" is 12 bytes in UTF-8; ASCII values stay quoted.
        assert_eq!(
            query.search_arguments(true),
            "CHARSET UTF-8 FROM \"banco@example.com\" SUBJECT {12+}\r\nTransacción"
        );
    }

    #[test]
    fn test_imap_hand_built_inverted_range_is_ordered() {
        let filter = EmailFilter::new().with_date(DatePredicate::Range {
            start: day(2024, 1, 31),
            end: day(2024, 1, 1),
        });
        assert_eq!(
            compile_imap(&filter).to_string(),
            "SINCE 01-Jan-2024 BEFORE 01-Feb-2024"
        );
        assert_eq!(
            compile_graph(&filter).odata_filter.as_deref(),
            Some("receivedDateTime ge 2024-01-01T00:00:00Z and receivedDateTime lt 2024-02-01T00:00:00Z")
        );
    }

    #[test]
    fn test_imap_empty_filter_is_all() {
        let query = compile_imap(&EmailFilter::new());
        assert_eq!(query.keys(), ["ALL"]);
        assert_eq!(query.to_string(), "ALL");
    }

    #[test]
    fn test_graph_equals_spans_one_day() {
        let filter = EmailFilter::new().with_date(DatePredicate::Equals(day(2024, 2, 29)));
        let query = compile_graph(&filter);
        assert_eq!(
            query.odata_filter.as_deref(),
            Some("receivedDateTime ge 2024-02-29T00:00:00Z and receivedDateTime lt 2024-03-01T00:00:00Z")
        );
    }

    #[test]
    fn test_graph_after() {
        let filter = EmailFilter::new().with_date(DatePredicate::After(day(2025, 1, 1)));
        assert_eq!(
            compile_graph(&filter).odata_filter.as_deref(),
            Some("receivedDateTime ge 2025-01-01T00:00:00Z")
        );
    }

    #[test]
    fn test_graph_range() {
        let filter = EmailFilter::new().with_date(
            DatePredicate::range(day(2024, 1, 1), day(2024, 1, 31)).unwrap(),
        );
        assert_eq!(
            compile_graph(&filter).odata_filter.as_deref(),
            Some("receivedDateTime ge 2024-01-01T00:00:00Z and receivedDateTime lt 2024-02-01T00:00:00Z")
        );
    }

    #[test]
    fn test_graph_keeps_sender_and_subject_client_side() {
        let filter = EmailFilter::new()
            .with_sender("bank.example")
            .with_subject("Movimiento");
        let query = compile_graph(&filter);
        assert!(query.odata_filter.is_none());
        assert!(!query.client_filter.is_empty());
    }

    #[test]
    fn test_graph_empty_filter_has_no_parameter() {
        let query = compile_graph(&EmailFilter::new());
        assert!(query.odata_filter.is_none());
        assert!(query.client_filter.is_empty());
    }

    #[test]
    fn test_client_filter_matching() {
        let filter = compile_graph(
            &EmailFilter::new()
                .with_sender("Bank.Example")
                .with_subject("alertas"),
        )
        .client_filter;

        assert!(filter.matches(
            Some("notify@bank.example"),
            None,
            Some("Alertas y Notificaciones")
        ));
        // Display name is also considered.
        assert!(filter.matches(
            Some("noreply@mailer.example"),
            Some("bank.example alerts"),
            Some("ALERTAS")
        ));
        assert!(!filter.matches(Some("other@x.example"), None, Some("Alertas")));
        assert!(!filter.matches(Some("notify@bank.example"), None, Some("Newsletter")));
        assert!(!filter.matches(Some("notify@bank.example"), None, None));
    }

    #[test]
    fn test_empty_client_filter_matches_everything() {
        let filter = ClientFilter::default();
        assert!(filter.matches(None, None, None));
    }
}
