//! Admission decisions for client messages.
//!
//! A rejected query is not refused at the protocol level. It is replaced by
//! a statement that the backend parses but fails to execute, so the client
//! receives an ordinary `ErrorResponse` carrying our diagnostic and the
//! session stays usable.

use pgfilter_core::{Policy, single_line};
use pgfilter_sql::{Fingerprint, Fingerprinter};

use crate::message::FrontendMessage;

/// Diagnostic sent back for a well-formed query that is not allow-listed.
pub const NOT_ALLOWED_MESSAGE: &str = "query is not allowed";

/// Why a message was not forwarded as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// The query text could not be fingerprinted.
    ParseFailure { error: String, sql: String },
    /// The query's fingerprint is not in the allow-list.
    NotAllowed { fingerprint: Fingerprint, sql: String },
    /// A non-query message type is not in the allow-list.
    CommandNotAllowed { tag: u8 },
}

impl Rejection {
    /// The diagnostic the client sees.
    pub fn reason(&self) -> String {
        match self {
            Self::ParseFailure { error, .. } => format!("failed to parse query: {error}"),
            Self::NotAllowed { .. } => NOT_ALLOWED_MESSAGE.to_string(),
            Self::CommandNotAllowed { .. } => "disallowed client command".to_string(),
        }
    }

    pub fn fingerprint(&self) -> Option<&Fingerprint> {
        match self {
            Self::NotAllowed { fingerprint, .. } => Some(fingerprint),
            _ => None,
        }
    }

    /// The rejected query text, if the message was a query.
    pub fn sql(&self) -> Option<&str> {
        match self {
            Self::ParseFailure { sql, .. } | Self::NotAllowed { sql, .. } => Some(sql),
            Self::CommandNotAllowed { .. } => None,
        }
    }
}

/// What to do with one client message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Send the message to the backend unchanged.
    Forward(FrontendMessage),
    /// Send `message` in place of the original.
    Rewrite {
        message: FrontendMessage,
        rejection: Rejection,
    },
    /// Drop the message and close the connection.
    Terminate(Rejection),
}

/// Decides the fate of each client message under a policy snapshot.
///
/// Implementations must not block: they run inline on the connection task.
pub trait MessageHandler: Send + Sync {
    fn handle(&self, message: FrontendMessage, policy: &Policy) -> Verdict;
}

/// The default handler: fingerprint allow-listing for simple queries and a
/// tag allow-list for every other message type.
#[derive(Debug, Clone, Copy, Default)]
pub struct AdmissionController;

impl AdmissionController {
    pub fn new() -> Self {
        Self
    }

    fn admit_query(&self, text: String, policy: &Policy) -> Verdict {
        let fingerprinter = Fingerprinter::new().ignore_unix_timestamps(policy.ignore_unix_timestamps);

        let rejection = match fingerprinter.fingerprint(&text) {
            Ok(fingerprint) if policy.allows_fingerprint(fingerprint.as_str()) => {
                return Verdict::Forward(FrontendMessage::Query { text });
            }
            Ok(fingerprint) => Rejection::NotAllowed {
                fingerprint,
                sql: text,
            },
            Err(e) => Rejection::ParseFailure {
                error: e.to_string(),
                sql: text,
            },
        };
        rewrite(rejection)
    }
}

fn rewrite(rejection: Rejection) -> Verdict {
    Verdict::Rewrite {
        message: FrontendMessage::Query {
            text: error_query(&rejection.reason()),
        },
        rejection,
    }
}

impl MessageHandler for AdmissionController {
    fn handle(&self, message: FrontendMessage, policy: &Policy) -> Verdict {
        match message {
            FrontendMessage::Query { text } => self.admit_query(text, policy),
            FrontendMessage::UndecodableQuery { bytes } => rewrite(Rejection::ParseFailure {
                error: "query text is not valid UTF-8".to_string(),
                sql: String::from_utf8_lossy(&bytes).into_owned(),
            }),
            FrontendMessage::Other { tag, .. } if !policy.allows_command(tag) => {
                Verdict::Terminate(Rejection::CommandNotAllowed { tag })
            }
            message => Verdict::Forward(message),
        }
    }
}

/// Build a statement that fails on the backend with `message` in the error.
///
/// The message is flattened onto one line and embedded in an escape string
/// literal with every quote and backslash escaped, so nothing in it can end
/// the literal early.
pub fn error_query(message: &str) -> String {
    let escaped = single_line(message)
        .replace('\\', "\\\\")
        .replace('\'', "''");
    format!("SELECT CAST(E'{escaped}' AS integer);")
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use pretty_assertions::assert_eq;

    const PREFIX: &str = "SELECT CAST(E'";
    const SUFFIX: &str = "' AS integer);";

    /// Decode the escape string literal at the start of `s`, returning its
    /// value and whatever follows the closing quote.
    fn read_escape_literal(s: &str) -> (String, &str) {
        let mut value = String::new();
        let mut chars = s.char_indices().peekable();
        while let Some((i, c)) = chars.next() {
            match c {
                '\\' => {
                    let (_, escaped) = chars.next().expect("dangling backslash");
                    value.push(escaped);
                }
                '\'' => {
                    if let Some(&(_, '\'')) = chars.peek() {
                        chars.next();
                        value.push('\'');
                    } else {
                        return (value, &s[i + 1..]);
                    }
                }
                c => value.push(c),
            }
        }
        panic!("unterminated literal in {s:?}");
    }

    fn policy() -> Policy {
        let fingerprint = Fingerprinter::new()
            .fingerprint("SELECT * FROM orders WHERE id = 1")
            .unwrap();
        Policy {
            listen_address: "127.0.0.1:0".to_string(),
            target_address: "127.0.0.1:5432".to_string(),
            allowed_fingerprints: [fingerprint.as_str().to_string()].into_iter().collect(),
            allowed_commands: [b'X'].into_iter().collect(),
            ignore_unix_timestamps: false,
        }
    }

    fn query(text: &str) -> FrontendMessage {
        FrontendMessage::Query {
            text: text.to_string(),
        }
    }

    #[test]
    fn test_error_query_shape() {
        assert_eq!(
            error_query("query is not allowed"),
            "SELECT CAST(E'query is not allowed' AS integer);"
        );
    }

    #[test]
    fn test_error_query_cannot_be_escaped() {
        let hostile = [
            "it's",
            "'; DROP TABLE users; --",
            "back\\slash",
            "\\'; SELECT 1; --",
            "multi\nline\r\nmessage",
            "trailing backslash \\",
        ];

        for message in hostile {
            let statement = error_query(message);
            assert!(statement.starts_with(PREFIX), "{statement}");
            assert!(!statement.contains('\n'));
            assert!(!statement.contains('\r'));

            let (value, rest) = read_escape_literal(&statement[PREFIX.len()..]);
            assert_eq!(value, single_line(message));
            assert_eq!(rest, &SUFFIX[1..]);
        }
    }

    #[test]
    fn test_allowed_query_is_forwarded_unchanged() {
        let controller = AdmissionController::new();
        let message = query("SELECT * FROM orders WHERE id = 42");
        assert_eq!(
            controller.handle(message.clone(), &policy()),
            Verdict::Forward(message)
        );
    }

    #[test]
    fn test_unlisted_query_is_rewritten() {
        let controller = AdmissionController::new();
        let verdict = controller.handle(query("DELETE FROM orders"), &policy());

        let Verdict::Rewrite { message, rejection } = verdict else {
            panic!("expected a rewrite");
        };
        assert_eq!(
            message,
            query("SELECT CAST(E'query is not allowed' AS integer);")
        );
        assert!(matches!(rejection, Rejection::NotAllowed { .. }));
        assert_eq!(rejection.sql(), Some("DELETE FROM orders"));
        assert!(rejection.fingerprint().is_some());
    }

    #[test]
    fn test_unparseable_query_is_rewritten_with_parser_message() {
        let controller = AdmissionController::new();
        let verdict = controller.handle(query("SELEC 1"), &policy());

        let Verdict::Rewrite { message, rejection } = verdict else {
            panic!("expected a rewrite");
        };
        let Rejection::ParseFailure { error, .. } = &rejection else {
            panic!("expected a parse failure");
        };
        assert!(!error.is_empty());

        let FrontendMessage::Query { text } = message else {
            panic!("expected a query");
        };
        let (value, _) = read_escape_literal(&text[PREFIX.len()..]);
        assert!(value.starts_with("failed to parse query: "), "{value}");
        assert!(rejection.fingerprint().is_none());
    }

    #[test]
    fn test_undecodable_query_is_rewritten() {
        let controller = AdmissionController::new();
        let message = FrontendMessage::UndecodableQuery {
            bytes: Bytes::from_static(b"SELECT 'caf\xe9'"),
        };

        let Verdict::Rewrite { message, rejection } = controller.handle(message, &policy()) else {
            panic!("expected a rewrite");
        };
        assert_eq!(
            message,
            query("SELECT CAST(E'failed to parse query: query text is not valid UTF-8' AS integer);")
        );
        assert_eq!(rejection.sql(), Some("SELECT 'caf\u{fffd}'"));
    }

    #[test]
    fn test_commands_follow_allow_list() {
        let controller = AdmissionController::new();

        let terminate = FrontendMessage::Other {
            tag: b'X',
            body: Bytes::new(),
        };
        assert_eq!(
            controller.handle(terminate.clone(), &policy()),
            Verdict::Forward(terminate)
        );

        let parse = FrontendMessage::Other {
            tag: b'P',
            body: Bytes::from_static(b"\0SELECT 1\0\0\0"),
        };
        assert_eq!(
            controller.handle(parse, &policy()),
            Verdict::Terminate(Rejection::CommandNotAllowed { tag: b'P' })
        );
    }

    #[test]
    fn test_timestamp_flag_is_read_from_policy() {
        let controller = AdmissionController::new();
        let allowed = Fingerprinter::new()
            .ignore_unix_timestamps(true)
            .fingerprint("SELECT * FROM events_1700000000")
            .unwrap();

        let mut policy = policy();
        policy.allowed_fingerprints = [allowed.as_str().to_string()].into_iter().collect();

        let message = query("SELECT * FROM events_1650000000");
        assert!(matches!(
            controller.handle(message.clone(), &policy),
            Verdict::Rewrite { .. }
        ));

        policy.ignore_unix_timestamps = true;
        assert_eq!(
            controller.handle(message.clone(), &policy),
            Verdict::Forward(message)
        );
    }
}
