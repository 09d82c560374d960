//! Audit event types.

use chrono::{DateTime, Utc};
use pgfilter_core::single_line;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Type of audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    // ===== Admission =====
    /// Query could not be fingerprinted or is not allow-listed.
    QueryRejected,
    /// Non-query message tag is not allow-listed.
    CommandRejected,

    // ===== Connections =====
    /// Connection ended with an error.
    ConnectionError,

    // ===== Policy =====
    /// A new policy snapshot was published.
    PolicyReloaded,
    /// Reloading failed; the previous snapshot is still in force.
    PolicyReloadFailed,
}

impl std::fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::QueryRejected => write!(f, "QUERY_REJECTED"),
            Self::CommandRejected => write!(f, "COMMAND_REJECTED"),
            Self::ConnectionError => write!(f, "CONNECTION_ERROR"),
            Self::PolicyReloaded => write!(f, "POLICY_RELOADED"),
            Self::PolicyReloadFailed => write!(f, "POLICY_RELOAD_FAILED"),
        }
    }
}

/// An audit event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event ID.
    pub event_id: Uuid,

    /// When the event occurred.
    pub occurred_at: DateTime<Utc>,

    /// Event type.
    pub event_type: AuditEventType,

    // ===== Connection context =====
    /// Connection ID (for correlation).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,

    /// Client address.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_addr: Option<String>,

    // ===== Admission details =====
    /// Fingerprint of the rejected query.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,

    /// Rejected message tag, as a character.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    /// Query text, collapsed onto one line.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,

    /// Error or rejection reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    // ===== Policy =====
    /// Policy generation after a reload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation: Option<u64>,
}

impl AuditEvent {
    /// Create a new event of the given type with a fresh id and timestamp.
    pub fn new(event_type: AuditEventType) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            event_type,
            connection_id: None,
            client_addr: None,
            fingerprint: None,
            command: None,
            sql: None,
            error: None,
            generation: None,
        }
    }

    /// Start building an event.
    pub fn builder(event_type: AuditEventType) -> AuditEventBuilder {
        AuditEventBuilder {
            event: Self::new(event_type),
        }
    }
}

/// Builder for [`AuditEvent`].
pub struct AuditEventBuilder {
    event: AuditEvent,
}

impl AuditEventBuilder {
    pub fn connection_id(mut self, id: impl Into<String>) -> Self {
        self.event.connection_id = Some(id.into());
        self
    }

    pub fn client_addr(mut self, addr: impl Into<String>) -> Self {
        self.event.client_addr = Some(addr.into());
        self
    }

    pub fn fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.event.fingerprint = Some(fingerprint.into());
        self
    }

    /// Record a message tag. Non-printable tags are written as `0xNN`.
    pub fn command(mut self, tag: u8) -> Self {
        let rendered = if tag.is_ascii_graphic() {
            (tag as char).to_string()
        } else {
            format!("0x{tag:02x}")
        };
        self.event.command = Some(rendered);
        self
    }

    /// Attach query text. Line breaks and control characters are removed.
    pub fn sql(mut self, sql: &str) -> Self {
        self.event.sql = Some(single_line(sql));
        self
    }

    pub fn error(mut self, error: &str) -> Self {
        self.event.error = Some(single_line(error));
        self
    }

    pub fn generation(mut self, generation: u64) -> Self {
        self.event.generation = Some(generation);
        self
    }

    pub fn build(self) -> AuditEvent {
        self.event
    }
}
