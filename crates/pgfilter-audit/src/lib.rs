//! # pgfilter-audit
//!
//! The event sink of the proxy. Every rejected query or command, every
//! connection that ends with an error and every policy reload becomes an
//! [`AuditEvent`], serialized as one JSON object per line.
//!
//! Query text attached to an event is always collapsed onto a single line
//! before it is stored, so one event is exactly one line of output.
//!
//! | Event Type | Description |
//! |------------|-------------|
//! | `QueryRejected` | Query failed to parse or its fingerprint is not allowed |
//! | `CommandRejected` | Client sent a message tag that is not allowed |
//! | `ConnectionError` | A connection ended with an error |
//! | `PolicyReloaded` | A new policy was published |
//! | `PolicyReloadFailed` | Loading a new policy failed; the old one stays |

pub mod error;
pub mod event;
pub mod logger;
pub mod storage;

pub use error::AuditError;
pub use event::{AuditEvent, AuditEventBuilder, AuditEventType};
pub use logger::AuditLogger;
pub use storage::{AuditStorage, ConsoleStorage, DualStorage, FileStorage, MemoryStorage, NullStorage};
