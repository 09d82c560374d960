//! # pgfilter-proxy
//!
//! Postgres wire protocol proxy that only lets allow-listed queries through.
//!
//! For every simple query the proxy:
//! - Parses and fingerprints the SQL via `pgfilter-sql`
//! - Forwards it unchanged if the fingerprint is allow-listed
//! - Otherwise replaces it with a statement that fails on the backend with a
//!   readable message, so the client sees an ordinary error
//! - Records the rejection via `pgfilter-audit`
//!
//! Other message types are checked against a tag allow-list; a disallowed
//! one closes the connection before it reaches the backend.
//!
//! ## Architecture
//!
//! ```text
//!    Application
//!       │
//!       │ Postgres wire protocol
//!       ▼
//! ┌──────────────────────┐
//! │  pgfilter proxy      │
//! │  1. Frame messages   │  ← codec
//! │  2. Fingerprint SQL  │  ← pgfilter-sql
//! │  3. Admit / rewrite  │  ← handler + policy snapshot
//! │  4. Forward          │
//! │  5. Audit log        │  ← pgfilter-audit
//! └──────────┬───────────┘
//!            │
//!            ▼
//!     Upstream Postgres
//! ```
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use pgfilter_audit::AuditLogger;
//! use pgfilter_core::{FilePolicySource, PolicyStore};
//! use pgfilter_proxy::FilterProxy;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let source = Arc::new(FilePolicySource::new("pgfilterproxy.yaml"));
//!     let store = Arc::new(PolicyStore::load(source)?);
//!     let proxy = FilterProxy::new(store, AuditLogger::console_only());
//!     proxy.run().await?;
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod error;
pub mod handler;
pub mod message;
pub mod pipe;
pub mod proxy;
pub mod resolver;

pub use codec::{BackendCodec, FrontendCodec};
pub use error::{ProtocolError, ProxyError};
pub use handler::{AdmissionController, MessageHandler, Rejection, Verdict, error_query};
pub use message::{BackendMessage, FrontendMessage, StartupMessage, StartupPacket};
pub use pipe::ConnectionPipe;
pub use proxy::FilterProxy;
pub use resolver::{BackendResolver, ConnectionContext, PolicyResolver, StaticResolver};
