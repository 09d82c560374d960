//! Audit logger implementation.
//!
//! Provides the main `AuditLogger` type with helper methods for the events
//! the proxy emits.

use pgfilter_core::AuditConfig;
use std::sync::Arc;

use crate::error::AuditError;
use crate::event::{AuditEvent, AuditEventType};
use crate::storage::{AuditStorage, ConsoleStorage, DualStorage, FileStorage, NullStorage};

/// The main audit logger.
pub struct AuditLogger {
    enabled: bool,
    storage: Arc<dyn AuditStorage>,
}

impl AuditLogger {
    /// Create a new audit logger with the given configuration.
    pub fn new(config: &AuditConfig) -> Result<Self, AuditError> {
        if !config.enabled {
            return Ok(Self::disabled());
        }

        let storage: Arc<dyn AuditStorage> = match (&config.file, config.stdout) {
            (Some(path), true) => Arc::new(DualStorage::new(path)?),
            (Some(path), false) => Arc::new(FileStorage::new(path)?),
            (None, true) => Arc::new(ConsoleStorage::new()),
            (None, false) => {
                return Err(AuditError::InitializationFailed(
                    "audit is enabled but neither stdout nor file output is configured"
                        .to_string(),
                ));
            }
        };

        Ok(Self {
            enabled: true,
            storage,
        })
    }

    /// Create a logger with a custom storage backend.
    pub fn with_storage(storage: Arc<dyn AuditStorage>) -> Self {
        Self {
            enabled: true,
            storage,
        }
    }

    /// Create a disabled (no-op) logger.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            storage: Arc::new(NullStorage::new()),
        }
    }

    /// Create a console-only logger (useful for development).
    pub fn console_only() -> Self {
        Self::with_storage(Arc::new(ConsoleStorage::new()))
    }

    /// Check if logging is enabled.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Log an audit event.
    pub async fn log(&self, event: AuditEvent) -> Result<(), AuditError> {
        if !self.enabled {
            return Ok(());
        }

        // Also log to tracing for structured logging integration
        tracing::debug!(
            event_id = %event.event_id,
            event_type = %event.event_type,
            connection_id = ?event.connection_id,
            "Audit event"
        );

        self.storage.store(event).await
    }

    /// Log a query that failed to parse or is not allow-listed.
    ///
    /// `fingerprint` is `None` when the query could not be fingerprinted.
    pub async fn log_query_rejected(
        &self,
        connection_id: &str,
        fingerprint: Option<&str>,
        sql: &str,
        reason: &str,
    ) -> Result<(), AuditError> {
        let mut builder = AuditEvent::builder(AuditEventType::QueryRejected)
            .connection_id(connection_id)
            .sql(sql)
            .error(reason);

        if let Some(fingerprint) = fingerprint {
            builder = builder.fingerprint(fingerprint);
        }

        self.log(builder.build()).await
    }

    /// Log a client message whose tag is not allow-listed.
    pub async fn log_command_rejected(
        &self,
        connection_id: &str,
        tag: u8,
    ) -> Result<(), AuditError> {
        let event = AuditEvent::builder(AuditEventType::CommandRejected)
            .connection_id(connection_id)
            .command(tag)
            .error("disallowed client command")
            .build();

        self.log(event).await
    }

    /// Log a connection that ended with an error.
    pub async fn log_connection_error(
        &self,
        connection_id: &str,
        client_addr: &str,
        error: &str,
    ) -> Result<(), AuditError> {
        let event = AuditEvent::builder(AuditEventType::ConnectionError)
            .connection_id(connection_id)
            .client_addr(client_addr)
            .error(error)
            .build();

        self.log(event).await
    }

    /// Log a successful policy reload.
    pub async fn log_policy_reloaded(&self, generation: u64) -> Result<(), AuditError> {
        let event = AuditEvent::builder(AuditEventType::PolicyReloaded)
            .generation(generation)
            .build();

        self.log(event).await
    }

    /// Log a failed policy reload.
    pub async fn log_policy_reload_failed(&self, error: &str) -> Result<(), AuditError> {
        let event = AuditEvent::builder(AuditEventType::PolicyReloadFailed)
            .error(error)
            .build();

        self.log(event).await
    }
}
