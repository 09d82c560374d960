//! Audit storage backends.

use crate::error::AuditError;
use crate::event::AuditEvent;
use async_trait::async_trait;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

/// Trait for audit storage backends.
///
/// Delivery is best effort: a backend that cannot keep up may drop events,
/// but it must never block the caller on another connection's I/O.
#[async_trait]
pub trait AuditStorage: Send + Sync {
    /// Store an audit event.
    async fn store(&self, event: AuditEvent) -> Result<(), AuditError>;
}

/// Console storage (JSON lines on stdout).
pub struct ConsoleStorage;

impl ConsoleStorage {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ConsoleStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuditStorage for ConsoleStorage {
    async fn store(&self, event: AuditEvent) -> Result<(), AuditError> {
        let json = serde_json::to_string(&event)?;
        println!("{}", json);
        Ok(())
    }
}

/// File storage (appends JSON lines to a file).
pub struct FileStorage {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileStorage {
    /// Open `path` for appending, creating it if needed.
    pub fn new(path: &Path) -> Result<Self, AuditError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AuditStorage for FileStorage {
    async fn store(&self, event: AuditEvent) -> Result<(), AuditError> {
        let mut line = serde_json::to_string(&event)?;
        line.push('\n');

        let mut file = self
            .file
            .lock()
            .map_err(|e| AuditError::StorageError(format!("Failed to acquire file lock: {}", e)))?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }
}

/// Writes every event to both the console and a file.
pub struct DualStorage {
    console: ConsoleStorage,
    file: FileStorage,
}

impl DualStorage {
    pub fn new(path: &Path) -> Result<Self, AuditError> {
        Ok(Self {
            console: ConsoleStorage::new(),
            file: FileStorage::new(path)?,
        })
    }
}

#[async_trait]
impl AuditStorage for DualStorage {
    async fn store(&self, event: AuditEvent) -> Result<(), AuditError> {
        self.console.store(event.clone()).await?;
        self.file.store(event).await
    }
}

/// Discards every event.
pub struct NullStorage;

impl NullStorage {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NullStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuditStorage for NullStorage {
    async fn store(&self, _event: AuditEvent) -> Result<(), AuditError> {
        Ok(())
    }
}

/// Keeps events in memory. Useful for tests and embedding.
#[derive(Default)]
pub struct MemoryStorage {
    events: RwLock<Vec<AuditEvent>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of every event stored so far, oldest first.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .read()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl AuditStorage for MemoryStorage {
    async fn store(&self, event: AuditEvent) -> Result<(), AuditError> {
        self.events
            .write()
            .map_err(|e| AuditError::StorageError(format!("Failed to acquire write lock: {}", e)))?
            .push(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::AuditEventType;

    #[tokio::test]
    async fn test_console_storage() {
        let storage = ConsoleStorage;
        let event = AuditEvent::new(AuditEventType::ConnectionError);

        // Should not error
        storage.store(event).await.unwrap();
    }

    #[tokio::test]
    async fn test_file_storage_writes_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.log");
        let storage = FileStorage::new(&path).unwrap();

        storage
            .store(
                AuditEvent::builder(AuditEventType::QueryRejected)
                    .sql("SELECT\n1")
                    .build(),
            )
            .await
            .unwrap();
        storage
            .store(AuditEvent::new(AuditEventType::PolicyReloaded))
            .await
            .unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: AuditEvent = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.event_type, AuditEventType::QueryRejected);
        assert_eq!(first.sql.as_deref(), Some("SELECT 1"));
    }

    #[tokio::test]
    async fn test_memory_storage() {
        let storage = MemoryStorage::new();
        storage
            .store(AuditEvent::new(AuditEventType::CommandRejected))
            .await
            .unwrap();
        let events = storage.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, AuditEventType::CommandRejected);
    }
}
