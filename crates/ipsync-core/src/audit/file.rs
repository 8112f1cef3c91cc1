// # File Audit Sink
//
// File-based implementation of AuditSink with crash recovery.
//
// ## Crash Recovery
//
// - Atomic writes: Uses write-then-rename for atomicity
// - Corruption detection: Validates JSON on load
// - Automatic backup: Keeps .backup of last known good file
// - Recovery: Falls back to backup if corruption detected
//
// ## File Format
//
// ```json
// {
//   "version": "1.0",
//   "log": {
//     "history": [
//       { "address": "203.0.113.7", "version": "v4", "source": "STUN",
//         "observed_at": "2025-01-09T12:00:00Z" }
//     ],
//     "updates": [],
//     "diagnostics": []
//   }
// }
// ```

use super::{AuditLog, DEFAULT_CAPACITY, newest_first};
use crate::error::Error;
use crate::sync::SyncOutcome;
use crate::traits::{AuditSink, DiagnosticEntry, DiagnosticLevel, HistoryEntry, UpdateEntry};
use async_trait::async_trait;
use chrono::Utc;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

/// Audit file format version
const AUDIT_FILE_VERSION: &str = "1.0";

/// Serializable audit file format
#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct AuditFileFormat {
    version: String,
    log: AuditLog,
}

/// Why a file could not be loaded
enum LoadError {
    /// The file exists but is not a valid audit document
    Corrupt(Error),
    /// The file could not be read at all
    Io(Error),
}

/// File-based audit sink with crash recovery
///
/// Every write is persisted immediately. Entries older than the retention
/// window are pruned on each write. Persist failures are logged and the
/// in-memory copy stays authoritative until the next successful write.
///
/// # Example
///
/// ```rust,no_run
/// use ipsync_core::audit::FileAuditSink;
/// use ipsync_core::traits::AuditSink;
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let retention = Duration::from_secs(30 * 86_400);
///     let sink = FileAuditSink::open("/var/lib/ipsync/audit.json", retention).await?;
///
///     sink.record_history("203.0.113.7".parse()?, "STUN").await;
///     assert!(sink.most_recent_address().await.is_some());
///
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct FileAuditSink {
    path: PathBuf,
    retention: Duration,
    capacity: usize,
    log: RwLock<AuditLog>,
}

impl FileAuditSink {
    /// Create or load a file audit sink
    ///
    /// This will:
    /// 1. Create parent directories if needed
    /// 2. Try to load the existing file
    /// 3. If it is corrupted, try the backup
    /// 4. If both fail, start empty
    pub async fn open<P: AsRef<Path>>(path: P, retention: Duration) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent).await.map_err(|e| {
                Error::audit(format!(
                    "Failed to create audit directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let log = Self::load_with_recovery(&path).await?;

        Ok(Self {
            path,
            retention,
            capacity: DEFAULT_CAPACITY,
            log: RwLock::new(log),
        })
    }

    /// Keep at most `capacity` entries per list
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Load the log, falling back to the backup on corruption
    async fn load_with_recovery(path: &Path) -> Result<AuditLog, Error> {
        let err = match Self::load(path).await {
            Ok(log) => {
                tracing::debug!("Loaded audit log: {} entries", log.len());
                return Ok(log);
            }
            Err(LoadError::Io(e)) => return Err(e),
            Err(LoadError::Corrupt(e)) => e,
        };

        tracing::warn!(
            "Audit file appears corrupted: {}. Attempting recovery from backup.",
            err
        );

        let backup_path = Self::backup_path(path);
        if !backup_path.exists() {
            tracing::warn!("No backup file found. Starting with an empty audit log.");
            return Ok(AuditLog::default());
        }

        match Self::load(&backup_path).await {
            Ok(log) => {
                tracing::info!("Recovered audit log from backup: {} entries", log.len());
                if let Err(e) = fs::copy(&backup_path, path).await {
                    tracing::error!("Failed to restore audit file from backup: {}", e);
                }
                Ok(log)
            }
            Err(LoadError::Corrupt(e)) | Err(LoadError::Io(e)) => {
                tracing::error!(
                    "Backup also unusable: {}. Starting with an empty audit log.",
                    e
                );
                Ok(AuditLog::default())
            }
        }
    }

    async fn load(path: &Path) -> Result<AuditLog, LoadError> {
        if !path.exists() {
            tracing::debug!("Audit file does not exist: {}", path.display());
            return Ok(AuditLog::default());
        }

        let content = fs::read_to_string(path).await.map_err(|e| {
            LoadError::Io(Error::audit(format!(
                "Failed to read audit file {}: {}",
                path.display(),
                e
            )))
        })?;

        let file: AuditFileFormat = serde_json::from_str(&content).map_err(|e| {
            LoadError::Corrupt(Error::audit(format!(
                "Failed to parse audit file {}: {}",
                path.display(),
                e
            )))
        })?;

        if file.version != AUDIT_FILE_VERSION {
            tracing::warn!(
                "Audit file version mismatch: expected {}, got {}. Attempting to load anyway.",
                AUDIT_FILE_VERSION,
                file.version
            );
        }

        Ok(file.log)
    }

    /// Apply a change, prune, and persist
    async fn write_with<F>(&self, apply: F)
    where
        F: FnOnce(&mut AuditLog, usize),
    {
        let mut log = self.log.write().await;
        apply(&mut log, self.capacity);

        if let Ok(retention) = chrono::Duration::from_std(self.retention) {
            log.prune_before(Utc::now() - retention);
        }

        if let Err(e) = self.persist(&log).await {
            tracing::warn!("Failed to persist audit log: {}", e);
        }
    }

    /// Write the log atomically, keeping the previous file as backup
    async fn persist(&self, log: &AuditLog) -> Result<(), Error> {
        let file = AuditFileFormat {
            version: AUDIT_FILE_VERSION.to_string(),
            log: log.clone(),
        };
        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| Error::audit(format!("Failed to serialize audit log: {e}")))?;

        let temp_path = self.temp_path();
        {
            let mut temp = fs::File::create(&temp_path).await.map_err(|e| {
                Error::audit(format!(
                    "Failed to create temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
            temp.write_all(json.as_bytes()).await?;
            temp.flush().await?;
        }

        if self.path.exists() {
            let backup_path = Self::backup_path(&self.path);
            if let Err(e) = fs::copy(&self.path, &backup_path).await {
                tracing::warn!("Failed to create backup: {}", e);
            }
        }

        fs::rename(&temp_path, &self.path).await.map_err(|e| {
            Error::audit(format!(
                "Failed to rename {} to {}: {}",
                temp_path.display(),
                self.path.display(),
                e
            ))
        })?;

        tracing::trace!("Audit log written to {}", self.path.display());
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut temp = self.path.clone();
        temp.set_extension("tmp");
        temp
    }

    fn backup_path(path: &Path) -> PathBuf {
        let mut backup = path.to_path_buf();
        backup.set_extension("backup");
        backup
    }
}

#[async_trait]
impl AuditSink for FileAuditSink {
    async fn record_history(&self, address: IpAddr, source: &str) {
        self.write_with(|log, cap| log.push_history(address, source, cap))
            .await;
    }

    async fn record_update_outcome(&self, outcome: &SyncOutcome) {
        let entry = UpdateEntry::from(outcome);
        self.write_with(|log, cap| log.push_update(entry, cap)).await;
    }

    async fn record_diagnostic(&self, level: DiagnosticLevel, message: &str) {
        self.write_with(|log, cap| log.push_diagnostic(level, message, cap))
            .await;
    }

    async fn most_recent_address(&self) -> Option<IpAddr> {
        self.log.read().await.most_recent_address()
    }

    async fn recent_history(&self, limit: usize) -> Vec<HistoryEntry> {
        newest_first(&self.log.read().await.history, limit)
    }

    async fn recent_updates(&self, limit: usize) -> Vec<UpdateEntry> {
        newest_first(&self.log.read().await.updates, limit)
    }

    async fn recent_diagnostics(&self, limit: usize) -> Vec<DiagnosticEntry> {
        newest_first(&self.log.read().await.diagnostics, limit)
    }
}
