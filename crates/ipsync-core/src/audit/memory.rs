// # Memory Audit Sink
//
// In-memory implementation of AuditSink.
//
// ## Crash Behavior
//
// - All entries are lost on restart
// - The first cycle after a restart treats the address as new and
//   reconciles DNS once

use super::{AuditLog, DEFAULT_CAPACITY, newest_first};
use crate::sync::SyncOutcome;
use crate::traits::{
    AuditSink, DiagnosticEntry, DiagnosticLevel, HistoryEntry, UpdateEntry,
};
use async_trait::async_trait;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory audit sink with bounded lists
#[derive(Debug, Clone)]
pub struct MemoryAuditSink {
    inner: Arc<RwLock<AuditLog>>,
    capacity: usize,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Keep at most `capacity` entries per list
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(AuditLog::default())),
            capacity,
        }
    }

    /// Copy of everything recorded so far
    pub async fn snapshot(&self) -> AuditLog {
        self.inner.read().await.clone()
    }
}

impl Default for MemoryAuditSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record_history(&self, address: IpAddr, source: &str) {
        self.inner
            .write()
            .await
            .push_history(address, source, self.capacity);
    }

    async fn record_update_outcome(&self, outcome: &SyncOutcome) {
        self.inner
            .write()
            .await
            .push_update(UpdateEntry::from(outcome), self.capacity);
    }

    async fn record_diagnostic(&self, level: DiagnosticLevel, message: &str) {
        self.inner
            .write()
            .await
            .push_diagnostic(level, message, self.capacity);
    }

    async fn most_recent_address(&self) -> Option<IpAddr> {
        self.inner.read().await.most_recent_address()
    }

    async fn recent_history(&self, limit: usize) -> Vec<HistoryEntry> {
        newest_first(&self.inner.read().await.history, limit)
    }

    async fn recent_updates(&self, limit: usize) -> Vec<UpdateEntry> {
        newest_first(&self.inner.read().await.updates, limit)
    }

    async fn recent_diagnostics(&self, limit: usize) -> Vec<DiagnosticEntry> {
        newest_first(&self.inner.read().await.diagnostics, limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::SyncStatus;
    use crate::traits::RecordType;

    #[tokio::test]
    async fn test_memory_sink_basic() {
        let sink = MemoryAuditSink::new();
        assert_eq!(sink.most_recent_address().await, None);

        let ip: IpAddr = "203.0.113.1".parse().unwrap();
        sink.record_history(ip, "STUN").await;
        assert_eq!(sink.most_recent_address().await, Some(ip));

        let history = sink.recent_history(10).await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].version, "v4");
    }

    #[tokio::test]
    async fn unchanged_outcome_is_recorded_as_success() {
        let sink = MemoryAuditSink::new();
        let outcome = SyncOutcome {
            account: "main".to_string(),
            zone: "example.com".to_string(),
            record: "example.com".to_string(),
            record_type: RecordType::A,
            address: "203.0.113.1".parse().unwrap(),
            status: SyncStatus::Unchanged,
            message: None,
        };

        sink.record_update_outcome(&outcome).await;

        let updates = sink.recent_updates(5).await;
        assert!(updates[0].success);
        assert_eq!(updates[0].status, SyncStatus::Unchanged);
    }

    #[tokio::test]
    async fn clones_share_entries() {
        let sink = MemoryAuditSink::with_capacity(2);
        let other = sink.clone();

        sink.record_diagnostic(DiagnosticLevel::Warn, "one").await;
        sink.record_diagnostic(DiagnosticLevel::Warn, "two").await;
        sink.record_diagnostic(DiagnosticLevel::Error, "three").await;

        let diagnostics = other.recent_diagnostics(10).await;
        assert_eq!(diagnostics.len(), 2);
        assert_eq!(diagnostics[0].message, "three");
    }
}
