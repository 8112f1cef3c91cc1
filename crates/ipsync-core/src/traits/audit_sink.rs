// # Audit Sink Trait
//
// Defines the append-only record of what the agent observed and did:
// address history, per-record DNS outcomes, and free-form diagnostics.
//
// ## Implementations
//
// - In-memory ring buffers: `audit::MemoryAuditSink`
// - JSON file with backup and recovery: `audit::FileAuditSink`

use super::RecordType;
use crate::sync::{SyncOutcome, SyncStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

/// One observed address change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub address: IpAddr,
    /// `v4` or `v6`
    pub version: String,
    /// Mechanism label that reported the address
    pub source: String,
    pub observed_at: DateTime<Utc>,
}

/// Outcome of reconciling one DNS record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateEntry {
    pub account: String,
    pub zone: String,
    /// Fully-qualified record name
    pub record: String,
    pub record_type: RecordType,
    pub address: IpAddr,
    pub status: SyncStatus,
    pub success: bool,
    pub message: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl From<&SyncOutcome> for UpdateEntry {
    fn from(outcome: &SyncOutcome) -> Self {
        Self {
            account: outcome.account.clone(),
            zone: outcome.zone.clone(),
            record: outcome.record.clone(),
            record_type: outcome.record_type,
            address: outcome.address,
            status: outcome.status,
            success: outcome.is_success(),
            message: outcome.message.clone(),
            recorded_at: Utc::now(),
        }
    }
}

/// Severity of a diagnostic entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticLevel {
    Info,
    Success,
    Warn,
    Error,
}

impl fmt::Display for DiagnosticLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DiagnosticLevel::Info => "info",
            DiagnosticLevel::Success => "success",
            DiagnosticLevel::Warn => "warn",
            DiagnosticLevel::Error => "error",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticEntry {
    pub level: DiagnosticLevel,
    pub message: String,
    pub recorded_at: DateTime<Utc>,
}

/// Trait for audit sink implementations
///
/// Writes are fire-and-forget: a sink that cannot persist logs the
/// failure itself and the caller carries on. Reads return newest first.
///
/// # Trust Level: Trusted (Core Component)
///
/// ## Allowed Capabilities
/// - ✅ Perform I/O for persistent storage
/// - ✅ Prune entries older than the retention window
///
/// ## Forbidden Capabilities
/// - ❌ Fail the caller's operation
/// - ❌ Decide when to update DNS (owned by `MonitoringScheduler`)
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Record an observed address change
    async fn record_history(&self, address: IpAddr, source: &str);

    /// Record the outcome of reconciling one DNS record
    async fn record_update_outcome(&self, outcome: &SyncOutcome);

    /// Record a diagnostic message
    async fn record_diagnostic(&self, level: DiagnosticLevel, message: &str);

    /// The most recently recorded address, if any
    ///
    /// Used on startup so a restart does not re-sync an unchanged address.
    async fn most_recent_address(&self) -> Option<IpAddr>;

    /// Up to `limit` history entries, newest first
    async fn recent_history(&self, limit: usize) -> Vec<HistoryEntry>;

    /// Up to `limit` update entries, newest first
    async fn recent_updates(&self, limit: usize) -> Vec<UpdateEntry>;

    /// Up to `limit` diagnostic entries, newest first
    async fn recent_diagnostics(&self, limit: usize) -> Vec<DiagnosticEntry>;
}
