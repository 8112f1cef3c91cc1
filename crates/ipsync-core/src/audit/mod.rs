//! Audit sink implementations
//!
//! - [`MemoryAuditSink`]: bounded ring buffers, lost on restart
//! - [`FileAuditSink`]: the same buffers persisted to a JSON file with
//!   backup and corruption recovery
//!
//! Both keep an [`AuditLog`] in memory and answer reads from it.

pub mod file;
pub mod memory;

pub use file::FileAuditSink;
pub use memory::MemoryAuditSink;

use crate::config::address_version;
use crate::traits::{DiagnosticEntry, DiagnosticLevel, HistoryEntry, UpdateEntry};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::net::IpAddr;

/// Default cap on each list in an [`AuditLog`]
pub const DEFAULT_CAPACITY: usize = 1_000;

/// The three audit lists, oldest entry first
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditLog {
    #[serde(default)]
    pub history: VecDeque<HistoryEntry>,
    #[serde(default)]
    pub updates: VecDeque<UpdateEntry>,
    #[serde(default)]
    pub diagnostics: VecDeque<DiagnosticEntry>,
}

impl AuditLog {
    pub fn push_history(&mut self, address: IpAddr, source: &str, capacity: usize) {
        push_bounded(
            &mut self.history,
            HistoryEntry {
                address,
                version: address_version(&address).to_string(),
                source: source.to_string(),
                observed_at: Utc::now(),
            },
            capacity,
        );
    }

    pub fn push_update(&mut self, entry: UpdateEntry, capacity: usize) {
        push_bounded(&mut self.updates, entry, capacity);
    }

    pub fn push_diagnostic(&mut self, level: DiagnosticLevel, message: &str, capacity: usize) {
        push_bounded(
            &mut self.diagnostics,
            DiagnosticEntry {
                level,
                message: message.to_string(),
                recorded_at: Utc::now(),
            },
            capacity,
        );
    }

    pub fn most_recent_address(&self) -> Option<IpAddr> {
        self.history.back().map(|entry| entry.address)
    }

    /// Drop everything recorded before `cutoff`
    ///
    /// The newest history entry is always kept so startup recovery still
    /// has an address to seed from.
    pub fn prune_before(&mut self, cutoff: DateTime<Utc>) {
        let newest = self.history.back().cloned();
        self.history.retain(|e| e.observed_at >= cutoff);
        if self.history.is_empty()
            && let Some(newest) = newest
        {
            self.history.push_back(newest);
        }
        self.updates.retain(|e| e.recorded_at >= cutoff);
        self.diagnostics.retain(|e| e.recorded_at >= cutoff);
    }

    pub fn len(&self) -> usize {
        self.history.len() + self.updates.len() + self.diagnostics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn push_bounded<T>(list: &mut VecDeque<T>, entry: T, capacity: usize) {
    list.push_back(entry);
    while list.len() > capacity.max(1) {
        list.pop_front();
    }
}

/// Up to `limit` entries, newest first
pub(crate) fn newest_first<T: Clone>(list: &VecDeque<T>, limit: usize) -> Vec<T> {
    list.iter().rev().take(limit).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn lists_are_bounded() {
        let mut log = AuditLog::default();
        for i in 0..5u8 {
            log.push_history(IpAddr::from([203, 0, 113, i]), "STUN", 3);
        }
        assert_eq!(log.history.len(), 3);
        assert_eq!(log.most_recent_address(), Some(IpAddr::from([203, 0, 113, 4])));

        let newest = newest_first(&log.history, 2);
        assert_eq!(newest[0].address, IpAddr::from([203, 0, 113, 4]));
        assert_eq!(newest[1].address, IpAddr::from([203, 0, 113, 3]));
    }

    #[test]
    fn prune_keeps_the_latest_address() {
        let mut log = AuditLog::default();
        log.push_history(IpAddr::from([203, 0, 113, 1]), "STUN", 10);
        log.push_diagnostic(DiagnosticLevel::Info, "old", 10);

        log.prune_before(Utc::now() + Duration::hours(1));

        assert!(log.diagnostics.is_empty());
        assert_eq!(log.most_recent_address(), Some(IpAddr::from([203, 0, 113, 1])));
    }
}
