//! Shared observable state
//!
//! The monitoring loop is the only writer. Status readers get a consistent
//! view: address and source are always written together.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::RwLock;

/// One discovered address with its source label and discovery time
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Observation {
    pub address: IpAddr,
    pub source: String,
    pub observed_at: DateTime<Utc>,
}

impl Observation {
    pub fn new(address: IpAddr, source: impl Into<String>) -> Self {
        Self {
            address,
            source: source.into(),
            observed_at: Utc::now(),
        }
    }
}

/// Point-in-time copy of the shared state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    pub address: Option<IpAddr>,
    pub source: Option<String>,
    pub last_check: Option<DateTime<Utc>>,
    pub last_observed: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct Fields {
    address: Option<IpAddr>,
    source: Option<String>,
    last_check: Option<DateTime<Utc>>,
    last_observed: Option<DateTime<Utc>>,
}

/// Cloneable handle to the current address, source and check time
#[derive(Clone, Default)]
pub struct SharedState {
    inner: Arc<RwLock<Fields>>,
}

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that a check has started
    pub async fn mark_checked(&self, at: DateTime<Utc>) {
        self.inner.write().await.last_check = Some(at);
    }

    /// Publish a successful observation
    pub async fn publish(&self, observation: &Observation) {
        let mut fields = self.inner.write().await;
        fields.address = Some(observation.address);
        fields.source = Some(observation.source.clone());
        fields.last_observed = Some(observation.observed_at);
    }

    pub async fn current_address(&self) -> Option<IpAddr> {
        self.inner.read().await.address
    }

    pub async fn current_source(&self) -> Option<String> {
        self.inner.read().await.source.clone()
    }

    pub async fn last_check_time(&self) -> Option<DateTime<Utc>> {
        self.inner.read().await.last_check
    }

    /// All fields under one read lock
    pub async fn snapshot(&self) -> StatusSnapshot {
        let fields = self.inner.read().await;
        StatusSnapshot {
            address: fields.address,
            source: fields.source.clone(),
            last_check: fields.last_check,
            last_observed: fields.last_observed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn check_time_is_independent_of_publish() {
        let state = SharedState::new();
        let now = Utc::now();

        state.mark_checked(now).await;
        assert_eq!(state.last_check_time().await, Some(now));
        assert_eq!(state.current_address().await, None);

        let observation = Observation::new("198.51.100.7".parse().unwrap(), "STUN");
        state.publish(&observation).await;

        let snapshot = state.snapshot().await;
        assert_eq!(snapshot.address, Some(observation.address));
        assert_eq!(snapshot.source.as_deref(), Some("STUN"));
        assert_eq!(snapshot.last_check, Some(now));
    }

    #[tokio::test]
    async fn clones_share_state() {
        let state = SharedState::new();
        let reader = state.clone();

        state
            .publish(&Observation::new("203.0.113.1".parse().unwrap(), "ROUTER_SSH"))
            .await;

        assert_eq!(reader.current_source().await.as_deref(), Some("ROUTER_SSH"));
    }
}
