//! Core ipsync engine
//!
//! The [`Engine`] wires the pieces together and is the surface the daemon
//! talks to. The long-running work happens in the [`MonitoringScheduler`] it
//! hands back.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │ ProviderSelector │─── address ───┐
//! └──────────────────┘               │
//!                                    ▼
//!                         ┌─────────────────────┐
//!                         │ MonitoringScheduler │◄── config change signal
//!                         └─────────────────────┘
//!                                    │
//!         ┌──────────────────────────┼──────────────────────────┐
//!         │                          │                          │
//!         ▼                          ▼                          ▼
//! ┌─────────────┐          ┌──────────────┐           ┌─────────────┐
//! │ SharedState │          │ Synchronizer │           │  EventHub   │
//! │ (publish)   │          │ (reconcile)  │           │ (broadcast) │
//! └─────────────┘          └──────────────┘           └─────────────┘
//! ```
//!
//! ## Event Flow
//!
//! 1. Scheduler asks the selector for the current address
//! 2. Address and source are published to shared state
//! 3. If the address changed, history is recorded and DNS reconciled
//! 4. The change and a sync summary are broadcast to observers

mod scheduler;

pub use scheduler::{CheckOutcome, MonitoringScheduler, effective_interval};

use crate::config::{AgentConfig, ConfigHandle};
use crate::error::{Error, Result};
use crate::hub::EventHub;
use crate::registry::ProviderRegistry;
use crate::selector::ProviderSelector;
use crate::status::{Observation, SharedState, StatusSnapshot};
use crate::sync::{Sleeper, SyncOutcome, SyncSummary, Synchronizer, TokioSleeper};
use crate::traits::AuditSink;
use chrono::{DateTime, Utc};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Handle to the running agent core
///
/// Cheap to clone; every clone talks to the same state.
#[derive(Clone)]
pub struct Engine {
    registry: Arc<ProviderRegistry>,
    config: ConfigHandle,
    state: SharedState,
    hub: EventHub,
    audit: Arc<dyn AuditSink>,
    selector: ProviderSelector,
    synchronizer: Synchronizer,
    started_at: DateTime<Utc>,
}

impl Engine {
    /// Create the engine and its monitoring loop
    ///
    /// The caller must spawn [`MonitoringScheduler::run`] (and the hub's
    /// dispatcher).
    ///
    /// # Errors
    ///
    /// Fails if the configuration's change signal was already taken.
    pub fn new(
        registry: Arc<ProviderRegistry>,
        config: ConfigHandle,
        audit: Arc<dyn AuditSink>,
        hub: EventHub,
    ) -> Result<(Self, MonitoringScheduler)> {
        Self::with_sleeper(registry, config, audit, hub, Arc::new(TokioSleeper))
    }

    /// Like [`Engine::new`] with a custom sleeper for DNS backoff waits
    pub fn with_sleeper(
        registry: Arc<ProviderRegistry>,
        config: ConfigHandle,
        audit: Arc<dyn AuditSink>,
        hub: EventHub,
        sleeper: Arc<dyn Sleeper>,
    ) -> Result<(Self, MonitoringScheduler)> {
        let signal = config
            .subscribe()
            .ok_or_else(|| Error::config("configuration change signal already has a listener"))?;

        let state = SharedState::new();
        let selector = ProviderSelector::new(Arc::clone(&registry), config.clone());
        let synchronizer =
            Synchronizer::new(Arc::clone(&registry), config.clone(), Arc::clone(&audit))
                .with_sleeper(sleeper);

        let scheduler = MonitoringScheduler::new(
            Arc::clone(&registry),
            config.clone(),
            signal,
            selector.clone(),
            synchronizer.clone(),
            state.clone(),
            hub.clone(),
            Arc::clone(&audit),
        );

        let engine = Self {
            registry,
            config,
            state,
            hub,
            audit,
            selector,
            synchronizer,
            started_at: Utc::now(),
        };

        Ok((engine, scheduler))
    }

    pub async fn current_address(&self) -> Option<IpAddr> {
        self.state.current_address().await
    }

    pub async fn current_source(&self) -> Option<String> {
        self.state.current_source().await
    }

    pub async fn last_check_time(&self) -> Option<DateTime<Utc>> {
        self.state.last_check_time().await
    }

    pub async fn status(&self) -> StatusSnapshot {
        self.state.snapshot().await
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Effective poll interval for the current configuration
    pub fn effective_interval(&self) -> Duration {
        effective_interval(&self.config, &self.registry)
    }

    /// Reconcile DNS for `address` right now, outside the poll loop
    pub async fn trigger_immediate_reconciliation(&self, address: IpAddr) -> Vec<SyncOutcome> {
        info!("Manual reconciliation for {}", address);
        let outcomes = self.synchronizer.reconcile(address).await;
        self.hub
            .broadcast_sync(&SyncSummary::from_outcomes(address, &outcomes));
        outcomes
    }

    /// Broadcast an address change to observers
    pub fn broadcast_change(&self, address: IpAddr, source: &str) -> bool {
        self.hub.broadcast_change(address, source)
    }

    /// Wake the monitoring loop without changing the configuration
    pub fn notify_config_changed(&self) {
        self.config.notify_changed();
    }

    /// Validate and install a new configuration, then wake the loop
    pub fn update_config(&self, config: AgentConfig) -> Result<Arc<AgentConfig>> {
        self.config.update(config)
    }

    /// Run one discovery outside the loop and publish the result
    pub async fn discover_now(&self) -> Result<Observation> {
        let discovered = self.selector.get_address().await?;
        let observation = Observation::new(discovered.address, discovered.source);
        self.state.publish(&observation).await;
        Ok(observation)
    }

    pub fn config(&self) -> &ConfigHandle {
        &self.config
    }

    pub fn hub(&self) -> &EventHub {
        &self.hub
    }

    pub fn audit(&self) -> &Arc<dyn AuditSink> {
        &self.audit
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }
}
