//! Monitoring loop
//!
//! ```text
//! Idle -> Checking -> (Unchanged | Changed) -> Waiting -> Checking -> ...
//!            |
//!            +-- discovery failed -> cooldown -> Checking
//! ```
//!
//! `Waiting` ends early when the configuration changes, so a shorter
//! interval takes effect at once.

use crate::config::ConfigHandle;
use crate::config::ConfigSignal;
use crate::error::Result;
use crate::hub::EventHub;
use crate::registry::ProviderRegistry;
use crate::selector::ProviderSelector;
use crate::status::{Observation, SharedState};
use crate::sync::{SyncOutcome, SyncSummary, Synchronizer};
use crate::traits::{AuditSink, DiagnosticLevel};
use chrono::Utc;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

/// What a single check found
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// Same address as last time
    Unchanged(Observation),
    /// New address (or the first one); DNS was reconciled
    Changed {
        observation: Observation,
        previous: Option<IpAddr>,
        outcomes: Vec<SyncOutcome>,
    },
}

/// Effective poll interval for the current configuration
///
/// The configured interval, raised to the floor the enabled provider kinds
/// declare.
pub fn effective_interval(config: &ConfigHandle, registry: &ProviderRegistry) -> Duration {
    let snapshot = config.current_snapshot();
    let floor = registry.min_interval(&snapshot.ip_providers);
    snapshot.intervals.ip_check.get().max(floor)
}

/// Owns the poll loop and the decision to reconcile DNS
pub struct MonitoringScheduler {
    registry: Arc<ProviderRegistry>,
    config: ConfigHandle,
    signal: ConfigSignal,
    selector: ProviderSelector,
    synchronizer: Synchronizer,
    state: SharedState,
    hub: EventHub,
    audit: Arc<dyn AuditSink>,
    last_address: Option<IpAddr>,
}

impl MonitoringScheduler {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        registry: Arc<ProviderRegistry>,
        config: ConfigHandle,
        signal: ConfigSignal,
        selector: ProviderSelector,
        synchronizer: Synchronizer,
        state: SharedState,
        hub: EventHub,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            registry,
            config,
            signal,
            selector,
            synchronizer,
            state,
            hub,
            audit,
            last_address: None,
        }
    }

    /// Run until the task is dropped
    pub async fn run(self) -> Result<()> {
        self.run_with_shutdown(None).await
    }

    /// Run until `shutdown_rx` fires (or forever if `None`)
    pub async fn run_with_shutdown(
        mut self,
        shutdown_rx: Option<oneshot::Receiver<()>>,
    ) -> Result<()> {
        let shutdown = async {
            match shutdown_rx {
                Some(rx) => {
                    let _ = rx.await;
                }
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(shutdown);

        self.recover_last_address().await;

        loop {
            let checked = tokio::select! {
                result = self.check_once() => result,
                _ = &mut shutdown => break,
            };

            match checked {
                Ok(_) => {
                    let interval = effective_interval(&self.config, &self.registry);
                    debug!("Next check in {:?}", interval);

                    tokio::select! {
                        _ = tokio::time::sleep(interval) => {}
                        changed = self.signal.changed() => {
                            if changed {
                                info!("Configuration changed, checking now");
                            }
                        }
                        _ = &mut shutdown => break,
                    }
                }
                Err(_) => {
                    let cooldown = self.config.current_snapshot().scheduler.failure_cooldown.get();
                    debug!("Retrying discovery in {:?}", cooldown);

                    tokio::select! {
                        _ = tokio::time::sleep(cooldown) => {}
                        _ = &mut shutdown => break,
                    }
                }
            }
        }

        info!("Monitoring scheduler stopped");
        Ok(())
    }

    /// Seed the last known address from durable history
    pub async fn recover_last_address(&mut self) {
        if let Some(address) = self.audit.most_recent_address().await {
            info!("Last recorded address: {}", address);
            self.last_address = Some(address);
        }
    }

    /// One pass through `Checking`
    pub async fn check_once(&mut self) -> Result<CheckOutcome> {
        self.state.mark_checked(Utc::now()).await;

        let selection = match self.selector.select().await {
            Ok(selection) => selection,
            Err(e) => {
                error!("Address discovery failed: {}", e);
                self.audit
                    .record_diagnostic(DiagnosticLevel::Error, &format!("IP discovery failed: {e}"))
                    .await;
                return Err(e);
            }
        };

        let observation = Observation::new(selection.discovered.address, selection.discovered.source);

        if !selection.failures.is_empty() {
            let failed: Vec<String> = selection.failures.iter().map(ToString::to_string).collect();
            let message = format!(
                "Discovered {} via {} after failures: {}",
                observation.address,
                observation.source,
                failed.join("; ")
            );
            warn!("{}", message);
            self.audit
                .record_diagnostic(DiagnosticLevel::Warn, &message)
                .await;
        }

        self.state.publish(&observation).await;

        if self.last_address == Some(observation.address) {
            debug!("Address unchanged: {}", observation.address);
            return Ok(CheckOutcome::Unchanged(observation));
        }

        let previous = self.last_address;
        match previous {
            Some(previous) => info!(
                "Address changed: {} -> {} ({})",
                previous, observation.address, observation.source
            ),
            None => info!("Address discovered: {} ({})", observation.address, observation.source),
        }

        self.audit
            .record_history(observation.address, &observation.source)
            .await;

        let outcomes = self.synchronizer.reconcile(observation.address).await;

        self.hub
            .broadcast_change(observation.address, &observation.source);
        self.hub
            .broadcast_sync(&SyncSummary::from_outcomes(observation.address, &outcomes));

        self.last_address = Some(observation.address);

        Ok(CheckOutcome::Changed {
            observation,
            previous,
            outcomes,
        })
    }

    /// Address the loop currently treats as current
    pub fn last_address(&self) -> Option<IpAddr> {
        self.last_address
    }
}
