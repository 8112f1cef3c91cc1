//! DNS synchronizer
//!
//! Reconciles every configured record against the provider's remote state
//! for one address. Failure isolation is per record: a record that cannot be
//! synced becomes a `Failed` outcome and its siblings carry on.
//!
//! ## Flow per account
//!
//! ```text
//! for zone in account.zones          (sequential, one deadline per zone)
//!     resolve_zone_id                (retried)
//!     for record in zone.records     (sequential)
//!         list -> create | skip | update   (retried as one unit)
//! ```
//!
//! Accounts run concurrently with each other.

mod retry;

pub use retry::{RetryPolicy, Sleeper, TokioSleeper, retry_with_backoff};

use crate::config::{ConfigHandle, DnsAccountConfig, ZoneConfig};
use crate::error::Result;
use crate::registry::ProviderRegistry;
use crate::traits::{AuditSink, DnsClient, NewRecord, RecordType};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// What happened to one record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// No record existed; one was created
    Created,
    /// An existing record pointed elsewhere and was rewritten
    Updated,
    /// The record already pointed at the address; nothing was sent
    Unchanged,
    /// Retries ran out, the deadline passed, or the zone could not be resolved
    Failed,
}

/// Per-record result of a reconciliation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    pub account: String,
    pub zone: String,
    /// Fully-qualified record name
    pub record: String,
    pub record_type: RecordType,
    pub address: IpAddr,
    pub status: SyncStatus,
    /// Error detail when `status` is `Failed`
    pub message: Option<String>,
}

impl SyncOutcome {
    pub fn is_success(&self) -> bool {
        self.status != SyncStatus::Failed
    }
}

/// Counts of one reconciliation, as broadcast to observers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSummary {
    pub address: IpAddr,
    pub succeeded: usize,
    pub failed: usize,
}

impl SyncSummary {
    pub fn from_outcomes(address: IpAddr, outcomes: &[SyncOutcome]) -> Self {
        let succeeded = outcomes.iter().filter(|o| o.is_success()).count();
        Self {
            address,
            succeeded,
            failed: outcomes.len() - succeeded,
        }
    }
}

/// Keeps DNS records pointed at the current address
#[derive(Clone)]
pub struct Synchronizer {
    registry: Arc<ProviderRegistry>,
    config: ConfigHandle,
    audit: Arc<dyn AuditSink>,
    sleeper: Arc<dyn Sleeper>,
}

impl Synchronizer {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        config: ConfigHandle,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            registry,
            config,
            audit,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Use a custom sleeper for backoff waits
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Reconcile every configured record against `address`
    ///
    /// Reads one configuration snapshot for the whole call. Every outcome is
    /// also handed to the audit sink.
    pub async fn reconcile(&self, address: IpAddr) -> Vec<SyncOutcome> {
        let snapshot = self.config.current_snapshot();
        let policy = snapshot.sync.retry_policy();
        let zone_deadline = snapshot.sync.zone_deadline.get();

        let accounts = snapshot.dns_accounts.iter().filter(|account| {
            if !account.is_active() {
                debug!("Account {} has no API token, skipping", account.name);
            }
            account.is_active()
        });

        let runs = accounts.map(|account| {
            self.reconcile_account(account, address, &policy, zone_deadline)
        });

        let outcomes: Vec<SyncOutcome> = join_all(runs).await.into_iter().flatten().collect();

        let summary = SyncSummary::from_outcomes(address, &outcomes);
        info!(
            "Reconciled {} record(s) for {}: {} ok, {} failed",
            outcomes.len(),
            address,
            summary.succeeded,
            summary.failed
        );
        outcomes
    }

    async fn reconcile_account(
        &self,
        account: &DnsAccountConfig,
        address: IpAddr,
        policy: &RetryPolicy,
        zone_deadline: Duration,
    ) -> Vec<SyncOutcome> {
        let mut outcomes = Vec::new();

        let client = match self.registry.create_dns_client(account) {
            Ok(client) => client,
            Err(e) => {
                error!("Cannot create DNS client for account {}: {}", account.name, e);
                for zone in &account.zones {
                    self.fail_zone(account, zone, address, &e.to_string(), &mut outcomes)
                        .await;
                }
                return outcomes;
            }
        };
        let client: &dyn DnsClient = client.as_ref();

        for zone in &account.zones {
            let deadline = Instant::now() + zone_deadline;
            let zone_name = zone.zone_name.as_str();

            let zone_id = retry_with_backoff(
                policy,
                self.sleeper.as_ref(),
                deadline,
                &format!("zone lookup {zone_name}"),
                move || client.resolve_zone_id(zone_name),
            )
            .await;

            let zone_id = match zone_id {
                Ok(id) => id,
                Err(e) => {
                    error!(
                        "Cannot resolve zone {} for account {}: {}",
                        zone_name, account.name, e
                    );
                    self.fail_zone(account, zone, address, &e.to_string(), &mut outcomes)
                        .await;
                    continue;
                }
            };

            for record in &zone.records {
                let fqdn = zone.fqdn(record);
                let outcome = self
                    .sync_record(client, account, zone, &zone_id, &fqdn, address, policy, deadline)
                    .await;
                self.audit.record_update_outcome(&outcome).await;
                outcomes.push(outcome);
            }
        }

        outcomes
    }

    #[allow(clippy::too_many_arguments)]
    async fn sync_record(
        &self,
        client: &dyn DnsClient,
        account: &DnsAccountConfig,
        zone: &ZoneConfig,
        zone_id: &str,
        fqdn: &str,
        address: IpAddr,
        policy: &RetryPolicy,
        deadline: Instant,
    ) -> SyncOutcome {
        let result = retry_with_backoff(
            policy,
            self.sleeper.as_ref(),
            deadline,
            &format!("sync {fqdn}"),
            move || reconcile_record(client, zone_id, fqdn, address),
        )
        .await;

        let (status, message) = match result {
            Ok(status) => (status, None),
            Err(e) => {
                error!("Failed to sync {} -> {}: {}", fqdn, address, e);
                (SyncStatus::Failed, Some(e.to_string()))
            }
        };

        SyncOutcome {
            account: account.name.clone(),
            zone: zone.zone_name.clone(),
            record: fqdn.to_string(),
            record_type: RecordType::for_address(&address),
            address,
            status,
            message,
        }
    }

    async fn fail_zone(
        &self,
        account: &DnsAccountConfig,
        zone: &ZoneConfig,
        address: IpAddr,
        reason: &str,
        outcomes: &mut Vec<SyncOutcome>,
    ) {
        for record in &zone.records {
            let outcome = SyncOutcome {
                account: account.name.clone(),
                zone: zone.zone_name.clone(),
                record: zone.fqdn(record),
                record_type: RecordType::for_address(&address),
                address,
                status: SyncStatus::Failed,
                message: Some(reason.to_string()),
            };
            self.audit.record_update_outcome(&outcome).await;
            outcomes.push(outcome);
        }
    }
}

/// Whether record content already names `address`
///
/// Compares parsed addresses so `2001:0db8::1` matches `2001:db8::1`;
/// content that is not an address falls back to a text compare.
fn points_at(content: &str, address: IpAddr) -> bool {
    match content.trim().parse::<IpAddr>() {
        Ok(current) => current == address,
        Err(_) => content == address.to_string(),
    }
}

/// One attempt at bringing a single record in line with `address`
async fn reconcile_record(
    client: &dyn DnsClient,
    zone_id: &str,
    fqdn: &str,
    address: IpAddr,
) -> Result<SyncStatus> {
    let record_type = RecordType::for_address(&address);
    let content = address.to_string();

    let existing = client.list_records(zone_id, fqdn, record_type).await?;

    let Some(current) = existing.into_iter().next() else {
        client
            .create_record(zone_id, &NewRecord::for_address(fqdn, address))
            .await?;
        info!("Created {} record {} -> {}", record_type, fqdn, content);
        return Ok(SyncStatus::Created);
    };

    if points_at(&current.content, address) {
        debug!("{} already points at {}, skipping", fqdn, content);
        return Ok(SyncStatus::Unchanged);
    }

    let previous = current.content.clone();
    let mut desired = current;
    desired.content = content;
    client.update_record(zone_id, &desired).await?;

    if previous.parse::<IpAddr>().is_err() {
        warn!("{} previously held non-address content {:?}", fqdn, previous);
    }
    info!("Updated {} record {}: {} -> {}", record_type, fqdn, previous, desired.content);
    Ok(SyncStatus::Updated)
}
