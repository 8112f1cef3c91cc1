//! Ordered fallback across address providers
//!
//! Every call discovers from scratch. Providers are tried in declaration
//! order and the first one that reports an address wins.

use crate::config::{ConfigHandle, ProviderConfig};
use crate::error::{Error, ProviderFailure, Result};
use crate::registry::ProviderRegistry;
use crate::traits::Discovered;
use std::sync::Arc;
use tracing::{debug, warn};

/// Result of one pass over the provider list
#[derive(Debug)]
pub struct Selection {
    /// The winning address and its source label
    pub discovered: Discovered,
    /// Providers that failed before the winner answered, in attempt order
    pub failures: Vec<ProviderFailure>,
}

/// Walks the configured providers in order until one succeeds
#[derive(Clone)]
pub struct ProviderSelector {
    registry: Arc<ProviderRegistry>,
    config: ConfigHandle,
}

impl ProviderSelector {
    pub fn new(registry: Arc<ProviderRegistry>, config: ConfigHandle) -> Self {
        Self { registry, config }
    }

    /// Discover the current address from the current configuration
    pub async fn get_address(&self) -> Result<Discovered> {
        self.select().await.map(|selection| selection.discovered)
    }

    /// Like [`get_address`](Self::get_address) but also reports the
    /// failures that preceded the winner
    pub async fn select(&self) -> Result<Selection> {
        let snapshot = self.config.current_snapshot();
        self.select_from(&snapshot.ip_providers).await
    }

    /// Run the fallback chain over an explicit provider list
    pub async fn select_from(&self, providers: &[ProviderConfig]) -> Result<Selection> {
        let mut failures = Vec::new();

        for entry in providers.iter().filter(|p| p.enabled) {
            if !self.registry.has_address_provider(&entry.kind) {
                debug!("Skipping unrecognized provider type {}", entry.kind);
                continue;
            }

            let settings = match entry.settings() {
                Ok(settings) => settings,
                Err(e) => {
                    failures.push(ProviderFailure::new(&entry.kind, e));
                    continue;
                }
            };

            let provider = match self.registry.create_address_provider(&settings) {
                Ok(provider) => provider,
                Err(e) => {
                    failures.push(ProviderFailure::new(&entry.kind, e));
                    continue;
                }
            };

            match provider.discover().await {
                Ok(Some(mut discovered)) => {
                    if discovered.source.trim().is_empty() {
                        discovered.source = entry.kind.clone();
                    }
                    debug!(
                        "Provider {} reported {} via {}",
                        entry.kind, discovered.address, discovered.source
                    );
                    return Ok(Selection {
                        discovered,
                        failures,
                    });
                }
                Ok(None) => {
                    failures.push(ProviderFailure::new(
                        &entry.kind,
                        Error::no_address("provider reported no address"),
                    ));
                }
                Err(e) => {
                    warn!("Provider {} failed: {}", entry.kind, e);
                    failures.push(ProviderFailure::new(&entry.kind, e));
                }
            }
        }

        if failures.is_empty() {
            Err(Error::NoProviderEnabled)
        } else {
            Err(Error::AllProvidersFailed { failures })
        }
    }
}
