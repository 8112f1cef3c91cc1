//! Plugin-based provider registry
//!
//! The registry allows address providers and DNS clients to be registered
//! at runtime by kind name, avoiding hardcoded if-else chains.
//!
//! ## Registration
//!
//! Implementations register themselves during initialization:
//!
//! ```rust,ignore
//! // In the ipsync-ip-stun crate
//! pub fn register(registry: &ProviderRegistry) {
//!     registry.register_address_provider("stun", Box::new(StunFactory));
//! }
//! ```

use crate::config::{DnsAccountConfig, ProviderConfig, ProviderSettings};
use crate::error::{Error, Result};
use crate::traits::{AddressProvider, AddressProviderFactory, DnsClient, DnsClientFactory};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

/// Poll floor used when no enabled provider kind declares one
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_secs(30);

type FactoryMap<F> = RwLock<HashMap<String, Arc<F>>>;

/// Registry of address provider and DNS client factories
///
/// ## Thread Safety
///
/// The registry uses interior mutability with RwLock, allowing concurrent
/// reads and exclusive writes.
#[derive(Default)]
pub struct ProviderRegistry {
    address_providers: FactoryMap<dyn AddressProviderFactory>,
    dns_clients: FactoryMap<dyn DnsClientFactory>,
}

impl ProviderRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an address provider factory
    ///
    /// # Parameters
    ///
    /// - `kind`: Provider kind name (e.g., "stun", "router_ssh")
    /// - `factory`: Factory object for creating provider instances
    pub fn register_address_provider(
        &self,
        kind: impl Into<String>,
        factory: Box<dyn AddressProviderFactory>,
    ) {
        write(&self.address_providers).insert(kind.into(), Arc::from(factory));
    }

    /// Register a DNS client factory
    ///
    /// # Parameters
    ///
    /// - `kind`: Client kind name (e.g., "cloudflare")
    /// - `factory`: Factory object for creating client instances
    pub fn register_dns_client(&self, kind: impl Into<String>, factory: Box<dyn DnsClientFactory>) {
        write(&self.dns_clients).insert(kind.into(), Arc::from(factory));
    }

    /// Create an address provider from typed settings
    ///
    /// # Returns
    ///
    /// - `Ok(Box<dyn AddressProvider>)`: Created provider instance
    /// - `Err(Error)`: If the kind is not registered or creation fails
    pub fn create_address_provider(
        &self,
        settings: &ProviderSettings,
    ) -> Result<Box<dyn AddressProvider>> {
        let kind = settings.kind();
        let factory = read(&self.address_providers)
            .get(kind)
            .cloned()
            .ok_or_else(|| Error::config(format!("Unknown address provider type: {kind}")))?;

        factory.create(settings)
    }

    /// Create a DNS client for an account
    pub fn create_dns_client(&self, account: &DnsAccountConfig) -> Result<Box<dyn DnsClient>> {
        let factory = read(&self.dns_clients)
            .get(account.provider.as_str())
            .cloned()
            .ok_or_else(|| {
                Error::config(format!("Unknown DNS provider type: {}", account.provider))
            })?;

        factory.create(account)
    }

    /// Check if an address provider kind is registered
    pub fn has_address_provider(&self, kind: &str) -> bool {
        read(&self.address_providers).contains_key(kind)
    }

    /// Check if a DNS client kind is registered
    pub fn has_dns_client(&self, kind: &str) -> bool {
        read(&self.dns_clients).contains_key(kind)
    }

    /// List all registered address provider kinds
    pub fn list_address_providers(&self) -> Vec<String> {
        let mut kinds: Vec<String> = read(&self.address_providers).keys().cloned().collect();
        kinds.sort();
        kinds
    }

    /// List all registered DNS client kinds
    pub fn list_dns_clients(&self) -> Vec<String> {
        let mut kinds: Vec<String> = read(&self.dns_clients).keys().cloned().collect();
        kinds.sort();
        kinds
    }

    /// Minimum poll interval tolerated by one provider kind
    pub fn min_interval_for(&self, kind: &str) -> Option<Duration> {
        read(&self.address_providers)
            .get(kind)
            .map(|factory| factory.min_interval())
    }

    /// Poll floor for a provider list
    ///
    /// The smallest minimum among enabled, registered kinds. Falls back to
    /// [`DEFAULT_MIN_INTERVAL`] when none of them is known.
    pub fn min_interval(&self, providers: &[ProviderConfig]) -> Duration {
        providers
            .iter()
            .filter(|p| p.enabled)
            .filter_map(|p| self.min_interval_for(&p.kind))
            .min()
            .unwrap_or(DEFAULT_MIN_INTERVAL)
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}
