// # Address Provider Trait
//
// Defines the interface for discovering the host's public address.
//
// ## Implementations
//
// - STUN reflection: `ipsync-ip-stun` crate
// - SSH router introspection: `ipsync-ip-router` crate
//
// ## Usage
//
// ```rust,ignore
// use ipsync_core::AddressProvider;
//
// #[tokio::main]
// async fn main() -> anyhow::Result<()> {
//     let provider = /* AddressProvider implementation */;
//
//     if let Some(found) = provider.discover().await? {
//         println!("{} via {}", found.address, found.source);
//     }
//
//     Ok(())
// }
// ```

use crate::config::ProviderSettings;
use async_trait::async_trait;
use std::net::IpAddr;
use std::time::Duration;

/// An address reported by a provider, with a label saying where it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovered {
    /// The discovered public address
    pub address: IpAddr,
    /// Mechanism label (e.g. `STUN`, `ROUTER_SSH`)
    pub source: String,
}

impl Discovered {
    pub fn new(address: IpAddr, source: impl Into<String>) -> Self {
        Self {
            address,
            source: source.into(),
        }
    }
}

/// Trait for address provider implementations
///
/// A provider performs one discovery per call and returns. It owns no
/// timers and no retry loop; the selector decides what to do when it fails.
///
/// # Trust Level: Semi-Trusted
///
/// ## Allowed Capabilities
/// - ✅ Perform network I/O to its own endpoint (STUN server, router)
/// - ✅ Bound its own I/O with a timeout
///
/// ## Forbidden Capabilities
/// - ❌ Perform DNS updates (use `DnsClient`)
/// - ❌ Retry or sleep between attempts (use `ProviderSelector`)
/// - ❌ Record history or publish state (use `MonitoringScheduler`)
#[async_trait]
pub trait AddressProvider: Send + Sync {
    /// Discover the current IPv4 public address
    ///
    /// # Returns
    ///
    /// - `Ok(Some(Discovered))`: An address was found
    /// - `Ok(None)`: The mechanism worked but reported nothing
    /// - `Err(Error)`: The mechanism failed
    async fn discover(&self) -> Result<Option<Discovered>, crate::Error>;

    /// Discover the current IPv6 public address
    ///
    /// Providers that only see IPv4 keep the default.
    async fn discover_v6(&self) -> Result<Option<Discovered>, crate::Error> {
        Ok(None)
    }

    /// Kind name this provider was registered under
    fn kind(&self) -> &'static str;
}

/// Helper trait for constructing address providers from configuration
pub trait AddressProviderFactory: Send + Sync {
    /// Create a provider from typed settings
    fn create(
        &self,
        settings: &ProviderSettings,
    ) -> Result<Box<dyn AddressProvider>, crate::Error>;

    /// Shortest poll interval this kind tolerates
    fn min_interval(&self) -> Duration;
}
