// # DNS Client Trait
//
// Defines the record-level operations the synchronizer needs from a
// DNS provider API.
//
// ## Implementations
//
// - Cloudflare: `ipsync-provider-cloudflare` crate
//
// ## Usage
//
// ```rust,ignore
// use ipsync_core::traits::{DnsClient, RecordType};
//
// #[tokio::main]
// async fn main() -> anyhow::Result<()> {
//     let client = /* DnsClient implementation */;
//
//     let zone_id = client.resolve_zone_id("example.com").await?;
//     let records = client
//         .list_records(&zone_id, "www.example.com", RecordType::A)
//         .await?;
//
//     Ok(())
// }
// ```

use crate::config::DnsAccountConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

/// Address record type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordType {
    A,
    AAAA,
}

impl RecordType {
    /// Record type that holds the given address
    pub fn for_address(address: &IpAddr) -> Self {
        match address {
            IpAddr::V4(_) => RecordType::A,
            IpAddr::V6(_) => RecordType::AAAA,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::A => "A",
            RecordType::AAAA => "AAAA",
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An existing DNS record as reported by the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsRecord {
    /// Provider-assigned record ID
    pub id: String,
    /// Fully-qualified record name
    pub name: String,
    pub record_type: RecordType,
    /// Current record content (the address, as text)
    pub content: String,
    pub ttl: u32,
    /// Whether the provider proxies traffic for this record
    pub proxied: bool,
}

/// A record to create
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRecord {
    pub name: String,
    pub record_type: RecordType,
    pub content: String,
    /// `1` means "automatic" for providers that support it
    pub ttl: u32,
    pub proxied: bool,
}

impl NewRecord {
    /// Record pointing `name` at `address`, with automatic TTL and no proxying
    pub fn for_address(name: impl Into<String>, address: IpAddr) -> Self {
        Self {
            name: name.into(),
            record_type: RecordType::for_address(&address),
            content: address.to_string(),
            ttl: 1,
            proxied: false,
        }
    }
}

/// Trait for DNS client implementations
///
/// Every method is a single API call. Implementations must not retry,
/// sleep, or cache; the synchronizer owns those decisions.
///
/// # Trust Level: Untrusted
///
/// ## Allowed Capabilities
/// - ✅ Perform HTTPS calls to their own API endpoint
/// - ✅ Map provider responses onto [`crate::Error`] variants
///
/// ## Forbidden Capabilities
/// - ❌ Retry or back off (owned by `Synchronizer`)
/// - ❌ Decide whether an update is needed (owned by `Synchronizer`)
/// - ❌ Spawn tasks
#[async_trait]
pub trait DnsClient: Send + Sync {
    /// Look up the provider's ID for a zone name
    async fn resolve_zone_id(&self, zone_name: &str) -> Result<String, crate::Error>;

    /// List records of one type matching a fully-qualified name
    async fn list_records(
        &self,
        zone_id: &str,
        name: &str,
        record_type: RecordType,
    ) -> Result<Vec<DnsRecord>, crate::Error>;

    /// Create a record
    async fn create_record(
        &self,
        zone_id: &str,
        record: &NewRecord,
    ) -> Result<DnsRecord, crate::Error>;

    /// Overwrite an existing record with `record`'s fields
    async fn update_record(
        &self,
        zone_id: &str,
        record: &DnsRecord,
    ) -> Result<DnsRecord, crate::Error>;

    /// Provider name (for logging and audit)
    fn provider_name(&self) -> &'static str;
}

/// Helper trait for constructing DNS clients from account configuration
pub trait DnsClientFactory: Send + Sync {
    fn create(&self, account: &DnsAccountConfig) -> Result<Box<dyn DnsClient>, crate::Error>;
}
