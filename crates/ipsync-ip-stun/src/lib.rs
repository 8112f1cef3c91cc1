// # STUN Address Provider
//
// Discovers the public address by asking a STUN server what source address
// our UDP packet arrived from (RFC 5389 binding request).
//
// ## Behavior
//
// - One binding request per `discover()` call; no caching, no retries
// - The whole exchange is bounded by a receive timeout (5s by default)
// - Datagrams from other transactions are ignored until the timeout
// - IPv4 only: `discover_v6()` reports nothing
//
// The codec lives in [`message`]; this module owns the socket.

pub mod message;

use async_trait::async_trait;
use ipsync_core::ProviderRegistry;
use ipsync_core::config::{ProviderSettings, STUN_KIND, StunSettings};
use ipsync_core::traits::{AddressProvider, AddressProviderFactory, Discovered};
use ipsync_core::{Error, Result};
use message::{TransactionId, decode_binding_response, encode_binding_request, transaction_id_of};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{UdpSocket, lookup_host};
use tokio::time::{Instant, timeout_at};
use tracing::debug;

/// Source label reported with every discovered address
pub const SOURCE_LABEL: &str = "STUN";

/// Default bound on one binding exchange
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Shortest poll interval tolerated by public STUN servers
const MIN_INTERVAL: Duration = Duration::from_secs(30);

/// Largest datagram we are willing to read
const MAX_DATAGRAM: usize = 1500;

/// STUN reflection provider
#[derive(Debug, Clone)]
pub struct StunProvider {
    /// `host:port` of the STUN server
    server: String,

    /// Bound on resolving, sending and waiting for the response
    timeout: Duration,
}

impl StunProvider {
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Create with a custom exchange timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    /// Run one binding exchange and return the reflexive transport address
    pub async fn binding(&self) -> Result<SocketAddr> {
        let deadline = Instant::now() + self.timeout;
        match timeout_at(deadline, self.exchange()).await {
            Ok(result) => result,
            Err(_) => Err(Error::upstream(format!(
                "STUN server {} did not answer within {:?}",
                self.server, self.timeout
            ))),
        }
    }

    async fn exchange(&self) -> Result<SocketAddr> {
        let server = self.resolve().await?;

        let socket = UdpSocket::bind(("0.0.0.0", 0)).await.map_err(|e| {
            Error::upstream(format!("cannot open UDP socket for STUN: {e}"))
        })?;
        socket.connect(server).await.map_err(|e| {
            Error::upstream(format!("cannot reach STUN server {}: {e}", self.server))
        })?;

        let transaction_id: TransactionId = message::new_transaction_id();
        socket
            .send(&encode_binding_request(&transaction_id))
            .await
            .map_err(|e| Error::upstream(format!("STUN request to {} failed: {e}", self.server)))?;

        let mut buf = [0u8; MAX_DATAGRAM];
        loop {
            let len = socket.recv(&mut buf).await.map_err(|e| {
                Error::upstream(format!("STUN response from {} failed: {e}", self.server))
            })?;
            let datagram = &buf[..len];

            if transaction_id_of(datagram) != Some(&transaction_id[..]) {
                debug!(
                    "Ignoring {}-byte datagram from {} for another transaction",
                    len, self.server
                );
                continue;
            }

            return decode_binding_response(datagram, &transaction_id);
        }
    }

    async fn resolve(&self) -> Result<SocketAddr> {
        let mut addrs = lookup_host(self.server.as_str()).await.map_err(|e| {
            Error::upstream(format!("cannot resolve STUN server {}: {e}", self.server))
        })?;
        addrs
            .find(SocketAddr::is_ipv4)
            .ok_or_else(|| {
                Error::upstream(format!("STUN server {} has no IPv4 address", self.server))
            })
    }
}

#[async_trait]
impl AddressProvider for StunProvider {
    async fn discover(&self) -> Result<Option<Discovered>> {
        let reflexive = self.binding().await?;
        if !reflexive.is_ipv4() {
            return Err(Error::protocol(format!(
                "STUN server {} reflected non-IPv4 address {} over an IPv4 socket",
                self.server, reflexive
            )));
        }
        debug!("STUN server {} reflected {}", self.server, reflexive);
        Ok(Some(Discovered::new(reflexive.ip(), SOURCE_LABEL)))
    }

    fn kind(&self) -> &'static str {
        STUN_KIND
    }
}

/// Factory for creating STUN providers
pub struct StunFactory;

impl StunFactory {
    fn build(settings: &StunSettings) -> StunProvider {
        StunProvider::new(settings.server.trim())
    }
}

impl AddressProviderFactory for StunFactory {
    fn create(&self, settings: &ProviderSettings) -> Result<Box<dyn AddressProvider>> {
        match settings {
            ProviderSettings::Stun(stun) => Ok(Box::new(Self::build(stun))),
            other => Err(Error::config(format!(
                "Invalid settings for STUN provider: {}",
                other.kind()
            ))),
        }
    }

    fn min_interval(&self) -> Duration {
        MIN_INTERVAL
    }
}

/// Register the STUN provider with a registry
pub fn register(registry: &ProviderRegistry) {
    registry.register_address_provider(STUN_KIND, Box::new(StunFactory));
}
