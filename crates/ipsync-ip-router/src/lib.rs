// # SSH Router Address Provider
//
// Discovers the public address by logging into the edge router over SSH and
// asking it for the address of its WAN interface.
//
// ## Supported devices
//
// - **RouterOS**: `:put [/ip address get [find interface="<iface>"] address]`
// - **OpenWrt**: `ubus call network.interface.<iface> status | jsonfilter ...`
//
// ## Security
//
// The host key is pinned with the `host_key` property. Without a pin the
// provider refuses to connect unless `insecure_skip_host_key` is set, and
// then warns on every connection.
//
// Credentials are tried in order: inline key, key file, password, then
// keyboard-interactive answering every prompt with the password.

pub mod session;

use async_trait::async_trait;
use ipsync_core::ProviderRegistry;
use ipsync_core::config::{ProviderSettings, ROUTER_SSH_KIND, RouterSshSettings};
use ipsync_core::traits::{AddressProvider, AddressProviderFactory, Discovered};
use ipsync_core::{Error, Result};
use session::{Credential, HostKeyPolicy, Session, Target};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Source label reported with every discovered address
pub const SOURCE_LABEL: &str = "ROUTER_SSH";

/// Bound on connecting and authenticating, and separately on the command
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// The router is on the LAN; polling it often is cheap
const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Router families this provider can query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceType {
    RouterOs,
    OpenWrt,
}

impl DeviceType {
    /// Parse a configured device type (case-insensitive)
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "routeros" => Ok(DeviceType::RouterOs),
            "openwrt" => Ok(DeviceType::OpenWrt),
            other => Err(Error::unsupported(format!(
                "router type {other} (only routeros and openwrt are supported)"
            ))),
        }
    }

    /// Command that prints the WAN address of `interface`
    pub fn command(&self, interface: &str) -> String {
        match self {
            DeviceType::RouterOs => {
                format!(r#":put [/ip address get [find interface="{interface}"] address]"#)
            }
            DeviceType::OpenWrt => format!(
                r#"ubus call network.interface.{interface} status | jsonfilter -e '@["ipv4-address"][0].address'"#
            ),
        }
    }
}

/// Pull the first address out of router command output
///
/// Accepts, line by line: CIDR (`203.0.113.5/24`), a bare address, or the
/// legacy `address=203.0.113.5/24` print form.
pub fn parse_address(output: &str) -> Result<IpAddr> {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        return Err(Error::no_address("router returned empty output"));
    }

    for line in trimmed.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if let Some((addr, _prefix)) = line.split_once('/')
            && let Ok(ip) = addr.trim().parse()
        {
            return Ok(ip);
        }

        if let Ok(ip) = line.parse() {
            return Ok(ip);
        }

        if let Some((_, rest)) = line.split_once("address=")
            && let Some(cidr) = rest.split_whitespace().next()
            && let Ok(ip) = cidr.split('/').next().unwrap_or(cidr).parse()
        {
            return Ok(ip);
        }
    }

    Err(Error::protocol(format!(
        "cannot parse an address from router output: {trimmed}"
    )))
}

/// Normalize an inline private key
///
/// Configuration editors and YAML block scalars tend to indent every line;
/// each line is trimmed and blank lines dropped.
pub fn clean_pem_key(key: &str) -> String {
    key.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// SSH router introspection provider
#[derive(Debug)]
pub struct RouterProvider {
    settings: RouterSshSettings,
    device: DeviceType,
    timeout: Duration,
}

impl RouterProvider {
    pub fn new(settings: RouterSshSettings) -> Result<Self> {
        let device = DeviceType::parse(&settings.device_type)?;
        if settings.interface.trim().is_empty() {
            return Err(Error::config("router interface required"));
        }
        Ok(Self {
            settings,
            device,
            timeout: DEFAULT_TIMEOUT,
        })
    }

    /// Create with a custom timeout for connecting and for the command
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn device(&self) -> DeviceType {
        self.device
    }

    /// The command this provider runs on the router
    pub fn command(&self) -> String {
        self.device.command(self.settings.interface.trim())
    }

    /// Credentials in the order they are offered
    ///
    /// Keys that cannot be parsed are skipped with a warning.
    pub fn credentials(&self) -> Vec<Credential> {
        let mut credentials = Vec::new();

        if let Some(key) = &self.settings.key {
            match russh_keys::decode_secret_key(&clean_pem_key(key), None) {
                Ok(pair) => credentials.push(Credential::Key(Arc::new(pair))),
                Err(e) => warn!(
                    "Cannot parse inline SSH key for {}: {} (OpenSSH, PKCS#1 and PKCS#8 are supported)",
                    self.settings.host, e
                ),
            }
        }

        if let Some(path) = &self.settings.key_path {
            match russh_keys::load_secret_key(path, None) {
                Ok(pair) => credentials.push(Credential::Key(Arc::new(pair))),
                Err(e) => warn!("Cannot load SSH key from {}: {}", path, e),
            }
        }

        if let Some(password) = &self.settings.password {
            credentials.push(Credential::Password(password.clone()));
            credentials.push(Credential::KeyboardInteractive(password.clone()));
        }

        credentials
    }

    /// Log in, run the query and return its raw output
    pub async fn query(&self) -> Result<String> {
        let host = self.settings.host.trim();
        let policy = HostKeyPolicy::new(
            host,
            self.settings.host_key.as_deref(),
            self.settings.insecure_skip_host_key,
        )?;

        let credentials = self.credentials();
        if credentials.is_empty() {
            return Err(Error::auth(format!("no usable credentials for {host}")));
        }

        let target = Target {
            host,
            port: self.settings.port,
            user: self.settings.user.trim(),
        };

        let mut session =
            match tokio::time::timeout(self.timeout, Session::open(&target, policy, &credentials))
                .await
            {
                Ok(session) => session?,
                Err(_) => {
                    return Err(Error::upstream(format!(
                        "SSH login to {}:{} timed out after {:?}",
                        host, target.port, self.timeout
                    )));
                }
            };

        let command = self.command();
        debug!("Running on {}: {}", host, command);
        let output = tokio::time::timeout(self.timeout, session.exec(&command)).await;
        session.close().await;

        match output {
            Ok(output) => output,
            Err(_) => Err(Error::upstream(format!(
                "command on {} timed out after {:?}",
                host, self.timeout
            ))),
        }
    }
}

#[async_trait]
impl AddressProvider for RouterProvider {
    async fn discover(&self) -> Result<Option<Discovered>> {
        let output = self.query().await?;
        let address = parse_address(&output)?;
        debug!("Router {} reports {}", self.settings.host, address);
        Ok(Some(Discovered::new(address, SOURCE_LABEL)))
    }

    fn kind(&self) -> &'static str {
        ROUTER_SSH_KIND
    }
}

/// Factory for creating router providers
pub struct RouterFactory;

impl AddressProviderFactory for RouterFactory {
    fn create(&self, settings: &ProviderSettings) -> Result<Box<dyn AddressProvider>> {
        match settings {
            ProviderSettings::RouterSsh(router) => {
                Ok(Box::new(RouterProvider::new(router.clone())?))
            }
            other => Err(Error::config(format!(
                "Invalid settings for router provider: {}",
                other.kind()
            ))),
        }
    }

    fn min_interval(&self) -> Duration {
        MIN_INTERVAL
    }
}

/// Register the router provider with a registry
pub fn register(registry: &ProviderRegistry) {
    registry.register_address_provider(ROUTER_SSH_KIND, Box::new(RouterFactory));
}
