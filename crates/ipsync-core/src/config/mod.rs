//! Configuration types for the ipsync agent
//!
//! [`AgentConfig`] is the whole effective configuration. It is validated at
//! the boundary and then handed to the core as an immutable snapshot through
//! [`ConfigHandle`]; nothing in the core mutates it in place.

mod duration;
mod holder;

pub use duration::{HumanDuration, parse_duration};
pub use holder::{ConfigHandle, ConfigSignal};

use crate::error::{Error, Result};
use crate::sync::RetryPolicy;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::warn;

/// Kind name of the STUN reflection provider
pub const STUN_KIND: &str = "stun";

/// Kind name of the SSH router introspection provider
pub const ROUTER_SSH_KIND: &str = "router_ssh";

/// Kind name of the Cloudflare DNS client
pub const CLOUDFLARE_KIND: &str = "cloudflare";

/// Rendezvous server used when a STUN provider names none
pub const DEFAULT_STUN_SERVER: &str = "stun.l.google.com:19302";

/// Main agent configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Address providers, tried in declaration order
    #[serde(default)]
    pub ip_providers: Vec<ProviderConfig>,

    /// DNS accounts whose records follow the discovered address
    #[serde(default)]
    pub dns_accounts: Vec<DnsAccountConfig>,

    /// Poll and retention intervals
    #[serde(default)]
    pub intervals: IntervalConfig,

    /// Retry settings for DNS reconciliation
    #[serde(default)]
    pub sync: SyncConfig,

    /// Monitoring loop settings
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Event hub queue sizes
    #[serde(default)]
    pub hub: HubConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            ip_providers: vec![
                ProviderConfig::new(STUN_KIND).with_property("server", DEFAULT_STUN_SERVER),
            ],
            dns_accounts: Vec::new(),
            intervals: IntervalConfig::default(),
            sync: SyncConfig::default(),
            scheduler: SchedulerConfig::default(),
            hub: HubConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Validate the configuration
    ///
    /// Every snapshot the core sees has passed through here.
    pub fn validate(&self) -> Result<()> {
        self.intervals
            .validate()
            .map_err(|e| Error::config(format!("intervals: {e}")))?;
        self.sync
            .validate()
            .map_err(|e| Error::config(format!("sync: {e}")))?;
        self.hub
            .validate()
            .map_err(|e| Error::config(format!("hub: {e}")))?;

        for (i, provider) in self.ip_providers.iter().enumerate() {
            provider
                .validate()
                .map_err(|e| Error::config(format!("ip_providers[{i}]: {e}")))?;
        }

        for (i, account) in self.dns_accounts.iter().enumerate() {
            account
                .validate()
                .map_err(|e| Error::config(format!("dns_accounts[{i}]: {e}")))?;
        }

        Ok(())
    }

    /// Load and validate a configuration file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).await.map_err(|e| {
            Error::config(format!("Failed to read config file {}: {e}", path.display()))
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|e| {
            Error::config(format!("Failed to parse config file {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration to disk (temp file, then rename)
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await?;
        }

        let json = serde_json::to_string_pretty(self)?;
        let mut temp_path = path.to_path_buf();
        temp_path.set_extension("tmp");

        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(json.as_bytes()).await?;
        file.flush().await?;
        drop(file);

        fs::rename(&temp_path, path).await?;
        Ok(())
    }
}

/// One address-discovery mechanism as written in the configuration
///
/// `properties` is free-form; [`ProviderConfig::settings`] turns it into
/// the typed variant for the kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider kind (`stun`, `router_ssh`, ...)
    #[serde(rename = "type")]
    pub kind: String,

    /// Whether this provider takes part in discovery
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Kind-specific properties
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl ProviderConfig {
    /// Create an enabled provider entry with no properties
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            enabled: true,
            properties: Map::new(),
        }
    }

    /// Set a property
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Enable or disable the provider
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Decode the properties into the typed settings for this kind
    ///
    /// Unrecognized kinds decode to [`ProviderSettings::Unknown`] rather than
    /// failing.
    pub fn settings(&self) -> Result<ProviderSettings> {
        let properties = Value::Object(self.properties.clone());
        match self.kind.as_str() {
            STUN_KIND => {
                let mut settings: StunSettings = serde_json::from_value(properties)
                    .map_err(|e| Error::config(format!("invalid stun properties: {e}")))?;
                if settings.server.trim().is_empty() {
                    settings.server = DEFAULT_STUN_SERVER.to_string();
                }
                Ok(ProviderSettings::Stun(settings))
            }
            ROUTER_SSH_KIND => serde_json::from_value(properties)
                .map(ProviderSettings::RouterSsh)
                .map_err(|e| Error::config(format!("invalid router_ssh properties: {e}"))),
            other => Ok(ProviderSettings::Unknown {
                kind: other.to_string(),
            }),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.kind.trim().is_empty() {
            return Err(Error::config("provider type cannot be empty"));
        }
        if !self.enabled {
            return Ok(());
        }

        match self.settings()? {
            ProviderSettings::Stun(settings) => settings.validate(),
            ProviderSettings::RouterSsh(settings) => settings.validate(),
            ProviderSettings::Unknown { kind } => {
                warn!(
                    "Provider type '{}' has no built-in settings; it is skipped unless a plugin registers it",
                    kind
                );
                Ok(())
            }
        }
    }
}

/// Typed provider settings, one variant per known kind
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderSettings {
    /// STUN reflection
    Stun(StunSettings),
    /// SSH router introspection
    RouterSsh(RouterSshSettings),
    /// A kind without built-in settings; inert unless a plugin registers it
    Unknown {
        /// The configured kind
        kind: String,
    },
}

impl ProviderSettings {
    /// Kind name of these settings
    pub fn kind(&self) -> &str {
        match self {
            ProviderSettings::Stun(_) => STUN_KIND,
            ProviderSettings::RouterSsh(_) => ROUTER_SSH_KIND,
            ProviderSettings::Unknown { kind } => kind,
        }
    }
}

/// Settings for the STUN reflection provider
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StunSettings {
    /// `host:port` of the STUN server
    #[serde(default = "default_stun_server")]
    pub server: String,
}

impl StunSettings {
    fn validate(&self) -> Result<()> {
        match self.server.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => Ok(()),
            _ => Err(Error::config(format!(
                "invalid STUN server address {} (expected host:port)",
                self.server
            ))),
        }
    }
}

/// Settings for the SSH router introspection provider
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct RouterSshSettings {
    /// Device family (`routeros` or `openwrt`)
    #[serde(rename = "type", default)]
    pub device_type: String,

    /// Router address or hostname
    #[serde(default)]
    pub host: String,

    /// SSH port
    #[serde(default = "default_ssh_port", deserialize_with = "lenient::port")]
    pub port: u16,

    /// Login user
    #[serde(default)]
    pub user: String,

    /// Password, also used for keyboard-interactive prompts
    #[serde(default, deserialize_with = "lenient::optional_string")]
    pub password: Option<String>,

    /// Inline private key
    #[serde(default, deserialize_with = "lenient::optional_string")]
    pub key: Option<String>,

    /// Path to a private key file
    #[serde(default, deserialize_with = "lenient::optional_string")]
    pub key_path: Option<String>,

    /// WAN interface to query (e.g. `wan`, `ether1`)
    #[serde(default)]
    pub interface: String,

    /// Pinned host public key (base64 blob as in `known_hosts`)
    #[serde(default, deserialize_with = "lenient::optional_string")]
    pub host_key: Option<String>,

    /// Explicit opt-in to connect without verifying the host key
    #[serde(default, deserialize_with = "lenient::boolean")]
    pub insecure_skip_host_key: bool,
}

impl RouterSshSettings {
    /// Device families the router provider knows how to query
    pub const DEVICE_TYPES: [&'static str; 2] = ["routeros", "openwrt"];

    fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::config("router host required"));
        }
        if self.user.trim().is_empty() {
            return Err(Error::config("router user required"));
        }
        if self.port == 0 {
            return Err(Error::config("invalid port 0 (must be 1-65535)"));
        }
        if self.device_type.is_empty() {
            return Err(Error::config(
                "router type required (must be 'routeros' or 'openwrt')",
            ));
        }
        if !Self::DEVICE_TYPES.contains(&self.device_type.to_lowercase().as_str()) {
            return Err(Error::config(format!(
                "unsupported router type: {} (must be 'routeros' or 'openwrt')",
                self.device_type
            )));
        }
        if self.interface.trim().is_empty() {
            return Err(Error::config(
                "router interface required (e.g. 'wan' for OpenWrt, 'ether1' for RouterOS)",
            ));
        }
        if self.password.is_none() && self.key.is_none() && self.key_path.is_none() {
            return Err(Error::config(
                "router authentication required (password or key)",
            ));
        }
        if self.host_key.is_none() {
            if self.insecure_skip_host_key {
                warn!(
                    "Router {} is configured WITHOUT host key verification",
                    self.host
                );
            } else {
                return Err(Error::config(format!(
                    "router {} needs host_key, or insecure_skip_host_key=true to connect unverified",
                    self.host
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for RouterSshSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouterSshSettings")
            .field("device_type", &self.device_type)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<REDACTED>"))
            .field("key", &self.key.as_ref().map(|_| "<REDACTED>"))
            .field("key_path", &self.key_path)
            .field("interface", &self.interface)
            .field("host_key", &self.host_key)
            .field("insecure_skip_host_key", &self.insecure_skip_host_key)
            .finish()
    }
}

/// One DNS provider account and the zones it manages
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsAccountConfig {
    /// Display name, used in audit entries
    pub name: String,

    /// DNS client kind
    #[serde(default = "default_dns_provider")]
    pub provider: String,

    /// API credential; empty disables the account
    #[serde(default)]
    pub api_token: String,

    /// Zones to keep in sync
    #[serde(default)]
    pub zones: Vec<ZoneConfig>,
}

impl DnsAccountConfig {
    /// Create a Cloudflare account entry
    pub fn new(name: impl Into<String>, api_token: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            provider: default_dns_provider(),
            api_token: api_token.into(),
            zones: Vec::new(),
        }
    }

    /// Add a zone
    pub fn with_zone(mut self, zone: ZoneConfig) -> Self {
        self.zones.push(zone);
        self
    }

    /// Whether the account has a credential and takes part in sync
    pub fn is_active(&self) -> bool {
        !self.api_token.trim().is_empty()
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::config("account name cannot be empty"));
        }
        for zone in &self.zones {
            validate_zone_name(&zone.zone_name)?;
            for record in &zone.records {
                validate_record_name(record)?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for DnsAccountConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DnsAccountConfig")
            .field("name", &self.name)
            .field("provider", &self.provider)
            .field("api_token", &"<REDACTED>")
            .field("zones", &self.zones)
            .finish()
    }
}

/// A zone and the record names inside it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneConfig {
    /// Zone apex, e.g. `example.com`
    pub zone_name: String,

    /// Record names relative to the zone (`@`, `www`, `*.dev`)
    #[serde(default)]
    pub records: Vec<String>,
}

impl ZoneConfig {
    pub fn new(zone_name: impl Into<String>) -> Self {
        Self {
            zone_name: zone_name.into(),
            records: Vec::new(),
        }
    }

    pub fn with_record(mut self, record: impl Into<String>) -> Self {
        self.records.push(record.into());
        self
    }

    /// Fully-qualified name for a record in this zone
    ///
    /// The root marker (`@` or empty) maps to the zone name itself.
    pub fn fqdn(&self, record: &str) -> String {
        match record.trim() {
            "" | "@" => self.zone_name.clone(),
            name => format!("{}.{}", name, self.zone_name),
        }
    }
}

/// Poll and retention intervals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntervalConfig {
    /// Configured time between address checks
    #[serde(default = "default_ip_check")]
    pub ip_check: HumanDuration,

    /// How long audit entries are kept
    #[serde(default = "default_history_retention")]
    pub history_retention: HumanDuration,
}

impl Default for IntervalConfig {
    fn default() -> Self {
        Self {
            ip_check: default_ip_check(),
            history_retention: default_history_retention(),
        }
    }
}

impl IntervalConfig {
    fn validate(&self) -> Result<()> {
        if self.ip_check.get() < Duration::from_secs(1) {
            return Err(Error::config(format!(
                "ip_check interval too short: {} (minimum 1s)",
                self.ip_check
            )));
        }
        if self.history_retention.get() < Duration::from_secs(3_600) {
            return Err(Error::config(format!(
                "history_retention too short: {} (minimum 1h)",
                self.history_retention
            )));
        }
        Ok(())
    }
}

/// Retry settings for DNS reconciliation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Attempts allowed after the first one
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Wait before the first retry
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff: HumanDuration,

    /// Cap on any single wait
    #[serde(default = "default_max_backoff")]
    pub max_backoff: HumanDuration,

    /// Budget for all attempts and waits of one zone
    #[serde(default = "default_zone_deadline")]
    pub zone_deadline: HumanDuration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff: default_initial_backoff(),
            max_backoff: default_max_backoff(),
            zone_deadline: default_zone_deadline(),
        }
    }
}

impl SyncConfig {
    /// Retry policy described by these settings
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new()
            .with_max_retries(self.max_retries)
            .with_initial_delay(self.initial_backoff.get())
            .with_max_delay(self.max_backoff.get())
    }

    fn validate(&self) -> Result<()> {
        if self.max_retries > 10 {
            return Err(Error::config(format!(
                "max_retries must be between 0 and 10. Got: {}",
                self.max_retries
            )));
        }
        if self.initial_backoff.get().is_zero() || self.max_backoff.get().is_zero() {
            return Err(Error::config("backoff durations must be greater than zero"));
        }
        if self.initial_backoff.get() > self.max_backoff.get() {
            return Err(Error::config(format!(
                "initial_backoff {} exceeds max_backoff {}",
                self.initial_backoff, self.max_backoff
            )));
        }
        if self.zone_deadline.get().is_zero() {
            return Err(Error::config("zone_deadline must be greater than zero"));
        }
        Ok(())
    }
}

/// Monitoring loop settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Wait after a failed discovery before checking again
    #[serde(default = "default_failure_cooldown")]
    pub failure_cooldown: HumanDuration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            failure_cooldown: default_failure_cooldown(),
        }
    }
}

/// Event hub queue sizes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubConfig {
    /// Capacity of the dispatch queue in front of the hub loop
    #[serde(default = "default_queue_capacity")]
    pub dispatch_capacity: usize,

    /// Outbound queue capacity per subscriber
    #[serde(default = "default_queue_capacity")]
    pub subscriber_queue: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            dispatch_capacity: default_queue_capacity(),
            subscriber_queue: default_queue_capacity(),
        }
    }
}

impl HubConfig {
    fn validate(&self) -> Result<()> {
        if self.dispatch_capacity == 0 || self.subscriber_queue == 0 {
            return Err(Error::config("hub queue capacities must be greater than zero"));
        }
        Ok(())
    }
}

/// Validate a zone apex such as `example.com`
pub fn validate_zone_name(zone: &str) -> Result<()> {
    validate_labels(zone)?;

    let labels: Vec<&str> = zone.split('.').collect();
    if labels.len() < 2 {
        return Err(Error::config(format!(
            "Zone name must have at least two labels: '{zone}'"
        )));
    }
    let tld = labels[labels.len() - 1];
    if tld.len() < 2 || !tld.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(Error::config(format!(
            "Zone name has an invalid top-level label: '{zone}'"
        )));
    }
    Ok(())
}

/// Validate a record name relative to its zone
///
/// Accepts the root marker (`@` or empty) and an optional `*.` wildcard prefix.
pub fn validate_record_name(record: &str) -> Result<()> {
    let record = record.trim();
    if record.is_empty() || record == "@" {
        return Ok(());
    }
    let name = record.strip_prefix("*.").unwrap_or(record);
    validate_labels(name)
}

fn validate_labels(domain: &str) -> Result<()> {
    if domain.is_empty() {
        return Err(Error::config("Domain name cannot be empty"));
    }

    if domain.len() > 253 {
        return Err(Error::config(format!(
            "Domain name too long: {} chars (max 253). Got: {}",
            domain.len(),
            domain
        )));
    }

    for label in domain.split('.') {
        if label.is_empty() {
            return Err(Error::config(format!(
                "Domain name has empty label: '{domain}'"
            )));
        }
        if label.len() > 63 {
            return Err(Error::config(format!(
                "Domain label too long: {} chars (max 63). Label: '{}'",
                label.len(),
                label
            )));
        }
        if !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(Error::config(format!(
                "Domain label contains invalid characters. Label: '{label}'"
            )));
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(Error::config(format!(
                "Domain label cannot start or end with hyphen. Label: '{label}'"
            )));
        }
    }

    Ok(())
}

/// Address version label used in history entries
pub fn address_version(address: &IpAddr) -> &'static str {
    match address {
        IpAddr::V4(_) => "v4",
        IpAddr::V6(_) => "v6",
    }
}

/// Deserializers that accept the string-typed property values older
/// configurations carry (`"port": "22"`, `"insecure_skip_host_key": "true"`)
mod lenient {
    use super::*;
    use serde::de::Error as _;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrText {
        Number(u64),
        Text(String),
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum BoolOrText {
        Bool(bool),
        Text(String),
    }

    pub fn port<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<u16, D::Error> {
        match NumberOrText::deserialize(deserializer)? {
            NumberOrText::Number(n) => {
                u16::try_from(n).map_err(|_| D::Error::custom(format!("invalid port {n}")))
            }
            NumberOrText::Text(text) if text.trim().is_empty() => Ok(default_ssh_port()),
            NumberOrText::Text(text) => text
                .trim()
                .parse()
                .map_err(|_| D::Error::custom(format!("invalid port {text}"))),
        }
    }

    pub fn optional_string<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Option<String>, D::Error> {
        let value = Option::<String>::deserialize(deserializer)?;
        Ok(value.filter(|s| !s.trim().is_empty()))
    }

    pub fn boolean<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<bool, D::Error> {
        match BoolOrText::deserialize(deserializer)? {
            BoolOrText::Bool(b) => Ok(b),
            BoolOrText::Text(text) => match text.trim().to_lowercase().as_str() {
                "true" | "yes" | "1" => Ok(true),
                "false" | "no" | "0" | "" => Ok(false),
                other => Err(D::Error::custom(format!("invalid boolean {other}"))),
            },
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_stun_server() -> String {
    DEFAULT_STUN_SERVER.to_string()
}

fn default_ssh_port() -> u16 {
    22
}

fn default_dns_provider() -> String {
    CLOUDFLARE_KIND.to_string()
}

fn default_ip_check() -> HumanDuration {
    HumanDuration::from(Duration::from_secs(300))
}

fn default_history_retention() -> HumanDuration {
    HumanDuration::from(Duration::from_secs(30 * 86_400))
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff() -> HumanDuration {
    HumanDuration::from(Duration::from_secs(1))
}

fn default_max_backoff() -> HumanDuration {
    HumanDuration::from(Duration::from_secs(10))
}

fn default_zone_deadline() -> HumanDuration {
    HumanDuration::from(Duration::from_secs(60))
}

fn default_failure_cooldown() -> HumanDuration {
    HumanDuration::from(Duration::from_secs(30))
}

fn default_queue_capacity() -> usize {
    256
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn router_entry() -> ProviderConfig {
        ProviderConfig::new(ROUTER_SSH_KIND)
            .with_property("type", "openwrt")
            .with_property("host", "192.168.1.1")
            .with_property("port", "2222")
            .with_property("user", "root")
            .with_property("password", "hunter2")
            .with_property("interface", "wan")
            .with_property("insecure_skip_host_key", "true")
    }

    #[test]
    fn default_config_is_valid() {
        let config = AgentConfig::default();
        config.validate().unwrap();
        assert_eq!(config.intervals.ip_check.get(), Duration::from_secs(300));
        assert_eq!(config.ip_providers[0].kind, STUN_KIND);
    }

    #[test]
    fn stun_settings_fall_back_to_default_server() {
        let entry = ProviderConfig::new(STUN_KIND).with_property("server", "");
        match entry.settings().unwrap() {
            ProviderSettings::Stun(settings) => assert_eq!(settings.server, DEFAULT_STUN_SERVER),
            other => panic!("unexpected settings {other:?}"),
        }
    }

    #[test]
    fn router_settings_accept_string_typed_properties() {
        match router_entry().settings().unwrap() {
            ProviderSettings::RouterSsh(settings) => {
                assert_eq!(settings.port, 2222);
                assert!(settings.insecure_skip_host_key);
                assert_eq!(settings.key, None);
                assert_eq!(settings.password.as_deref(), Some("hunter2"));
            }
            other => panic!("unexpected settings {other:?}"),
        }
    }

    #[test]
    fn router_debug_hides_secrets() {
        let settings = match router_entry().settings().unwrap() {
            ProviderSettings::RouterSsh(settings) => settings,
            other => panic!("unexpected settings {other:?}"),
        };
        let debug = format!("{settings:?}");
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn router_without_host_key_requires_explicit_opt_in() {
        let mut entry = router_entry();
        entry.properties.remove("insecure_skip_host_key");
        let err = entry.validate().unwrap_err();
        assert!(err.to_string().contains("insecure_skip_host_key"));
    }

    #[test]
    fn router_requires_credentials_and_known_family() {
        let mut no_auth = router_entry();
        no_auth.properties.remove("password");
        assert!(no_auth.validate().is_err());

        let bad_family = router_entry().with_property("type", "ddwrt");
        assert!(bad_family.validate().unwrap_err().to_string().contains("ddwrt"));
    }

    #[test]
    fn unknown_kinds_are_inert() {
        let entry = ProviderConfig::new("carrier_pigeon");
        assert_eq!(
            entry.settings().unwrap(),
            ProviderSettings::Unknown {
                kind: "carrier_pigeon".to_string()
            }
        );
        entry.validate().unwrap();
    }

    #[test]
    fn disabled_providers_skip_property_checks() {
        let entry = ProviderConfig::new(ROUTER_SSH_KIND).with_enabled(false);
        entry.validate().unwrap();
    }

    #[test]
    fn fqdn_maps_root_marker_to_zone() {
        let zone = ZoneConfig::new("example.com");
        assert_eq!(zone.fqdn("@"), "example.com");
        assert_eq!(zone.fqdn(""), "example.com");
        assert_eq!(zone.fqdn("www"), "www.example.com");
        assert_eq!(zone.fqdn("*.dev"), "*.dev.example.com");
    }

    #[test]
    fn record_and_zone_name_rules() {
        validate_zone_name("example.com").unwrap();
        validate_zone_name("example.co.uk").unwrap();
        assert!(validate_zone_name("localhost").is_err());
        assert!(validate_zone_name("example.c0m").is_err());
        assert!(validate_zone_name("-bad.com").is_err());

        validate_record_name("@").unwrap();
        validate_record_name("*.dev").unwrap();
        validate_record_name("home.lab").unwrap();
        assert!(validate_record_name("*").is_err());
        assert!(validate_record_name("bad_name").is_err());
    }

    #[test]
    fn parses_full_document() {
        let doc = json!({
            "ip_providers": [
                { "type": "stun", "enabled": true, "properties": { "server": "stun.example.net:3478" } },
                { "type": "router_ssh", "enabled": false, "properties": {} }
            ],
            "dns_accounts": [
                { "name": "main", "api_token": "tok", "zones": [
                    { "zone_name": "example.com", "records": ["@", "www"] }
                ] }
            ],
            "intervals": { "ip_check": "90s", "history_retention": "2w" },
            "sync": { "max_retries": 2 }
        });

        let config: AgentConfig = serde_json::from_value(doc).unwrap();
        config.validate().unwrap();
        assert_eq!(config.intervals.ip_check.get(), Duration::from_secs(90));
        assert_eq!(config.sync.max_retries, 2);
        assert_eq!(config.sync.max_backoff.get(), Duration::from_secs(10));
        assert_eq!(config.dns_accounts[0].provider, CLOUDFLARE_KIND);
        assert_eq!(config.hub.subscriber_queue, 256);
    }

    #[test]
    fn rejects_short_check_interval() {
        let doc = json!({ "intervals": { "ip_check": "500ms" } });
        let config: AgentConfig = serde_json::from_value(doc).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn account_debug_hides_token() {
        let account = DnsAccountConfig::new("main", "super-secret-token");
        assert!(!format!("{account:?}").contains("super-secret-token"));
    }

    #[tokio::test]
    async fn save_then_load_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("agent.json");

        let mut config = AgentConfig::default();
        config.dns_accounts.push(
            DnsAccountConfig::new("main", "tok")
                .with_zone(ZoneConfig::new("example.com").with_record("@")),
        );
        config.save(&path).await.unwrap();

        let loaded = AgentConfig::load(&path).await.unwrap();
        assert_eq!(loaded, config);
    }
}
