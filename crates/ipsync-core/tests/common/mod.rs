//! Test doubles and common utilities for contract tests
//!
//! Scripted address providers, an in-memory DNS client with call counters,
//! and a sleeper that records waits instead of sleeping.

#![allow(dead_code)]

use async_trait::async_trait;
use ipsync_core::config::{
    AgentConfig, ConfigHandle, DnsAccountConfig, HumanDuration, ProviderConfig, ProviderSettings,
    ZoneConfig,
};
use ipsync_core::error::{Error, Result};
use ipsync_core::registry::ProviderRegistry;
use ipsync_core::sync::Sleeper;
use ipsync_core::traits::{
    AddressProvider, AddressProviderFactory, Discovered, DnsClient, DnsClientFactory, DnsRecord,
    NewRecord, RecordType,
};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Kind name the in-memory DNS client is registered under
pub const MEMORY_DNS: &str = "memory";

// ---------------------------------------------------------------------------
// Address providers
// ---------------------------------------------------------------------------

/// What a scripted provider answers
#[derive(Debug, Clone)]
pub enum Script {
    /// Report this address with this source label
    Address(IpAddr, &'static str),
    /// Succeed without an address
    Empty,
    /// Fail with this message
    Fail(&'static str),
}

/// Shared control and counters for one scripted provider kind
#[derive(Clone)]
pub struct ScriptedHandle {
    script: Arc<Mutex<Script>>,
    calls: Arc<AtomicUsize>,
    call_times: Arc<Mutex<Vec<Instant>>>,
}

impl ScriptedHandle {
    fn new(script: Script) -> Self {
        Self {
            script: Arc::new(Mutex::new(script)),
            calls: Arc::new(AtomicUsize::new(0)),
            call_times: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Change what the provider answers from now on
    pub fn set(&self, script: Script) {
        *self.script.lock().unwrap() = script;
    }

    /// Number of discover() calls so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// When each discover() call happened
    pub fn call_times(&self) -> Vec<Instant> {
        self.call_times.lock().unwrap().clone()
    }

    /// Wait (yielding to other tasks) until at least `n` calls happened
    pub async fn wait_for_calls(&self, n: usize) {
        while self.calls() < n {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }
}

struct ScriptedProvider {
    kind: &'static str,
    handle: ScriptedHandle,
}

#[async_trait]
impl AddressProvider for ScriptedProvider {
    async fn discover(&self) -> Result<Option<Discovered>> {
        self.handle.calls.fetch_add(1, Ordering::SeqCst);
        self.handle.call_times.lock().unwrap().push(Instant::now());

        let script = self.handle.script.lock().unwrap().clone();
        match script {
            Script::Address(address, source) => Ok(Some(Discovered::new(address, source))),
            Script::Empty => Ok(None),
            Script::Fail(message) => Err(Error::upstream(message)),
        }
    }

    fn kind(&self) -> &'static str {
        self.kind
    }
}

struct ScriptedFactory {
    kind: &'static str,
    handle: ScriptedHandle,
    min_interval: Duration,
}

impl AddressProviderFactory for ScriptedFactory {
    fn create(&self, _settings: &ProviderSettings) -> Result<Box<dyn AddressProvider>> {
        Ok(Box::new(ScriptedProvider {
            kind: self.kind,
            handle: self.handle.clone(),
        }))
    }

    fn min_interval(&self) -> Duration {
        self.min_interval
    }
}

/// Register a scripted provider kind and return its control handle
pub fn register_scripted(
    registry: &ProviderRegistry,
    kind: &'static str,
    script: Script,
) -> ScriptedHandle {
    let handle = ScriptedHandle::new(script);
    registry.register_address_provider(
        kind,
        Box::new(ScriptedFactory {
            kind,
            handle: handle.clone(),
            min_interval: Duration::from_secs(1),
        }),
    );
    handle
}

// ---------------------------------------------------------------------------
// DNS client
// ---------------------------------------------------------------------------

#[derive(Default)]
struct DnsInner {
    zones: HashMap<String, String>,
    records: Vec<(String, DnsRecord)>,
    next_id: usize,
    fail_lookups: usize,
    fail_record_calls: usize,
}

/// In-memory DNS provider with call counters and failure injection
#[derive(Clone, Default)]
pub struct InMemoryDns {
    inner: Arc<Mutex<DnsInner>>,
    pub lookup_calls: Arc<AtomicUsize>,
    pub list_calls: Arc<AtomicUsize>,
    pub create_calls: Arc<AtomicUsize>,
    pub update_calls: Arc<AtomicUsize>,
}

impl InMemoryDns {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a zone; its ID is `id-<zone>`
    pub fn with_zone(self, zone: &str) -> Self {
        self.inner
            .lock()
            .unwrap()
            .zones
            .insert(zone.to_string(), format!("id-{zone}"));
        self
    }

    /// Seed an existing A/AAAA record
    pub fn with_record(self, zone: &str, name: &str, content: &str, proxied: bool) -> Self {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.next_id += 1;
            let record_type = RecordType::for_address(&content.parse().unwrap());
            let record = DnsRecord {
                id: format!("rec-{}", inner.next_id),
                name: name.to_string(),
                record_type,
                content: content.to_string(),
                ttl: 300,
                proxied,
            };
            inner.records.push((format!("id-{zone}"), record));
        }
        self
    }

    /// Make the next `n` zone lookups fail
    pub fn fail_lookups(&self, n: usize) {
        self.inner.lock().unwrap().fail_lookups = n;
    }

    /// Make the next `n` record listings fail
    pub fn fail_record_calls(&self, n: usize) {
        self.inner.lock().unwrap().fail_record_calls = n;
    }

    /// Current record with this name, if any
    pub fn record(&self, name: &str) -> Option<DnsRecord> {
        self.inner
            .lock()
            .unwrap()
            .records
            .iter()
            .find(|(_, r)| r.name == name)
            .map(|(_, r)| r.clone())
    }

    /// Create + update calls so far
    pub fn mutating_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst) + self.update_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DnsClient for InMemoryDns {
    async fn resolve_zone_id(&self, zone_name: &str) -> Result<String> {
        self.lookup_calls.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_lookups > 0 {
            inner.fail_lookups -= 1;
            return Err(Error::http("zone lookup unavailable"));
        }
        inner
            .zones
            .get(zone_name)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("zone {zone_name}")))
    }

    async fn list_records(
        &self,
        zone_id: &str,
        name: &str,
        record_type: RecordType,
    ) -> Result<Vec<DnsRecord>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_record_calls > 0 {
            inner.fail_record_calls -= 1;
            return Err(Error::http("503 Service Unavailable"));
        }
        Ok(inner
            .records
            .iter()
            .filter(|(zone, r)| zone == zone_id && r.name == name && r.record_type == record_type)
            .map(|(_, r)| r.clone())
            .collect())
    }

    async fn create_record(&self, zone_id: &str, record: &NewRecord) -> Result<DnsRecord> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.inner.lock().unwrap();
        inner.next_id += 1;
        let created = DnsRecord {
            id: format!("rec-{}", inner.next_id),
            name: record.name.clone(),
            record_type: record.record_type,
            content: record.content.clone(),
            ttl: record.ttl,
            proxied: record.proxied,
        };
        inner.records.push((zone_id.to_string(), created.clone()));
        Ok(created)
    }

    async fn update_record(&self, _zone_id: &str, record: &DnsRecord) -> Result<DnsRecord> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.inner.lock().unwrap();
        let slot = inner
            .records
            .iter_mut()
            .find(|(_, r)| r.id == record.id)
            .ok_or_else(|| Error::not_found(format!("record {}", record.id)))?;
        slot.1 = record.clone();
        Ok(record.clone())
    }

    fn provider_name(&self) -> &'static str {
        MEMORY_DNS
    }
}

struct InMemoryDnsFactory(InMemoryDns);

impl DnsClientFactory for InMemoryDnsFactory {
    fn create(&self, _account: &DnsAccountConfig) -> Result<Box<dyn DnsClient>> {
        Ok(Box::new(self.0.clone()))
    }
}

/// Register `dns` under [`MEMORY_DNS`]
pub fn register_dns(registry: &ProviderRegistry, dns: &InMemoryDns) {
    registry.register_dns_client(MEMORY_DNS, Box::new(InMemoryDnsFactory(dns.clone())));
}

// ---------------------------------------------------------------------------
// Sleeper
// ---------------------------------------------------------------------------

/// Records requested waits and returns immediately
#[derive(Clone, Default)]
pub struct RecordingSleeper {
    waits: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn waits(&self) -> Vec<Duration> {
        self.waits.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.waits.lock().unwrap().push(duration);
    }
}

// ---------------------------------------------------------------------------
// Configuration helpers
// ---------------------------------------------------------------------------

/// One account on the in-memory DNS client with one zone
pub fn account(zone: &str, records: &[&str]) -> DnsAccountConfig {
    let mut zone_config = ZoneConfig::new(zone);
    for record in records {
        zone_config = zone_config.with_record(*record);
    }
    let mut account = DnsAccountConfig::new("test-account", "test-token").with_zone(zone_config);
    account.provider = MEMORY_DNS.to_string();
    account
}

/// Configuration with the given providers and accounts, and fast retries
pub fn config_with(providers: &[&str], accounts: Vec<DnsAccountConfig>) -> AgentConfig {
    let mut config = AgentConfig {
        ip_providers: providers.iter().map(|kind| ProviderConfig::new(*kind)).collect(),
        dns_accounts: accounts,
        ..AgentConfig::default()
    };
    config.sync.initial_backoff = HumanDuration::from(Duration::from_millis(100));
    config.sync.max_backoff = HumanDuration::from(Duration::from_millis(250));
    config
}

pub fn handle(config: AgentConfig) -> ConfigHandle {
    ConfigHandle::new(config).unwrap()
}
