// # Cloudflare DNS Client
//
// `DnsClient` implementation for the Cloudflare v4 API.
//
// ## Behavior
//
// - One HTTP request per trait call
// - No retries, no backoff, no caching (owned by the `Synchronizer`)
// - HTTP status codes map onto `ipsync_core::Error` variants so the
//   synchronizer's log and audit entries say what went wrong
// - The API token never appears in logs or `Debug` output
//
// ## API Reference
//
// - List zones: GET `/zones?name=...`
// - List records: GET `/zones/:zone_id/dns_records?name=...&type=...`
// - Create record: POST `/zones/:zone_id/dns_records`
// - Update record: PUT `/zones/:zone_id/dns_records/:record_id`

use async_trait::async_trait;
use ipsync_core::config::{CLOUDFLARE_KIND, DnsAccountConfig};
use ipsync_core::traits::{DnsClient, DnsClientFactory, DnsRecord, NewRecord, RecordType};
use ipsync_core::{Error, ProviderRegistry, Result};
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// Cloudflare API base URL
const CLOUDFLARE_API_BASE: &str = "https://api.cloudflare.com/client/v4";

/// Default HTTP timeout for API requests
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Response envelope shared by every v4 endpoint
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    errors: Vec<ApiMessage>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct Zone {
    id: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Record {
    #[serde(default, skip_serializing)]
    id: String,
    name: String,
    #[serde(rename = "type")]
    record_type: RecordType,
    content: String,
    #[serde(default = "automatic_ttl")]
    ttl: u32,
    #[serde(default)]
    proxied: bool,
}

fn automatic_ttl() -> u32 {
    1
}

impl From<Record> for DnsRecord {
    fn from(record: Record) -> Self {
        Self {
            id: record.id,
            name: record.name,
            record_type: record.record_type,
            content: record.content,
            ttl: record.ttl,
            proxied: record.proxied,
        }
    }
}

/// Cloudflare API client for one account
pub struct CloudflareClient {
    /// ⚠️ NEVER log this value
    api_token: String,
    base_url: String,
    client: reqwest::Client,
}

impl fmt::Debug for CloudflareClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudflareClient")
            .field("api_token", &"<REDACTED>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl CloudflareClient {
    /// Create a client for the public API
    ///
    /// # Errors
    ///
    /// Fails if the token is empty or the HTTP client cannot be built.
    pub fn new(api_token: impl Into<String>) -> Result<Self> {
        let api_token = api_token.into();
        if api_token.trim().is_empty() {
            return Err(Error::config("Cloudflare API token is required"));
        }

        let client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::http(format!("cannot build HTTP client: {e}")))?;

        Ok(Self {
            api_token,
            base_url: CLOUDFLARE_API_BASE.to_string(),
            client,
        })
    }

    /// Point the client at a different API root
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send a request and unwrap the v4 envelope
    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder, what: &str) -> Result<T> {
        let response = request
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(|e| Error::http(format!("{what}: request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::http(format!("{what}: cannot read response: {e}")))?;

        if !status.is_success() {
            return Err(status_error(status, what, &body));
        }

        let envelope: Envelope<T> = serde_json::from_str(&body)
            .map_err(|e| Error::dns_provider(format!("{what}: malformed response: {e}")))?;

        if !envelope.success {
            return Err(Error::dns_provider(format!(
                "{what}: {}",
                describe(&envelope.errors)
            )));
        }

        envelope
            .result
            .ok_or_else(|| Error::dns_provider(format!("{what}: response has no result")))
    }
}

/// Map an HTTP failure onto an error variant
fn status_error(status: StatusCode, what: &str, body: &str) -> Error {
    let detail = serde_json::from_str::<Envelope<serde_json::Value>>(body)
        .map(|envelope| describe(&envelope.errors))
        .unwrap_or_else(|_| body.trim().chars().take(200).collect());

    match status.as_u16() {
        401 | 403 => Error::auth(format!(
            "{what}: invalid API token or insufficient permissions ({status}): {detail}"
        )),
        404 => Error::not_found(format!("{what}: {detail}")),
        429 => Error::rate_limited(format!("{what}: {status}")),
        500..=599 => Error::http(format!("{what}: Cloudflare server error {status}: {detail}")),
        _ => Error::dns_provider(format!("{what}: {status}: {detail}")),
    }
}

fn describe(errors: &[ApiMessage]) -> String {
    if errors.is_empty() {
        return "unknown error".to_string();
    }
    errors
        .iter()
        .map(|e| format!("{} (code {})", e.message, e.code))
        .collect::<Vec<_>>()
        .join("; ")
}

#[async_trait]
impl DnsClient for CloudflareClient {
    async fn resolve_zone_id(&self, zone_name: &str) -> Result<String> {
        debug!("Looking up zone ID for {}", zone_name);
        let request = self
            .client
            .get(self.url("/zones"))
            .query(&[("name", zone_name)]);
        let zones: Vec<Zone> = self.send(request, "zone lookup").await?;

        zones
            .into_iter()
            .next()
            .map(|zone| zone.id)
            .ok_or_else(|| Error::not_found(format!("zone {zone_name}")))
    }

    async fn list_records(
        &self,
        zone_id: &str,
        name: &str,
        record_type: RecordType,
    ) -> Result<Vec<DnsRecord>> {
        let request = self
            .client
            .get(self.url(&format!("/zones/{zone_id}/dns_records")))
            .query(&[("name", name), ("type", record_type.as_str())]);
        let records: Vec<Record> = self.send(request, "record lookup").await?;

        Ok(records.into_iter().map(DnsRecord::from).collect())
    }

    async fn create_record(&self, zone_id: &str, record: &NewRecord) -> Result<DnsRecord> {
        let body = Record {
            id: String::new(),
            name: record.name.clone(),
            record_type: record.record_type,
            content: record.content.clone(),
            ttl: record.ttl,
            proxied: record.proxied,
        };
        let request = self
            .client
            .post(self.url(&format!("/zones/{zone_id}/dns_records")))
            .json(&body);
        let created: Record = self.send(request, "record create").await?;

        Ok(created.into())
    }

    async fn update_record(&self, zone_id: &str, record: &DnsRecord) -> Result<DnsRecord> {
        let body = Record {
            id: String::new(),
            name: record.name.clone(),
            record_type: record.record_type,
            content: record.content.clone(),
            ttl: record.ttl,
            proxied: record.proxied,
        };
        let request = self
            .client
            .put(self.url(&format!("/zones/{zone_id}/dns_records/{}", record.id)))
            .json(&body);
        let updated: Record = self.send(request, "record update").await?;

        Ok(updated.into())
    }

    fn provider_name(&self) -> &'static str {
        CLOUDFLARE_KIND
    }
}

/// Factory for creating Cloudflare clients
pub struct CloudflareFactory;

impl DnsClientFactory for CloudflareFactory {
    fn create(&self, account: &DnsAccountConfig) -> Result<Box<dyn DnsClient>> {
        Ok(Box::new(CloudflareClient::new(account.api_token.clone())?))
    }
}

/// Register the Cloudflare client with a registry
///
/// # Example
///
/// ```rust
/// use ipsync_core::ProviderRegistry;
///
/// let registry = ProviderRegistry::new();
/// ipsync_provider_cloudflare::register(&registry);
/// assert!(registry.has_dns_client("cloudflare"));
/// ```
pub fn register(registry: &ProviderRegistry) {
    registry.register_dns_client(CLOUDFLARE_KIND, Box::new(CloudflareFactory));
}
