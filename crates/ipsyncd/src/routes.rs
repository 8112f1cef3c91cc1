//! HTTP status and configuration surface
//!
//! Thin handlers over [`Engine`]; no DNS or discovery logic lives here.

use crate::ws;
use axum::body::Bytes;
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Months, Utc};
use ipsync_core::traits::{DiagnosticEntry, DiagnosticLevel, HistoryEntry, UpdateEntry};
use ipsync_core::{AgentConfig, Engine};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Entries of each audit kind returned by `/api/status`
const STATUS_RECENT_LIMIT: usize = 20;

/// Upper bound on audit entries scanned for `/api/stats/history`
const STATS_SCAN_LIMIT: usize = 10_000;

#[derive(Clone)]
pub struct AppState {
    pub engine: Engine,
    /// Where `POST /api/config` persists the new configuration
    pub config_path: Arc<PathBuf>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ip", get(plain_ip))
        .route("/api/ip", get(api_ip))
        .route("/api/status", get(status))
        .route("/api/stats/history", get(history_stats))
        .route("/api/config", get(get_config).post(save_config))
        .route("/api/config/export", get(export_config))
        .route("/api/config/import", post(import_config))
        .route("/api/dns/update", post(manual_update))
        .route("/ws", get(subscribe))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn plain_ip(State(state): State<AppState>) -> Response {
    match state.engine.current_address().await {
        Some(address) => format!("{address}\n").into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "IP unavailable\n").into_response(),
    }
}

async fn api_ip(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "ip": state.engine.current_address().await }))
}

#[derive(Serialize)]
struct StatusBody {
    ip: Option<IpAddr>,
    source: Option<String>,
    last_check: Option<DateTime<Utc>>,
    uptime_secs: i64,
    subscribers: usize,
    history: Vec<HistoryEntry>,
    updates: Vec<UpdateEntry>,
    diagnostics: Vec<DiagnosticEntry>,
}

async fn status(State(state): State<AppState>) -> Json<StatusBody> {
    let engine = &state.engine;
    let snapshot = engine.status().await;

    // Before the first discovery, report what would be asked first
    let source = snapshot.source.or_else(|| {
        engine
            .config()
            .current_snapshot()
            .ip_providers
            .iter()
            .find(|p| p.enabled)
            .map(|p| p.kind.to_uppercase())
    });

    let audit = engine.audit();
    Json(StatusBody {
        ip: snapshot.address,
        source,
        last_check: snapshot.last_check,
        uptime_secs: (Utc::now() - engine.started_at()).num_seconds(),
        subscribers: engine.hub().subscriber_count().await,
        history: audit.recent_history(STATUS_RECENT_LIMIT).await,
        updates: audit.recent_updates(STATUS_RECENT_LIMIT).await,
        diagnostics: audit.recent_diagnostics(STATUS_RECENT_LIMIT).await,
    })
}

async fn get_config(State(state): State<AppState>) -> Json<AgentConfig> {
    Json(state.engine.config().current_snapshot().as_ref().clone())
}

async fn save_config(State(state): State<AppState>, Json(config): Json<AgentConfig>) -> Response {
    match apply_config(&state, config).await {
        Ok(()) => Json(json!({ "status": "saved" })).into_response(),
        Err(response) => response,
    }
}

/// Download the live configuration as a file
async fn export_config(State(state): State<AppState>) -> Response {
    let snapshot = state.engine.config().current_snapshot();
    match serde_json::to_vec_pretty(snapshot.as_ref()) {
        Ok(body) => (
            [
                (header::CONTENT_TYPE, "application/json"),
                (
                    header::CONTENT_DISPOSITION,
                    "attachment; filename=\"ipsync.json\"",
                ),
            ],
            body,
        )
            .into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// Replace the configuration with an uploaded file
async fn import_config(State(state): State<AppState>, body: Bytes) -> Response {
    let config: AgentConfig = match serde_json::from_slice(&body) {
        Ok(config) => config,
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("invalid configuration file: {e}"),
            );
        }
    };

    match apply_config(&state, config).await {
        Ok(()) => Json(json!({ "status": "imported" })).into_response(),
        Err(response) => response,
    }
}

/// Validate, persist and install a configuration, then resync in the background
async fn apply_config(state: &AppState, config: AgentConfig) -> Result<(), Response> {
    config
        .validate()
        .map_err(|e| error_response(StatusCode::BAD_REQUEST, e.to_string()))?;

    config
        .save(state.config_path.as_path())
        .await
        .map_err(|e| {
            error!("Failed to persist configuration: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })?;

    state
        .engine
        .update_config(config)
        .map_err(|e| error_response(StatusCode::BAD_REQUEST, e.to_string()))?;
    info!("Configuration updated");

    // New accounts or records should not wait for the next address change
    let engine = state.engine.clone();
    tokio::spawn(async move {
        if let Some(address) = engine.current_address().await {
            engine.trigger_immediate_reconciliation(address).await;
        }
    });

    Ok(())
}

#[derive(Debug, Deserialize)]
struct StatsQuery {
    range: Option<String>,
}

/// Bucket width for history counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
enum GroupBy {
    Minute,
    Hour,
    Day,
    Month,
}

impl GroupBy {
    fn bucket(self, at: DateTime<Utc>) -> String {
        let format = match self {
            GroupBy::Minute => "%Y-%m-%d %H:%M",
            GroupBy::Hour => "%Y-%m-%d %H:00",
            GroupBy::Day => "%Y-%m-%d",
            GroupBy::Month => "%Y-%m",
        };
        at.format(format).to_string()
    }
}

/// Window start and bucket width for a `range` value
///
/// Unknown ranges fall back to `24h`. `all` has no start.
fn stats_window(range: &str, now: DateTime<Utc>) -> (&'static str, Option<DateTime<Utc>>, GroupBy) {
    match range {
        "1h" => ("1h", Some(now - chrono::Duration::hours(1)), GroupBy::Minute),
        "7d" => ("7d", Some(now - chrono::Duration::days(7)), GroupBy::Day),
        "30d" => ("30d", Some(now - chrono::Duration::days(30)), GroupBy::Day),
        "365d" | "1y" => ("1y", now.checked_sub_months(Months::new(12)), GroupBy::Month),
        "all" => ("all", None, GroupBy::Month),
        _ => ("24h", Some(now - chrono::Duration::hours(24)), GroupBy::Hour),
    }
}

#[derive(Debug, Serialize, PartialEq, Eq)]
struct HistoryBucket {
    time: String,
    count: usize,
}

/// Count history entries since `start`, oldest bucket first
fn bucket_history(
    history: &[HistoryEntry],
    start: Option<DateTime<Utc>>,
    group_by: GroupBy,
) -> Vec<HistoryBucket> {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for entry in history
        .iter()
        .filter(|e| start.is_none_or(|start| e.observed_at >= start))
    {
        *counts.entry(group_by.bucket(entry.observed_at)).or_default() += 1;
    }
    counts
        .into_iter()
        .map(|(time, count)| HistoryBucket { time, count })
        .collect()
}

async fn history_stats(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> Json<serde_json::Value> {
    let (range, start, group_by) = stats_window(query.range.as_deref().unwrap_or("24h"), Utc::now());
    let in_window = |at: DateTime<Utc>| start.is_none_or(|start| at >= start);

    let audit = state.engine.audit();
    let history = audit.recent_history(STATS_SCAN_LIMIT).await;
    let dns_failures: Vec<UpdateEntry> = audit
        .recent_updates(STATS_SCAN_LIMIT)
        .await
        .into_iter()
        .filter(|u| !u.success && in_window(u.recorded_at))
        .collect();
    let error_logs: Vec<DiagnosticEntry> = audit
        .recent_diagnostics(STATS_SCAN_LIMIT)
        .await
        .into_iter()
        .filter(|d| d.level == DiagnosticLevel::Error && in_window(d.recorded_at))
        .collect();

    let data = bucket_history(&history, start, group_by);
    let ip_history: Vec<HistoryEntry> = history
        .into_iter()
        .filter(|h| in_window(h.observed_at))
        .collect();

    Json(json!({
        "range": range,
        "group_by": group_by,
        "data": data,
        "dns_failures": dns_failures,
        "error_logs": error_logs,
        "ip_history": ip_history,
    }))
}

async fn manual_update(State(state): State<AppState>) -> Response {
    let engine = &state.engine;
    let address = match engine.current_address().await {
        Some(address) => address,
        None => match engine.discover_now().await {
            Ok(observation) => {
                engine.broadcast_change(observation.address, &observation.source);
                observation.address
            }
            Err(e) => {
                warn!("Manual update could not discover an address: {}", e);
                return error_response(StatusCode::SERVICE_UNAVAILABLE, e.to_string());
            }
        },
    };

    let outcomes = engine.trigger_immediate_reconciliation(address).await;
    let results: Vec<UpdateEntry> = outcomes.iter().map(UpdateEntry::from).collect();

    Json(json!({ "ip": address, "results": results })).into_response()
}

async fn subscribe(State(state): State<AppState>, upgrade: WebSocketUpgrade) -> Response {
    let hub = state.engine.hub().clone();
    upgrade.on_upgrade(move |socket| ws::serve(hub, socket))
}

fn error_response(status: StatusCode, message: String) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ipsync_core::config::{ConfigHandle, DnsAccountConfig, ZoneConfig};
    use ipsync_core::traits::AuditSink;
    use ipsync_core::{EventHub, MemoryAuditSink, ProviderRegistry};
    use tempfile::TempDir;

    struct Harness {
        base: String,
        engine: Engine,
        audit: Arc<MemoryAuditSink>,
        config_path: PathBuf,
        _dir: TempDir,
    }

    async fn spawn_daemon() -> Harness {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("ipsync.json");
        let config = ConfigHandle::new(AgentConfig::default()).unwrap();
        let (hub, dispatcher) = EventHub::new(&config.current_snapshot().hub);
        tokio::spawn(dispatcher.run());

        let audit = Arc::new(MemoryAuditSink::new());
        let (engine, _scheduler) = Engine::new(
            Arc::new(ProviderRegistry::new()),
            config,
            audit.clone(),
            hub,
        )
        .unwrap();

        let app = router(AppState {
            engine: engine.clone(),
            config_path: Arc::new(config_path.clone()),
        });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await });

        Harness {
            base: format!("http://{addr}"),
            engine,
            audit,
            config_path,
            _dir: dir,
        }
    }

    fn config_with_zone(zone: &str) -> AgentConfig {
        let mut config = AgentConfig::default();
        config.dns_accounts.push(
            DnsAccountConfig::new("home", "token")
                .with_zone(ZoneConfig::new(zone).with_record("www")),
        );
        config
    }

    async fn get_json(url: String) -> serde_json::Value {
        reqwest::get(url).await.unwrap().json().await.unwrap()
    }

    fn seen_at(address: &str, at: DateTime<Utc>) -> HistoryEntry {
        HistoryEntry {
            address: address.parse().unwrap(),
            version: "v4".to_string(),
            source: "STUN".to_string(),
            observed_at: at,
        }
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let daemon = spawn_daemon().await;
        let body: serde_json::Value = reqwest::get(format!("{}/health", daemon.base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body, json!({ "status": "ok" }));
    }

    #[tokio::test]
    async fn unknown_address_is_unavailable() {
        let daemon = spawn_daemon().await;

        let response = reqwest::get(format!("{}/ip", daemon.base)).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.text().await.unwrap(), "IP unavailable\n");

        let body: serde_json::Value = reqwest::get(format!("{}/api/ip", daemon.base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["ip"], serde_json::Value::Null);
    }

    #[tokio::test]
    async fn status_falls_back_to_first_enabled_provider() {
        let daemon = spawn_daemon().await;
        let body: serde_json::Value = reqwest::get(format!("{}/api/status", daemon.base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        assert_eq!(body["source"], "STUN");
        assert_eq!(body["subscribers"], 0);
        assert!(body["history"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_and_not_saved() {
        let daemon = spawn_daemon().await;
        let mut config = AgentConfig::default();
        config.dns_accounts.push(
            DnsAccountConfig::new("home", "token")
                .with_zone(ZoneConfig::new("not a domain").with_record("www")),
        );

        let response = reqwest::Client::new()
            .post(format!("{}/api/config", daemon.base))
            .json(&config)
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
        assert!(!daemon.config_path.exists());
        assert!(daemon.engine.config().current_snapshot().dns_accounts.is_empty());
    }

    #[tokio::test]
    async fn valid_config_is_saved_and_swapped() {
        let daemon = spawn_daemon().await;
        let mut config = AgentConfig::default();
        config.dns_accounts.push(
            DnsAccountConfig::new("home", "token")
                .with_zone(ZoneConfig::new("example.com").with_record("www")),
        );

        let response = reqwest::Client::new()
            .post(format!("{}/api/config", daemon.base))
            .json(&config)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);

        let saved = AgentConfig::load(&daemon.config_path).await.unwrap();
        assert_eq!(saved.dns_accounts.len(), 1);
        assert_eq!(
            daemon.engine.config().current_snapshot().dns_accounts[0].name,
            "home"
        );

        let served: serde_json::Value = reqwest::get(format!("{}/api/config", daemon.base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(served["dns_accounts"][0]["zones"][0]["zone_name"], "example.com");
    }

    #[tokio::test]
    async fn manual_update_without_providers_is_unavailable() {
        let daemon = spawn_daemon().await;
        let response = reqwest::Client::new()
            .post(format!("{}/api/dns/update", daemon.base))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["error"], "no provider enabled");
    }

    #[test]
    fn history_is_counted_per_bucket_inside_the_window() {
        let at = |m, d, h, min| Utc.with_ymd_and_hms(2024, m, d, h, min, 0).unwrap();
        let history = vec![
            seen_at("203.0.113.1", at(1, 1, 8, 0)),
            seen_at("203.0.113.2", at(3, 1, 10, 15)),
            seen_at("203.0.113.3", at(3, 1, 10, 45)),
            seen_at("203.0.113.4", at(3, 1, 11, 5)),
        ];

        let hourly = bucket_history(&history, Some(at(3, 1, 0, 0)), GroupBy::Hour);
        assert_eq!(
            hourly,
            vec![
                HistoryBucket { time: "2024-03-01 10:00".to_string(), count: 2 },
                HistoryBucket { time: "2024-03-01 11:00".to_string(), count: 1 },
            ]
        );

        let monthly = bucket_history(&history, None, GroupBy::Month);
        assert_eq!(
            monthly,
            vec![
                HistoryBucket { time: "2024-01".to_string(), count: 1 },
                HistoryBucket { time: "2024-03".to_string(), count: 3 },
            ]
        );
    }

    #[test]
    fn stats_ranges_pick_window_and_grouping() {
        let now = Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap();

        let (range, start, group) = stats_window("1h", now);
        assert_eq!((range, group), ("1h", GroupBy::Minute));
        assert_eq!(start, Some(Utc.with_ymd_and_hms(2024, 6, 15, 11, 0, 0).unwrap()));

        let (_, start, group) = stats_window("365d", now);
        assert_eq!(group, GroupBy::Month);
        assert_eq!(start, Some(Utc.with_ymd_and_hms(2023, 6, 15, 12, 0, 0).unwrap()));

        assert_eq!(stats_window("all", now).1, None);
        assert_eq!(stats_window("fortnight", now).0, "24h");
        assert_eq!(stats_window("fortnight", now).2, GroupBy::Hour);
    }

    #[tokio::test]
    async fn history_stats_route_counts_recorded_changes() {
        let daemon = spawn_daemon().await;
        daemon.audit.record_history("203.0.113.1".parse().unwrap(), "STUN").await;
        daemon.audit.record_history("203.0.113.2".parse().unwrap(), "STUN").await;

        let body = get_json(format!("{}/api/stats/history?range=1h", daemon.base)).await;
        assert_eq!(body["range"], "1h");
        assert_eq!(body["group_by"], "minute");
        let total: u64 = body["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|b| b["count"].as_u64().unwrap())
            .sum();
        assert_eq!(total, 2);
        assert_eq!(body["ip_history"].as_array().unwrap().len(), 2);
        assert!(body["dns_failures"].as_array().unwrap().is_empty());

        let body = get_json(format!("{}/api/stats/history", daemon.base)).await;
        assert_eq!(body["range"], "24h");
        assert_eq!(body["group_by"], "hour");

        let body = get_json(format!("{}/api/stats/history?range=all", daemon.base)).await;
        assert_eq!(body["group_by"], "month");
    }

    #[tokio::test]
    async fn export_downloads_live_config_as_attachment() {
        let daemon = spawn_daemon().await;
        daemon.engine.update_config(config_with_zone("example.com")).unwrap();

        let response = reqwest::get(format!("{}/api/config/export", daemon.base))
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        let disposition = response
            .headers()
            .get(reqwest::header::CONTENT_DISPOSITION)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(disposition.starts_with("attachment"));
        assert!(disposition.contains("ipsync.json"));

        let exported: AgentConfig = serde_json::from_slice(&response.bytes().await.unwrap()).unwrap();
        assert_eq!(exported, config_with_zone("example.com"));
    }

    #[tokio::test]
    async fn import_installs_and_persists_uploaded_file() {
        let daemon = spawn_daemon().await;
        let upload = serde_json::to_vec_pretty(&config_with_zone("example.net")).unwrap();

        let response = reqwest::Client::new()
            .post(format!("{}/api/config/import", daemon.base))
            .body(upload)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);

        let saved = AgentConfig::load(&daemon.config_path).await.unwrap();
        assert_eq!(saved, config_with_zone("example.net"));
        assert_eq!(
            daemon.engine.config().current_snapshot().dns_accounts[0].zones[0].zone_name,
            "example.net"
        );
    }

    #[tokio::test]
    async fn import_rejects_unparseable_and_invalid_files() {
        let daemon = spawn_daemon().await;
        let client = reqwest::Client::new();

        let response = client
            .post(format!("{}/api/config/import", daemon.base))
            .body("ip_providers: [stun]")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

        let invalid = serde_json::to_vec(&config_with_zone("not a domain")).unwrap();
        let response = client
            .post(format!("{}/api/config/import", daemon.base))
            .body(invalid)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

        assert!(!daemon.config_path.exists());
        assert!(daemon.engine.config().current_snapshot().dns_accounts.is_empty());
    }
}
