// # ipsyncd - ipsync Daemon
//
// Thin integration layer: all discovery, DNS and scheduling logic lives in
// ipsync-core and the plugin crates.
//
// The daemon is responsible for:
// 1. Reading its own settings from environment variables
// 2. Loading (or creating) the agent configuration file
// 3. Registering address providers and DNS clients
// 4. Starting the monitoring scheduler and event hub
// 5. Serving the HTTP status surface and websocket feed
//
// ## Environment
//
// - `IPSYNC_CONFIG`: Path to the JSON agent configuration (default `ipsync.json`;
//   written with defaults when absent)
// - `IPSYNC_LISTEN`: HTTP listen address (default `0.0.0.0:8080`)
// - `IPSYNC_AUDIT_STORE`: Audit store type (file, memory)
// - `IPSYNC_AUDIT_PATH`: Path to the audit file (for file store)
// - `IPSYNC_LOG_LEVEL`: trace, debug, info, warn, error
//
// ## Example
//
// ```bash
// export IPSYNC_CONFIG=/etc/ipsync/ipsync.json
// export IPSYNC_AUDIT_PATH=/var/lib/ipsync/audit.json
//
// ipsyncd
// ```

mod routes;
mod ws;

use anyhow::{Context, Result};
use ipsync_core::config::ConfigHandle;
use ipsync_core::traits::AuditSink;
use ipsync_core::{AgentConfig, Engine, EventHub, FileAuditSink, MemoryAuditSink, ProviderRegistry};
use std::env;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// How long background tasks get to stop after the HTTP server exits
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum IpsyncExitCode {
    CleanShutdown = 0,
    ConfigError = 1,
    RuntimeError = 2,
}

impl From<IpsyncExitCode> for ExitCode {
    fn from(code: IpsyncExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AuditStoreType {
    File,
    Memory,
}

/// Daemon settings
#[derive(Debug)]
struct Config {
    config_path: PathBuf,
    listen: SocketAddr,
    audit_store: AuditStoreType,
    audit_path: PathBuf,
    log_level: Level,
}

impl Config {
    /// Load and validate settings from environment variables
    fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let listen = lookup("IPSYNC_LISTEN").unwrap_or_else(|| "0.0.0.0:8080".to_string());
        let listen: SocketAddr = listen
            .parse()
            .with_context(|| format!("IPSYNC_LISTEN '{listen}' is not a socket address"))?;

        let audit_store = match lookup("IPSYNC_AUDIT_STORE")
            .unwrap_or_else(|| "file".to_string())
            .to_lowercase()
            .as_str()
        {
            "file" => AuditStoreType::File,
            "memory" => AuditStoreType::Memory,
            other => anyhow::bail!(
                "IPSYNC_AUDIT_STORE '{}' is not supported. Supported types: file, memory",
                other
            ),
        };

        let audit_path = lookup("IPSYNC_AUDIT_PATH").unwrap_or_else(|| "ipsync-audit.json".to_string());
        if audit_store == AuditStoreType::File && audit_path.trim().is_empty() {
            anyhow::bail!("IPSYNC_AUDIT_PATH cannot be empty when IPSYNC_AUDIT_STORE=file");
        }

        let config_path = lookup("IPSYNC_CONFIG").unwrap_or_else(|| "ipsync.json".to_string());
        if config_path.trim().is_empty() {
            anyhow::bail!("IPSYNC_CONFIG cannot be empty");
        }

        let log_level = lookup("IPSYNC_LOG_LEVEL").unwrap_or_else(|| "info".to_string());
        let log_level = match log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => anyhow::bail!(
                "IPSYNC_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                log_level
            ),
        };

        Ok(Self {
            config_path: PathBuf::from(config_path),
            listen,
            audit_store,
            audit_path: PathBuf::from(audit_path),
            log_level,
        })
    }
}

fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return IpsyncExitCode::ConfigError.into();
        }
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(config.log_level)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return IpsyncExitCode::ConfigError.into();
    }

    info!("Starting ipsyncd daemon");

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return IpsyncExitCode::RuntimeError.into();
        }
    };

    rt.block_on(async {
        let daemon = match Daemon::start(config).await {
            Ok(daemon) => daemon,
            Err(e) => {
                error!("Startup failed: {:#}", e);
                return IpsyncExitCode::ConfigError;
            }
        };

        match daemon.serve().await {
            Ok(()) => IpsyncExitCode::CleanShutdown,
            Err(e) => {
                error!("Daemon error: {:#}", e);
                IpsyncExitCode::RuntimeError
            }
        }
    })
    .into()
}

/// Register every compiled-in plugin
fn build_registry() -> ProviderRegistry {
    let registry = ProviderRegistry::new();

    #[cfg(feature = "stun")]
    {
        info!("Registering STUN address provider");
        ipsync_ip_stun::register(&registry);
    }

    #[cfg(feature = "router")]
    {
        info!("Registering router SSH address provider");
        ipsync_ip_router::register(&registry);
    }

    #[cfg(feature = "cloudflare")]
    {
        info!("Registering Cloudflare DNS client");
        ipsync_provider_cloudflare::register(&registry);
    }

    registry
}

/// Read the agent configuration, writing defaults if the file is missing
async fn load_agent_config(path: &Path) -> Result<AgentConfig> {
    if tokio::fs::try_exists(path).await.unwrap_or(false) {
        let config = AgentConfig::load(path).await?;
        info!("Loaded configuration from {}", path.display());
        return Ok(config);
    }

    let config = AgentConfig::default();
    config
        .save(path)
        .await
        .with_context(|| format!("cannot write default configuration to {}", path.display()))?;
    warn!("No configuration at {}, wrote defaults", path.display());
    Ok(config)
}

/// Running daemon components
struct Daemon {
    engine: Engine,
    listener: tokio::net::TcpListener,
    config_path: PathBuf,
    scheduler: tokio::task::JoinHandle<ipsync_core::Result<()>>,
    scheduler_stop: oneshot::Sender<()>,
    dispatcher: tokio::task::JoinHandle<()>,
    dispatcher_stop: oneshot::Sender<()>,
}

impl Daemon {
    /// Build and spawn everything; failures here are startup errors
    async fn start(config: Config) -> Result<Self> {
        let agent_config = load_agent_config(&config.config_path).await?;
        for provider in &agent_config.ip_providers {
            info!(
                "IP provider: {} ({})",
                provider.kind,
                if provider.enabled { "enabled" } else { "disabled" }
            );
        }
        info!("DNS accounts: {}", agent_config.dns_accounts.len());

        let retention = agent_config.intervals.history_retention.get();
        let hub_config = agent_config.hub.clone();
        let handle = ConfigHandle::new(agent_config)?;

        let audit: Arc<dyn AuditSink> = match config.audit_store {
            AuditStoreType::File => {
                info!("Audit store: file at {}", config.audit_path.display());
                Arc::new(FileAuditSink::open(&config.audit_path, retention).await?)
            }
            AuditStoreType::Memory => {
                info!("Audit store: memory");
                Arc::new(MemoryAuditSink::new())
            }
        };

        let registry = Arc::new(build_registry());
        let (hub, dispatcher) = EventHub::new(&hub_config);
        let (engine, scheduler) = Engine::new(registry, handle, audit, hub)?;

        let listener = tokio::net::TcpListener::bind(config.listen)
            .await
            .with_context(|| format!("cannot listen on {}", config.listen))?;
        info!("Listening on {}", config.listen);

        let (dispatcher_stop, dispatcher_rx) = oneshot::channel();
        let dispatcher = tokio::spawn(dispatcher.run_with_shutdown(Some(dispatcher_rx)));

        let (scheduler_stop, scheduler_rx) = oneshot::channel();
        let scheduler = tokio::spawn(scheduler.run_with_shutdown(Some(scheduler_rx)));

        Ok(Self {
            engine,
            listener,
            config_path: config.config_path,
            scheduler,
            scheduler_stop,
            dispatcher,
            dispatcher_stop,
        })
    }

    /// Serve HTTP until a shutdown signal, then stop the background tasks
    async fn serve(self) -> Result<()> {
        let app = routes::router(routes::AppState {
            engine: self.engine.clone(),
            config_path: Arc::new(self.config_path),
        });

        axum::serve(self.listener, app)
            .with_graceful_shutdown(async {
                match wait_for_shutdown().await {
                    Ok(signal) => info!("Received shutdown signal: {}", signal),
                    Err(e) => error!("Signal handling failed: {:#}", e),
                }
            })
            .await
            .context("HTTP server failed")?;

        info!("Shutting down daemon");
        let _ = self.scheduler_stop.send(());
        let _ = self.dispatcher_stop.send(());

        match tokio::time::timeout(SHUTDOWN_GRACE, self.scheduler).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => return Err(e).context("monitoring scheduler failed"),
            Ok(Err(e)) => anyhow::bail!("monitoring scheduler panicked: {e}"),
            Err(_) => anyhow::bail!("monitoring scheduler did not stop within {SHUTDOWN_GRACE:?}"),
        }

        if tokio::time::timeout(SHUTDOWN_GRACE, self.dispatcher)
            .await
            .is_err()
        {
            warn!("Event hub did not stop within {:?}", SHUTDOWN_GRACE);
        }

        Ok(())
    }
}

/// Wait for SIGTERM or SIGINT
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Wait for CTRL-C
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}
