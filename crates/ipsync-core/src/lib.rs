// # ipsync-core
//
// Core library for the ipsync agent: discover the public address, keep DNS
// records pointed at it, and tell observers when it changes.
//
// ## Architecture Overview
//
// - **AddressProvider**: Trait for discovering the public address
// - **ProviderSelector**: Ordered fallback across configured providers
// - **DnsClient**: Trait for reading and writing DNS records
// - **Synchronizer**: Reconciles records with retry and backoff
// - **MonitoringScheduler**: The poll loop, interruptible by config changes
// - **SharedState**: Current address, source and last check time
// - **EventHub**: Pushes events to observers with per-subscriber queues
// - **AuditSink**: History, update outcomes and diagnostics
// - **ProviderRegistry**: Plugin registry for providers and DNS clients
//
// ## Design Principles
//
// 1. **Snapshots**: Configuration is swapped whole; a cycle reads one snapshot
// 2. **Plugin-Based**: Implementations register by kind name
// 3. **Failure isolation**: One provider, record or subscriber failing never
//    stops the others
// 4. **Library-First**: The daemon is a thin shell over this crate

pub mod audit;
pub mod config;
pub mod engine;
pub mod error;
pub mod hub;
pub mod registry;
pub mod selector;
pub mod status;
pub mod sync;
pub mod traits;

// Re-export core types for convenience
pub use audit::{FileAuditSink, MemoryAuditSink};
pub use config::{AgentConfig, ConfigHandle, ProviderConfig, ProviderSettings};
pub use engine::{Engine, MonitoringScheduler};
pub use error::{Error, Result};
pub use hub::EventHub;
pub use registry::ProviderRegistry;
pub use selector::ProviderSelector;
pub use status::SharedState;
pub use sync::Synchronizer;
pub use traits::{AddressProvider, AuditSink, DnsClient};
