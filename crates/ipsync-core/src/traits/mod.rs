//! Core traits for the ipsync agent
//!
//! This module defines the abstract interfaces that all implementations must follow.
//!
//! - [`AddressProvider`]: Discover the public address
//! - [`DnsClient`]: Read and write DNS records via provider APIs
//! - [`AuditSink`]: Append-only history, outcomes and diagnostics

pub mod address_provider;
pub mod audit_sink;
pub mod dns_client;

pub use address_provider::{AddressProvider, AddressProviderFactory, Discovered};
pub use audit_sink::{AuditSink, DiagnosticEntry, DiagnosticLevel, HistoryEntry, UpdateEntry};
pub use dns_client::{DnsClient, DnsClientFactory, DnsRecord, NewRecord, RecordType};
