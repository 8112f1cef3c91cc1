//! Error types for the ipsync agent
//!
//! This module defines all error types used throughout the crate.

use std::fmt;
use thiserror::Error;

/// Result type alias for ipsync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the ipsync agent
#[derive(Error, Debug)]
pub enum Error {
    /// The discovery endpoint could not be reached or timed out
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// The discovery endpoint answered with something we could not decode
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A response was decoded but carried no usable address
    #[error("No address found: {0}")]
    NoAddressFound(String),

    /// Requested device family or operation is not supported
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Authentication against a remote system failed
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Remote host presented a key other than the pinned one
    #[error("Host key mismatch for {host}")]
    HostKeyMismatch {
        /// Host that presented the unexpected key
        host: String,
    },

    /// No address provider is enabled in the current configuration
    #[error("no provider enabled")]
    NoProviderEnabled,

    /// Every enabled address provider failed
    #[error("all enabled providers failed: {}", join_failures(.failures))]
    AllProvidersFailed {
        /// One labeled failure per attempted provider, in attempt order
        failures: Vec<ProviderFailure>,
    },

    /// DNS provider-related errors
    #[error("DNS provider error: {0}")]
    DnsProvider(String),

    /// Audit store errors
    #[error("Audit store error: {0}")]
    Audit(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network-related errors
    #[error("Network error: {0}")]
    Network(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client errors (from provider APIs)
    #[error("HTTP error: {0}")]
    Http(String),

    /// Rate limiting errors
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Record or zone not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Provider-specific error
    #[error("Provider error ({provider}): {message}")]
    Provider {
        /// Provider name
        provider: String,
        /// Error message
        message: String,
    },

    /// A retried operation failed on every attempt
    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Total attempts made, including the first
        attempts: u32,
        /// Error from the final attempt
        last: Box<Error>,
    },

    /// An operation deadline elapsed before completion
    #[error("Deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an upstream-unavailable error
    pub fn upstream(msg: impl Into<String>) -> Self {
        Self::UpstreamUnavailable(msg.into())
    }

    /// Create a protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a no-address-found error
    pub fn no_address(msg: impl Into<String>) -> Self {
        Self::NoAddressFound(msg.into())
    }

    /// Create an unsupported error
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    /// Create an authentication error
    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    /// Create a DNS provider error
    pub fn dns_provider(msg: impl Into<String>) -> Self {
        Self::DnsProvider(msg.into())
    }

    /// Create an audit store error
    pub fn audit(msg: impl Into<String>) -> Self {
        Self::Audit(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an HTTP error
    pub fn http(msg: impl Into<String>) -> Self {
        Self::Http(msg.into())
    }

    /// Create a rate limit error
    pub fn rate_limited(msg: impl Into<String>) -> Self {
        Self::RateLimited(msg.into())
    }

    /// Create a "not found" error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a provider-specific error
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a deadline error
    pub fn deadline(msg: impl Into<String>) -> Self {
        Self::DeadlineExceeded(msg.into())
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}

/// A discovery failure labeled with the provider kind that produced it
#[derive(Debug)]
pub struct ProviderFailure {
    /// Configured provider kind (e.g. `stun`)
    pub kind: String,
    /// What went wrong
    pub error: Error,
}

impl ProviderFailure {
    pub fn new(kind: impl Into<String>, error: Error) -> Self {
        Self {
            kind: kind.into(),
            error,
        }
    }
}

impl fmt::Display for ProviderFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] failed: {}", self.kind, self.error)
    }
}

fn join_failures(failures: &[ProviderFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_failure_lists_each_provider_in_order() {
        let err = Error::AllProvidersFailed {
            failures: vec![
                ProviderFailure::new("stun", Error::upstream("timed out")),
                ProviderFailure::new("router_ssh", Error::auth("rejected")),
            ],
        };

        assert_eq!(
            err.to_string(),
            "all enabled providers failed: [stun] failed: Upstream unavailable: timed out; \
             [router_ssh] failed: Authentication failed: rejected"
        );
    }

    #[test]
    fn retries_exhausted_reports_last_error() {
        let err = Error::RetriesExhausted {
            attempts: 4,
            last: Box::new(Error::http("503")),
        };
        assert_eq!(err.to_string(), "gave up after 4 attempts: HTTP error: 503");
    }
}
