//! Origin trust gate
//!
//! The only security boundary of the bridge. Every connection is checked
//! exactly once, at handshake time, against the configured allow-list.
//! Matching is exact and case-sensitive; there is no wildcard or
//! subdomain matching apart from the global "trust all" sentinel.

use crate::error::TrustError;
use std::collections::HashSet;
use std::net::SocketAddr;

/// Configuration value that trusts every origin
pub const TRUST_ALL: &str = "*";

/// The set of origins allowed to use the bridge
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustedOrigins {
    /// Every declared origin is trusted
    All,
    /// Only these exact origin strings are trusted
    Only(HashSet<String>),
}

impl TrustedOrigins {
    /// Build from a configured domain list
    ///
    /// A list whose first entry is `"*"` trusts everything. An empty
    /// list trusts nothing.
    pub fn from_domains<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let domains: Vec<String> = domains.into_iter().map(Into::into).collect();
        if domains.first().map(String::as_str) == Some(TRUST_ALL) {
            return Self::All;
        }
        Self::Only(domains.into_iter().collect())
    }

    /// True if `origin` is allowed
    pub fn contains(&self, origin: &str) -> bool {
        match self {
            Self::All => true,
            Self::Only(set) => set.contains(origin),
        }
    }
}

/// Transport-level facts about a connection attempt
#[derive(Debug, Clone)]
pub struct Handshake {
    /// Remote socket address of the client
    pub remote: SocketAddr,
    /// Declared `Origin` header, if any
    pub origin: Option<String>,
}

/// Decides whether a connection may transact at all
#[derive(Debug, Clone)]
pub struct TrustGate {
    origins: TrustedOrigins,
}

impl TrustGate {
    /// Create a gate over an immutable allow-list
    pub fn new(origins: TrustedOrigins) -> Self {
        match &origins {
            TrustedOrigins::All => tracing::info!("All domains trusted"),
            TrustedOrigins::Only(set) if set.is_empty() => {
                tracing::warn!("No domains are trusted; all connections will be refused")
            }
            TrustedOrigins::Only(set) => {
                for domain in set {
                    tracing::info!(domain = %domain, "Trusted domain");
                }
            }
        }
        Self { origins }
    }

    /// The configured allow-list
    pub fn origins(&self) -> &TrustedOrigins {
        &self.origins
    }

    /// True if a connection declaring `origin` may proceed
    pub fn is_trusted(&self, origin: Option<&str>) -> bool {
        origin.is_some_and(|o| self.origins.contains(o))
    }

    /// Evaluate a handshake, returning the trusted origin on success
    pub fn admit(&self, handshake: &Handshake) -> Result<String, TrustError> {
        tracing::info!(remote = %handshake.remote, "Received connection");

        let Some(origin) = handshake.origin.as_deref() else {
            tracing::warn!(
                remote = %handshake.remote,
                "No Origin header in request; dropping connection"
            );
            return Err(TrustError::MissingOrigin);
        };

        if !self.is_trusted(Some(origin)) {
            tracing::warn!(
                remote = %handshake.remote,
                origin = %origin,
                "Request from un-trusted domain"
            );
            return Err(TrustError::Untrusted(origin.to_string()));
        }

        tracing::info!(remote = %handshake.remote, origin = %origin, "Connection origin trusted");
        Ok(origin.to_string())
    }
}
