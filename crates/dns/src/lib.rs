//! Resolvability checks for submitted apex zones.
//!
//! Lookups go to one explicitly configured public resolver rather than the
//! system configuration. Timeouts are retried a bounded number of times;
//! every other lookup failure ends the check immediately.
mod address;
mod hickory;

use std::{future::Future, net::IpAddr, time::Duration};

use domain_intake_core::{Cancellation, ErrorKind};
use metrics::counter;
use thiserror::Error;
use tracing::{debug, warn};

pub use address::is_public_unicast;
pub use hickory::HickoryLookup;

/// Per-attempt lookup timeout.
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(10);

/// Backend answering `host -> addresses` queries.
pub trait HostLookup: Send + Sync {
    fn lookup_ip(
        &self,
        host: &str,
    ) -> impl Future<Output = Result<Vec<IpAddr>, LookupError>> + Send;
}

/// Failure of a single lookup attempt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LookupError {
    #[error("lookup timed out")]
    Timeout,
    #[error("no records found")]
    NoRecords,
    #[error("{0}")]
    Other(String),
}

/// Errors produced while checking whether a domain resolves to public addresses.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("failed to lookup domain '{domain}': {source}")]
    Lookup {
        domain: String,
        #[source]
        source: LookupError,
    },
    #[error("lookup of '{domain}' timed out after {attempts} attempts")]
    TimedOut { domain: String, attempts: u32 },
    #[error("resolved ip is not a valid public unicast ip address: {addr}")]
    NonPublic { domain: String, addr: IpAddr },
    #[error("lookup cancelled")]
    Cancelled,
}

impl ResolveError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::InvalidInput
    }
}

/// Checks that a domain resolves, and only to public unicast addresses.
#[derive(Clone)]
pub struct DomainValidator<L> {
    lookup: L,
    max_retries: u32,
    attempt_timeout: Duration,
}

impl<L: HostLookup> DomainValidator<L> {
    /// `max_retries` is the number of extra attempts made after a timeout.
    pub fn new(lookup: L, max_retries: u32) -> Self {
        Self {
            lookup,
            max_retries,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
        }
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Returns `Ok(true)` when every resolved address is public unicast.
    ///
    /// An empty answer yields `Ok(false)`. Cancellation is observed before
    /// each attempt and while an attempt is in flight.
    pub async fn is_resolvable(
        &self,
        domain: &str,
        cancel: &Cancellation,
    ) -> Result<bool, ResolveError> {
        let mut attempt: u32 = 0;
        let addrs = loop {
            if cancel.is_cancelled() {
                return Err(ResolveError::Cancelled);
            }
            attempt += 1;

            let result = cancel
                .run(tokio::time::timeout(
                    self.attempt_timeout,
                    self.lookup.lookup_ip(domain),
                ))
                .await
                .map_err(|_| ResolveError::Cancelled)?
                .unwrap_or(Err(LookupError::Timeout));

            match result {
                Ok(addrs) => break addrs,
                Err(LookupError::Timeout) if attempt <= self.max_retries => {
                    counter!("dns_lookup_retries_total").increment(1);
                    warn!(stage = "dns", %domain, attempt, "dns lookup timed out, retrying");
                }
                Err(LookupError::Timeout) => {
                    return Err(ResolveError::TimedOut {
                        domain: domain.to_string(),
                        attempts: attempt,
                    });
                }
                Err(source) => {
                    return Err(ResolveError::Lookup {
                        domain: domain.to_string(),
                        source,
                    });
                }
            }
        };

        if addrs.is_empty() {
            debug!(stage = "dns", %domain, "dns lookup returned no addresses");
            return Ok(false);
        }
        if let Some(addr) = addrs.iter().copied().find(|addr| !is_public_unicast(*addr)) {
            return Err(ResolveError::NonPublic {
                domain: domain.to_string(),
                addr,
            });
        }

        debug!(stage = "dns", %domain, count = addrs.len(), "domain resolves to public addresses");
        Ok(true)
    }
}
