use std::{
    net::{IpAddr, SocketAddr},
    time::Duration,
};

use hickory_resolver::{
    config::{LookupIpStrategy, NameServerConfig, Protocol, ResolverConfig, ResolverOpts},
    error::{ResolveError as HickoryError, ResolveErrorKind},
    TokioAsyncResolver,
};

use crate::{HostLookup, LookupError, DEFAULT_ATTEMPT_TIMEOUT};

/// [`HostLookup`] backed by `hickory-resolver`, pinned to a single upstream server.
///
/// The system resolver configuration and hosts file are ignored.
#[derive(Clone)]
pub struct HickoryLookup {
    resolver: TokioAsyncResolver,
}

impl HickoryLookup {
    /// Builds a resolver that only talks to `server` (UDP with TCP fallback).
    pub fn new(server: SocketAddr) -> Self {
        Self::with_timeout(server, DEFAULT_ATTEMPT_TIMEOUT)
    }

    pub fn with_timeout(server: SocketAddr, timeout: Duration) -> Self {
        let mut config = ResolverConfig::new();
        config.add_name_server(NameServerConfig::new(server, Protocol::Udp));
        config.add_name_server(NameServerConfig::new(server, Protocol::Tcp));

        let mut opts = ResolverOpts::default();
        opts.timeout = timeout;
        // retries are driven by DomainValidator so they can observe cancellation
        opts.attempts = 1;
        opts.use_hosts_file = false;
        opts.ip_strategy = LookupIpStrategy::Ipv4AndIpv6;

        Self {
            resolver: TokioAsyncResolver::tokio(config, opts),
        }
    }
}

impl HostLookup for HickoryLookup {
    async fn lookup_ip(&self, host: &str) -> Result<Vec<IpAddr>, LookupError> {
        let lookup = self.resolver.lookup_ip(host).await.map_err(map_error)?;
        Ok(lookup.iter().collect())
    }
}

fn map_error(err: HickoryError) -> LookupError {
    match err.kind() {
        ResolveErrorKind::Timeout => LookupError::Timeout,
        ResolveErrorKind::NoRecordsFound { .. } => LookupError::NoRecords,
        _ => LookupError::Other(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_timeouts_for_retry() {
        let err = HickoryError::from(ResolveErrorKind::Timeout);
        assert_eq!(map_error(err), LookupError::Timeout);
    }

    #[test]
    fn maps_other_failures_to_terminal_errors() {
        let err = HickoryError::from(ResolveErrorKind::Message("connection refused"));
        assert!(matches!(
            map_error(err),
            LookupError::Other(message) if message.contains("connection refused")
        ));
    }
}
