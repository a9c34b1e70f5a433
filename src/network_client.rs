use std::{
    net::{IpAddr, SocketAddr},
    time::Duration,
};

use async_trait::async_trait;
use hickory_resolver::{
    config::LookupIpStrategy, ResolveError as LookupError, TokioResolver,
};
use tokio::{io::AsyncWriteExt, net::TcpStream, time::timeout};
use tracing::debug;

use crate::{domain::item::checked_port, errors::ResolveError};

/// Expands a host into the addresses it refers to.
#[async_trait]
pub trait Resolver: Send + Sync {
    /// An empty result means the lookup succeeded without records.
    async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>, ResolveError>;
}

/// Single-shot TCP reachability check.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, target: SocketAddr, timeout: Duration) -> bool;
}

/// True when `value` is an IP literal containing a colon.
pub fn is_ipv6(value: &str) -> bool {
    value.parse::<IpAddr>().is_ok() && value.contains(':')
}

/// Range-checks `port` before handing the attempt to `prober`.
pub async fn is_tcp_port_available(
    prober: &dyn Prober,
    address: IpAddr,
    port: i64,
    timeout: Duration,
) -> bool {
    let Some(port) = checked_port(port) else {
        return false;
    };
    prober.probe(SocketAddr::new(address, port), timeout).await
}

/// DNS resolver reading the host's `/etc/resolv.conf` and hosts file.
#[derive(Clone)]
pub struct SystemResolver {
    resolver: TokioResolver,
    lookup_timeout: Duration,
}

impl SystemResolver {
    pub fn new(lookup_timeout: Duration) -> Result<Self, ResolveError> {
        let mut builder =
            TokioResolver::builder_tokio().map_err(|err| ResolveError::SystemConfig {
                reason: err.to_string(),
            })?;
        let options = builder.options_mut();
        options.ip_strategy = LookupIpStrategy::Ipv4AndIpv6;
        options.timeout = lookup_timeout;

        Ok(Self {
            resolver: builder.build(),
            lookup_timeout,
        })
    }
}

#[async_trait]
impl Resolver for SystemResolver {
    async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>, ResolveError> {
        if let Ok(address) = host.parse::<IpAddr>() {
            return Ok(vec![address]);
        }

        let outcome = match timeout(self.lookup_timeout, self.resolver.lookup_ip(host)).await {
            Ok(Ok(lookup)) => Ok(dedup_addresses(lookup.iter())),
            Ok(Err(err)) => Err(LookupFailure::from_error(&err)),
            Err(_elapsed) => Err(LookupFailure::Failed(format!(
                "lookup timed out after {:?}",
                self.lookup_timeout
            ))),
        };

        lookup_outcome(host, outcome)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum LookupFailure {
    /// The name exists but carries no A/AAAA records.
    NoRecords,
    Failed(String),
}

impl LookupFailure {
    fn from_error(err: &LookupError) -> Self {
        // NXDOMAIN is also reported as "no records found"; it stays a failure.
        if err.is_no_records_found() && !err.is_nx_domain() {
            Self::NoRecords
        } else {
            Self::Failed(err.to_string())
        }
    }
}

fn lookup_outcome(
    host: &str,
    outcome: Result<Vec<IpAddr>, LookupFailure>,
) -> Result<Vec<IpAddr>, ResolveError> {
    match outcome {
        Ok(addresses) => Ok(addresses),
        Err(LookupFailure::NoRecords) => {
            debug!(host, "lookup returned no address records");
            Ok(Vec::new())
        }
        Err(LookupFailure::Failed(reason)) => Err(ResolveError::ResolutionFailed {
            host: host.to_string(),
            reason,
        }),
    }
}

fn dedup_addresses(addresses: impl Iterator<Item = IpAddr>) -> Vec<IpAddr> {
    let mut unique: Vec<IpAddr> = Vec::new();
    for address in addresses {
        if !unique.contains(&address) {
            unique.push(address);
        }
    }
    unique
}

#[derive(Debug, Default, Clone)]
pub struct TcpProber;

impl TcpProber {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Prober for TcpProber {
    async fn probe(&self, target: SocketAddr, connect_timeout: Duration) -> bool {
        let attempt = async {
            let mut stream = TcpStream::connect(target).await?;
            stream.shutdown().await?;
            Ok::<_, std::io::Error>(())
        };

        match timeout(connect_timeout, attempt).await {
            Ok(Ok(())) => true,
            Ok(Err(err)) => {
                debug!(%target, error = %err, "tcp connect failed");
                false
            }
            Err(_elapsed) => {
                debug!(%target, timeout_ms = connect_timeout.as_millis(), "tcp connect timed out");
                false
            }
        }
    }
}
