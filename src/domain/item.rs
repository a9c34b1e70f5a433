//! Monitored endpoint model and resource string parsing
//!
//! Accepts `[<scheme>://]<host>:<port>` where the host is a hostname, an IPv4
//! literal or a bracketed IPv6 literal.

use tracing::warn;
use url::Url;

use crate::errors::ResourceError;
use crate::network_client::is_ipv6;

pub const DEFAULT_NETWORK: &str = "tcp";
pub const MIN_PORT: i64 = 0;
pub const MAX_PORT: i64 = 65_535;

/// How to treat a resource whose `scheme://` prefix is not a valid URI scheme.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SchemePolicy {
    /// Fall back to `tcp` and log the degradation.
    #[default]
    Lenient,
    /// Reject the resource with [`ResourceError::InvalidScheme`].
    Strict,
}

/// One monitored endpoint. Built once by [`Item::parse`] and read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    /// Resource string with any `scheme://` prefix removed, e.g. `host:9090`.
    pub resource: String,
    pub network: String,
    pub host: String,
    pub port: u16,
    pub group: Option<String>,
    pub alias: Option<String>,
}

impl Item {
    pub fn parse(resource: &str, policy: SchemePolicy) -> Result<Self, ResourceError> {
        let network = resource_network(resource, policy)?;
        let stripped = strip_scheme(resource, &network);

        let (host, port) = split_host_port(stripped).ok_or_else(|| {
            ResourceError::MalformedResource {
                resource: stripped.to_string(),
            }
        })?;

        let port = port
            .parse::<i64>()
            .ok()
            .and_then(checked_port)
            .ok_or_else(|| ResourceError::InvalidPort {
                resource: stripped.to_string(),
                port: port.to_string(),
            })?;

        Ok(Self {
            resource: stripped.to_string(),
            network,
            host: host.to_string(),
            port,
            group: None,
            alias: None,
        })
    }

    pub fn with_group(mut self, group: Option<String>) -> Self {
        self.group = group;
        self
    }

    pub fn with_alias(mut self, alias: Option<String>) -> Self {
        self.alias = alias;
        self
    }

    /// Re-derives `host:port`, bracketing IPv6 literals.
    pub fn host_port(&self) -> String {
        if is_ipv6(&self.host) {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub fn is_tcp(&self) -> bool {
        self.network == DEFAULT_NETWORK
    }
}

/// Narrows a port number to `u16` when it lies in `[MIN_PORT, MAX_PORT]`.
pub fn checked_port(port: i64) -> Option<u16> {
    if (MIN_PORT..=MAX_PORT).contains(&port) {
        u16::try_from(port).ok()
    } else {
        None
    }
}

fn resource_network(resource: &str, policy: SchemePolicy) -> Result<String, ResourceError> {
    let Some((scheme, _)) = resource.split_once("://") else {
        return Ok(DEFAULT_NETWORK.to_string());
    };

    match Url::parse(resource) {
        Ok(url) => Ok(url.scheme().to_string()),
        // The scheme itself was accepted; the failure lies in the authority.
        Err(err) if err != url::ParseError::RelativeUrlWithoutBase => {
            Ok(scheme.to_ascii_lowercase())
        }
        Err(err) => match policy {
            SchemePolicy::Lenient => {
                warn!(
                    resource,
                    error = %err,
                    "unparseable resource scheme, falling back to tcp"
                );
                Ok(DEFAULT_NETWORK.to_string())
            }
            SchemePolicy::Strict => Err(ResourceError::InvalidScheme {
                resource: resource.to_string(),
            }),
        },
    }
}

fn strip_scheme<'a>(resource: &'a str, network: &str) -> &'a str {
    match resource.split_once("://") {
        Some((scheme, rest)) if scheme.eq_ignore_ascii_case(network) => rest,
        _ => resource,
    }
}

fn split_host_port(hostport: &str) -> Option<(&str, &str)> {
    let (host, port) = match hostport.strip_prefix('[') {
        Some(rest) => {
            let (host, after) = rest.split_once(']')?;
            (host, after.strip_prefix(':')?)
        }
        None => {
            let (host, port) = hostport.rsplit_once(':')?;
            if host.contains([':', '[', ']']) {
                return None;
            }
            (host, port)
        }
    };

    if host.is_empty() || port.contains([':', '[', ']']) {
        return None;
    }

    Some((host, port))
}
