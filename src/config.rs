use std::{
    collections::{BTreeMap, HashSet},
    env, fs,
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};

use clap::Parser;
use serde::Deserialize;
use tracing::{info, warn};

use crate::{
    domain::item::{Item, SchemePolicy},
    errors::ConfigError,
    logging::LogConfig,
};

pub const DEFAULT_LISTEN_ADDR: &str = ":9407";
pub const DEFAULT_METRICS_PATH: &str = "/metrics";
pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_millis(500);
pub const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_GROUP: &str = "all";

pub const ENV_CONFIG_FILE: &str = "TCP_EXPORTER_CONFIG_FILE";
pub const ENV_TIMEOUT: &str = "TCP_EXPORTER_TIMEOUT";
pub const ENV_RESOLVE_TIMEOUT: &str = "TCP_EXPORTER_RESOLVE_TIMEOUT";
pub const ENV_LOG_LEVEL: &str = "TCP_EXPORTER_LOG_LEVEL";
pub const ENV_LISTEN_ADDRESS: &str = "TCP_EXPORTER_LISTEN_ADDRESS";
pub const ENV_TELEMETRY_PATH: &str = "TCP_EXPORTER_TELEMETRY_PATH";
pub const ENV_STRICT_SCHEMES: &str = "TCP_EXPORTER_STRICT_SCHEMES";
pub const ENV_RESOURCES: &str = "TCP_EXPORTER_RESOURCES";

#[derive(Debug, Clone, Default, Parser)]
#[command(name = "tcp-port-exporter", version, about = "Exports TCP reachability of configured endpoints")]
pub struct Cli {
    /// Configuration file in YAML format
    #[arg(long = "config-file")]
    pub config_file: Option<PathBuf>,
    /// Connection timeout, e.g. 500ms
    #[arg(long = "timeout")]
    pub timeout: Option<String>,
    /// DNS lookup timeout, e.g. 2s
    #[arg(long = "resolve-timeout")]
    pub resolve_timeout: Option<String>,
    /// Logging level
    #[arg(long = "log-level")]
    pub log_level: Option<String>,
    /// Listen address
    #[arg(long = "web.listen-address")]
    pub listen_address: Option<String>,
    /// Metrics path
    #[arg(long = "web.telemetry-path")]
    pub metrics_path: Option<String>,
    /// Reject resources whose scheme prefix does not parse
    #[arg(long = "strict-schemes")]
    pub strict_schemes: bool,
    /// Comma-separated resources, each `host:port` or `alias=host:port`
    #[arg(long = "resources")]
    pub resources: Option<String>,
}

/// A resource string and its labels, before parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResource {
    pub resource: String,
    pub group: Option<String>,
    pub alias: Option<String>,
}

/// Settings supplied by one source. `None` defers to the next source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigLayer {
    pub connection_timeout: Option<Duration>,
    pub resolve_timeout: Option<Duration>,
    pub log_level: Option<String>,
    pub listen_addr: Option<String>,
    pub metrics_path: Option<String>,
    pub strict_schemes: Option<bool>,
    pub resources: Option<Vec<RawResource>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct FileConfig {
    connection_timeout: Option<String>,
    resolve_timeout: Option<String>,
    log_level: Option<String>,
    listen_addr: Option<String>,
    metrics_path: Option<String>,
    strict_schemes: Option<bool>,
    resources: Option<ResourceTable>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ResourceTable {
    Flat(Vec<ResourceEntry>),
    Grouped(BTreeMap<String, Vec<ResourceEntry>>),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ResourceEntry {
    Plain(String),
    Detailed {
        addr: String,
        group: Option<String>,
        alias: Option<String>,
    },
}

impl ResourceEntry {
    fn into_raw(self, default_group: &str) -> RawResource {
        match self {
            Self::Plain(resource) => RawResource {
                resource: resource.trim().to_string(),
                group: Some(default_group.to_string()),
                alias: None,
            },
            Self::Detailed { addr, group, alias } => RawResource {
                resource: addr.trim().to_string(),
                group: non_empty(group).or_else(|| Some(default_group.to_string())),
                alias: non_empty(alias),
            },
        }
    }
}

impl ConfigLayer {
    pub fn from_yaml(path: &str, contents: &str) -> Result<Self, ConfigError> {
        let file: FileConfig =
            serde_yaml::from_str(contents).map_err(|source| ConfigError::ParseFile {
                path: path.to_string(),
                source,
            })?;

        let resources = file.resources.map(|table| match table {
            ResourceTable::Flat(entries) => entries
                .into_iter()
                .map(|entry| entry.into_raw(DEFAULT_GROUP))
                .collect(),
            ResourceTable::Grouped(groups) => groups
                .into_iter()
                .flat_map(|(group, entries)| {
                    entries
                        .into_iter()
                        .map(move |entry| entry.into_raw(&group))
                        .collect::<Vec<_>>()
                })
                .collect(),
        });

        Ok(Self {
            connection_timeout: layer_duration("connectionTimeout", file.connection_timeout)?,
            resolve_timeout: layer_duration("resolveTimeout", file.resolve_timeout)?,
            log_level: non_empty(file.log_level),
            listen_addr: non_empty(file.listen_addr),
            metrics_path: non_empty(file.metrics_path),
            strict_schemes: file.strict_schemes,
            resources,
        })
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: display.clone(),
            source,
        })?;
        Self::from_yaml(&display, &contents)
    }

    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        Ok(Self {
            connection_timeout: layer_duration("--timeout", cli.timeout.clone())?,
            resolve_timeout: layer_duration("--resolve-timeout", cli.resolve_timeout.clone())?,
            log_level: non_empty(cli.log_level.clone()),
            listen_addr: non_empty(cli.listen_address.clone()),
            metrics_path: non_empty(cli.metrics_path.clone()),
            strict_schemes: cli.strict_schemes.then_some(true),
            resources: cli.resources.as_deref().and_then(parse_resource_list),
        })
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let strict_schemes = non_empty(lookup(ENV_STRICT_SCHEMES))
            .map(|value| parse_bool(ENV_STRICT_SCHEMES, &value))
            .transpose()?;

        Ok(Self {
            connection_timeout: layer_duration(ENV_TIMEOUT, lookup(ENV_TIMEOUT))?,
            resolve_timeout: layer_duration(ENV_RESOLVE_TIMEOUT, lookup(ENV_RESOLVE_TIMEOUT))?,
            log_level: non_empty(lookup(ENV_LOG_LEVEL)),
            listen_addr: non_empty(lookup(ENV_LISTEN_ADDRESS)),
            metrics_path: non_empty(lookup(ENV_TELEMETRY_PATH)),
            strict_schemes,
            resources: lookup(ENV_RESOURCES)
                .as_deref()
                .and_then(parse_resource_list),
        })
    }

    /// Fills every unset setting from `lower`.
    pub fn or(self, lower: ConfigLayer) -> ConfigLayer {
        ConfigLayer {
            connection_timeout: self.connection_timeout.or(lower.connection_timeout),
            resolve_timeout: self.resolve_timeout.or(lower.resolve_timeout),
            log_level: self.log_level.or(lower.log_level),
            listen_addr: self.listen_addr.or(lower.listen_addr),
            metrics_path: self.metrics_path.or(lower.metrics_path),
            strict_schemes: self.strict_schemes.or(lower.strict_schemes),
            resources: self.resources.or(lower.resources),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub connection_timeout: Duration,
    pub resolve_timeout: Duration,
    pub log: LogConfig,
    pub listen_addr: String,
    pub metrics_path: String,
    pub scheme_policy: SchemePolicy,
    pub resources: Vec<RawResource>,
}

impl Config {
    /// Merges environment, flags, the optional YAML file and defaults, in that order.
    pub fn load(cli: &Cli) -> Result<Self, ConfigError> {
        let env_layer = ConfigLayer::from_env()?;
        let config_file = non_empty(env::var(ENV_CONFIG_FILE).ok())
            .map(PathBuf::from)
            .or_else(|| cli.config_file.clone());
        let file_layer = config_file
            .as_deref()
            .map(ConfigLayer::from_file)
            .transpose()?
            .unwrap_or_default();

        Self::from_layers(env_layer, ConfigLayer::from_cli(cli)?, file_layer)
    }

    pub fn from_layers(
        env_layer: ConfigLayer,
        flags_layer: ConfigLayer,
        file_layer: ConfigLayer,
    ) -> Result<Self, ConfigError> {
        let merged = env_layer.or(flags_layer).or(file_layer);

        let log = match merged.log_level.as_deref() {
            Some(level) => LogConfig::parse(level)?,
            None => LogConfig::default(),
        };

        let metrics_path = merged
            .metrics_path
            .map(|path| {
                if path.starts_with('/') {
                    path
                } else {
                    format!("/{path}")
                }
            })
            .unwrap_or_else(|| DEFAULT_METRICS_PATH.to_string());

        let config = Self {
            connection_timeout: merged
                .connection_timeout
                .unwrap_or(DEFAULT_CONNECTION_TIMEOUT),
            resolve_timeout: merged.resolve_timeout.unwrap_or(DEFAULT_RESOLVE_TIMEOUT),
            log,
            listen_addr: merged
                .listen_addr
                .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string()),
            metrics_path,
            scheme_policy: if merged.strict_schemes.unwrap_or(false) {
                SchemePolicy::Strict
            } else {
                SchemePolicy::Lenient
            },
            resources: merged.resources.unwrap_or_default(),
        };

        let _ = config.listen_target()?;
        Ok(config)
    }

    /// Checks the `host:port` shape of the listen address without resolving it.
    /// The `:port` shorthand expands to all IPv4 interfaces.
    pub fn listen_target(&self) -> Result<String, ConfigError> {
        let address = if self.listen_addr.starts_with(':') {
            format!("0.0.0.0{}", self.listen_addr)
        } else {
            self.listen_addr.clone()
        };
        if address.parse::<SocketAddr>().is_ok() {
            return Ok(address);
        }

        match address.rsplit_once(':') {
            Some((host, port))
                if !host.is_empty() && !host.contains(':') && port.parse::<u16>().is_ok() =>
            {
                Ok(address)
            }
            _ => Err(ConfigError::InvalidListenAddress(self.listen_addr.clone())),
        }
    }

    /// Resolves the listen address, taking the first address a hostname maps to.
    pub async fn listen_socket(&self) -> Result<SocketAddr, ConfigError> {
        let target = self.listen_target()?;
        tokio::net::lookup_host(target.as_str())
            .await
            .ok()
            .and_then(|mut addresses| addresses.next())
            .ok_or_else(|| ConfigError::InvalidListenAddress(self.listen_addr.clone()))
    }

    /// Parses every configured resource, skipping the ones that fail.
    pub fn build_items(&self) -> Result<Vec<Item>, ConfigError> {
        let mut items = Vec::with_capacity(self.resources.len());
        let mut seen = HashSet::new();

        for raw in &self.resources {
            let item = match Item::parse(&raw.resource, self.scheme_policy) {
                Ok(item) => item,
                Err(err) => {
                    warn!(resource = %raw.resource, error = %err, "skipping resource");
                    continue;
                }
            };

            if !item.is_tcp() {
                warn!(
                    resource = %raw.resource,
                    network = %item.network,
                    "skipping resource with unsupported network"
                );
                continue;
            }

            let series = (item.resource.clone(), raw.group.clone(), raw.alias.clone());
            if !seen.insert(series) {
                warn!(
                    resource = %raw.resource,
                    group = raw.group.as_deref().unwrap_or_default(),
                    alias = raw.alias.as_deref().unwrap_or_default(),
                    "skipping duplicate resource"
                );
                continue;
            }

            items.push(
                item.with_group(raw.group.clone())
                    .with_alias(raw.alias.clone()),
            );
        }

        if items.is_empty() {
            return Err(ConfigError::NoItems);
        }

        info!(
            configured = self.resources.len(),
            loaded = items.len(),
            "resources loaded"
        );
        Ok(items)
    }
}

/// Parses Go-style durations such as `500ms`, `2s` or `1m30s`.
pub fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    if value == "0" {
        return Some(Duration::ZERO);
    }
    if value.is_empty() {
        return None;
    }

    let mut total_nanos: u128 = 0;
    let mut rest = value;
    while !rest.is_empty() {
        let number_end = rest
            .find(|character: char| !(character.is_ascii_digit() || character == '.'))
            .unwrap_or(rest.len());
        let (whole, fraction) = rest[..number_end]
            .split_once('.')
            .unwrap_or((&rest[..number_end], ""));
        if whole.is_empty() && fraction.is_empty() {
            return None;
        }
        rest = &rest[number_end..];

        let unit_end = rest
            .find(|character: char| character.is_ascii_digit() || character == '.')
            .unwrap_or(rest.len());
        let nanos_per_unit: u128 = match &rest[..unit_end] {
            "ns" => 1,
            "us" | "µs" => 1_000,
            "ms" => 1_000_000,
            "s" => 1_000_000_000,
            "m" => 60_000_000_000,
            "h" => 3_600_000_000_000,
            _ => return None,
        };
        rest = &rest[unit_end..];

        let whole: u128 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
        let mut nanos = whole.checked_mul(nanos_per_unit)?;
        if !fraction.is_empty() {
            let scale = 10u128.checked_pow(u32::try_from(fraction.len()).ok()?)?;
            let fraction: u128 = fraction.parse().ok()?;
            nanos = nanos.checked_add(fraction.checked_mul(nanos_per_unit)? / scale)?;
        }
        total_nanos = total_nanos.checked_add(nanos)?;
    }

    Some(Duration::from_nanos(u64::try_from(total_nanos).ok()?))
}

fn layer_duration(
    setting: &'static str,
    value: Option<String>,
) -> Result<Option<Duration>, ConfigError> {
    let Some(value) = non_empty(value) else {
        return Ok(None);
    };
    let duration = parse_duration(&value).ok_or(ConfigError::InvalidDuration { setting, value })?;
    Ok(Some(duration).filter(|duration| !duration.is_zero()))
}

fn parse_bool(setting: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidBool {
            setting,
            value: value.to_string(),
        }),
    }
}

/// Splits `a:1, alias=b:2` into resources; blank elements are dropped.
fn parse_resource_list(value: &str) -> Option<Vec<RawResource>> {
    let resources: Vec<RawResource> = value
        .split(',')
        .map(str::trim)
        .filter(|element| !element.is_empty())
        .map(|element| match element.split_once('=') {
            Some((alias, resource)) => RawResource {
                resource: resource.trim().to_string(),
                group: None,
                alias: non_empty(Some(alias.to_string())),
            },
            None => RawResource {
                resource: element.to_string(),
                group: None,
                alias: None,
            },
        })
        .collect();

    (!resources.is_empty()).then_some(resources)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
