//! Probe cycle over the configured items
//!
//! Each item is resolved, then every resolved address is probed in its own
//! task. Failures stay attached to the item they came from.

use std::{
    net::IpAddr,
    sync::Arc,
    time::{Duration, Instant},
};

use tokio::task::{JoinError, JoinSet};
use tracing::{debug, warn};

use crate::{
    domain::item::Item,
    errors::ResolveError,
    network_client::{is_tcp_port_available, Prober, Resolver},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub item: Arc<Item>,
    pub address: IpAddr,
    pub available: bool,
}

#[derive(Debug, Clone)]
pub struct ItemReport {
    pub item: Arc<Item>,
    pub resolution: Result<Vec<IpAddr>, ResolveError>,
    /// One entry per resolved address, in resolution order.
    pub results: Vec<ProbeResult>,
}

#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    /// One entry per item, in configuration order.
    pub items: Vec<ItemReport>,
    pub duration: Duration,
}

impl CycleReport {
    pub fn results(&self) -> impl Iterator<Item = &ProbeResult> {
        self.items.iter().flat_map(|report| report.results.iter())
    }
}

#[derive(Clone)]
pub struct ProbeEngine {
    items: Arc<[Arc<Item>]>,
    resolver: Arc<dyn Resolver>,
    prober: Arc<dyn Prober>,
    connection_timeout: Duration,
}

impl ProbeEngine {
    pub fn new(
        items: Vec<Item>,
        resolver: Arc<dyn Resolver>,
        prober: Arc<dyn Prober>,
        connection_timeout: Duration,
    ) -> Self {
        Self {
            items: items.into_iter().map(Arc::new).collect(),
            resolver,
            prober,
            connection_timeout,
        }
    }

    pub fn items(&self) -> &[Arc<Item>] {
        &self.items
    }

    pub async fn run_cycle(&self) -> Result<CycleReport, JoinError> {
        let started_at = Instant::now();
        let mut tasks = JoinSet::new();

        for (index, item) in self.items.iter().enumerate() {
            let resolver = Arc::clone(&self.resolver);
            let prober = Arc::clone(&self.prober);
            let item = Arc::clone(item);
            let connection_timeout = self.connection_timeout;
            tasks.spawn(async move {
                let report = probe_item(resolver, prober, item, connection_timeout).await;
                (index, report)
            });
        }

        let mut indexed = Vec::with_capacity(self.items.len());
        while let Some(joined) = tasks.join_next().await {
            let (index, report) = joined?;
            indexed.push((index, report?));
        }
        indexed.sort_by_key(|(index, _)| *index);

        let report = CycleReport {
            items: indexed.into_iter().map(|(_, report)| report).collect(),
            duration: started_at.elapsed(),
        };

        debug!(
            items = report.items.len(),
            probes = report.results().count(),
            available = report.results().filter(|result| result.available).count(),
            duration_ms = report.duration.as_millis(),
            "probe cycle finished"
        );

        Ok(report)
    }
}

/// Resolves `item` and probes each of its addresses concurrently.
pub async fn probe_item(
    resolver: Arc<dyn Resolver>,
    prober: Arc<dyn Prober>,
    item: Arc<Item>,
    connection_timeout: Duration,
) -> Result<ItemReport, JoinError> {
    let addresses = match resolver.resolve(&item.host).await {
        Ok(addresses) => addresses,
        Err(err) => {
            warn!(resource = %item.resource, error = %err, "resolution failed");
            return Ok(ItemReport {
                item,
                resolution: Err(err),
                results: Vec::new(),
            });
        }
    };

    if addresses.is_empty() {
        warn!(resource = %item.resource, host = %item.host, "host resolved to no addresses");
    }

    let mut tasks = JoinSet::new();
    for (index, address) in addresses.iter().copied().enumerate() {
        let prober = Arc::clone(&prober);
        let port = i64::from(item.port);
        tasks.spawn(async move {
            let available =
                is_tcp_port_available(prober.as_ref(), address, port, connection_timeout).await;
            (index, address, available)
        });
    }

    let mut probed = Vec::with_capacity(addresses.len());
    while let Some(joined) = tasks.join_next().await {
        probed.push(joined?);
    }
    probed.sort_by_key(|(index, _, _)| *index);

    let results = probed
        .into_iter()
        .map(|(_, address, available)| {
            if !available {
                debug!(resource = %item.resource, %address, "endpoint unavailable");
            }
            ProbeResult {
                item: Arc::clone(&item),
                address,
                available,
            }
        })
        .collect();

    Ok(ItemReport {
        item,
        resolution: Ok(addresses),
        results,
    })
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        net::SocketAddr,
        sync::Mutex,
    };

    use async_trait::async_trait;

    use super::*;
    use crate::domain::item::SchemePolicy;

    #[derive(Default)]
    struct FakeResolver {
        hosts: HashMap<String, Vec<IpAddr>>,
    }

    impl FakeResolver {
        fn with(mut self, host: &str, addresses: &[&str]) -> Self {
            self.hosts.insert(
                host.to_string(),
                addresses
                    .iter()
                    .map(|address| address.parse().expect("ip"))
                    .collect(),
            );
            self
        }
    }

    #[async_trait]
    impl Resolver for FakeResolver {
        async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>, ResolveError> {
            self.hosts
                .get(host)
                .cloned()
                .ok_or_else(|| ResolveError::ResolutionFailed {
                    host: host.to_string(),
                    reason: "NXDOMAIN".to_string(),
                })
        }
    }

    #[derive(Default)]
    struct FakeProber {
        open: Vec<SocketAddr>,
        seen: Mutex<Vec<SocketAddr>>,
    }

    #[async_trait]
    impl Prober for FakeProber {
        async fn probe(&self, target: SocketAddr, _timeout: Duration) -> bool {
            self.seen.lock().expect("lock").push(target);
            self.open.contains(&target)
        }
    }

    fn item(resource: &str) -> Item {
        Item::parse(resource, SchemePolicy::Lenient).expect("valid resource")
    }

    #[tokio::test]
    async fn results_are_attributed_to_items_and_addresses() {
        let resolver = FakeResolver::default()
            .with("web", &["10.0.0.1", "2001:db8::1"])
            .with("10.0.0.9", &["10.0.0.9"]);
        let prober = Arc::new(FakeProber {
            open: vec!["10.0.0.1:80".parse().expect("addr")],
            ..FakeProber::default()
        });

        let engine = ProbeEngine::new(
            vec![item("web:80"), item("10.0.0.9:22")],
            Arc::new(resolver),
            prober.clone(),
            Duration::from_millis(100),
        );
        let report = engine.run_cycle().await.expect("cycle");

        assert_eq!(report.items.len(), 2);
        assert_eq!(report.items[0].item.resource, "web:80");
        assert_eq!(report.items[0].results.len(), 2);
        assert_eq!(
            report.items[0].results[0].address,
            "10.0.0.1".parse::<IpAddr>().expect("ip")
        );
        assert!(report.items[0].results[0].available);
        assert!(!report.items[0].results[1].available);
        assert_eq!(report.items[1].item.resource, "10.0.0.9:22");
        assert!(!report.items[1].results[0].available);
        assert_eq!(prober.seen.lock().expect("lock").len(), 3);
    }

    #[tokio::test]
    async fn resolution_failure_does_not_stop_other_items() {
        let resolver = FakeResolver::default().with("ok", &["10.0.0.1"]);
        let prober = Arc::new(FakeProber {
            open: vec!["10.0.0.1:443".parse().expect("addr")],
            ..FakeProber::default()
        });

        let engine = ProbeEngine::new(
            vec![item("missing:443"), item("ok:443")],
            Arc::new(resolver),
            prober,
            Duration::from_millis(100),
        );
        let report = engine.run_cycle().await.expect("cycle");

        assert!(matches!(
            report.items[0].resolution,
            Err(ResolveError::ResolutionFailed { .. })
        ));
        assert!(report.items[0].results.is_empty());
        assert!(report.items[1].results[0].available);
    }

    #[tokio::test]
    async fn empty_resolution_produces_no_probes() {
        let resolver = FakeResolver::default().with("empty", &[]);
        let prober = Arc::new(FakeProber::default());

        let report = probe_item(
            Arc::new(resolver),
            prober.clone(),
            Arc::new(item("empty:53")),
            Duration::from_millis(100),
        )
        .await
        .expect("probe item");

        assert_eq!(report.resolution, Ok(Vec::new()));
        assert!(report.results.is_empty());
        assert!(prober.seen.lock().expect("lock").is_empty());
    }
}
