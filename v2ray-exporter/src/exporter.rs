//! Scrape orchestration: fetch, decode, look up and emit.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

use crate::decoder::decode;
use crate::fetcher::StatFetcher;
use crate::registry::{DescriptorRegistry, MetricDescriptor};

/// One counter sample produced by a scrape.
#[derive(Debug, Clone, PartialEq)]
pub struct EmittedSample {
    /// Descriptor of the family the sample belongs to.
    pub descriptor: Arc<MetricDescriptor>,
    /// Label values, in the order of `descriptor.label_names`.
    pub label_values: Vec<String>,
    /// Counter value.
    pub value: f64,
}

/// Outcome of recent scrapes, readable without waiting for a running scrape.
#[derive(Debug, Clone, Default)]
pub struct ScrapeStatus {
    /// Completed scrapes.
    pub scrapes: u64,
    /// Whether the most recent fetch succeeded; `None` before the first scrape.
    pub last_fetch_ok: Option<bool>,
    /// Error message of the most recent failed fetch.
    pub last_error: Option<String>,
    /// Stats returned by the most recent fetch.
    pub last_stat_count: usize,
    /// Stats skipped so far because their name could not be decoded.
    pub skipped_malformed: u64,
    /// Stats skipped so far because their family is not registered.
    pub skipped_unknown: u64,
}

/// Bridges V2Ray stats to Prometheus samples.
///
/// Scrapes are serialized end to end: the scrape lock is held across the
/// upstream query, so at most one query is in flight and concurrent scrapes
/// queue in arrival order.
pub struct Exporter<F> {
    fetcher: F,
    namespace: String,
    registry: Arc<DescriptorRegistry>,
    scrape_counter_desc: Arc<MetricDescriptor>,
    /// Number of scrapes; guards the whole collection.
    scrape_counter: Mutex<u64>,
    status: RwLock<ScrapeStatus>,
}

impl<F: StatFetcher> Exporter<F> {
    /// Create an exporter using the given fetcher and registry.
    pub fn new(fetcher: F, namespace: &str, registry: Arc<DescriptorRegistry>) -> Self {
        let scrape_counter_desc = Arc::new(MetricDescriptor::new(
            format!("{}_scrape_counter", namespace),
            "Number of scrapes performed",
            &[],
        ));

        Self {
            fetcher,
            namespace: namespace.to_string(),
            registry,
            scrape_counter_desc,
            scrape_counter: Mutex::new(0),
            status: RwLock::new(ScrapeStatus::default()),
        }
    }

    /// Every descriptor this exporter can emit.
    pub fn describe(&self) -> Vec<Arc<MetricDescriptor>> {
        self.registry
            .descriptors()
            .cloned()
            .chain(std::iter::once(self.scrape_counter_desc.clone()))
            .collect()
    }

    /// Run one scrape.
    ///
    /// Never fails: a failed fetch yields no traffic samples, and stats that
    /// cannot be decoded or belong to an unknown family are skipped. The
    /// scrape counter sample is always emitted last.
    ///
    /// The counter is committed only once the scrape completes, so a scrape
    /// dropped while waiting on the upstream leaves it unchanged.
    pub async fn collect(&self) -> Vec<EmittedSample> {
        let mut counter = self.scrape_counter.lock().await;
        let scrapes = *counter + 1;

        let (stats, fetch_error) = match self.fetcher.fetch().await {
            Ok(stats) => (stats, None),
            Err(e) => {
                warn!(error = %e, "Failed to query V2Ray stats");
                (Vec::new(), Some(e.to_string()))
            }
        };

        let mut samples = Vec::with_capacity(stats.len() + 1);
        let mut malformed = 0u64;
        let mut unknown = 0u64;

        for stat in &stats {
            let Some(key) = decode(&stat.name) else {
                malformed += 1;
                trace!(name = %stat.name, "Skipping malformed stat name");
                continue;
            };

            let family = key.family_name(&self.namespace);
            let Some(descriptor) = self.registry.lookup(&family) else {
                unknown += 1;
                debug!(name = %stat.name, family = %family, "Skipping unknown metric family");
                continue;
            };

            samples.push(EmittedSample {
                descriptor,
                label_values: key.label_values().iter().map(|v| v.to_string()).collect(),
                value: stat.value as f64,
            });
        }

        samples.push(EmittedSample {
            descriptor: self.scrape_counter_desc.clone(),
            label_values: Vec::new(),
            value: scrapes as f64,
        });

        *counter = scrapes;
        {
            let mut status = self.status.write();
            status.scrapes = scrapes;
            status.last_fetch_ok = Some(fetch_error.is_none());
            status.last_error = fetch_error;
            status.last_stat_count = stats.len();
            status.skipped_malformed += malformed;
            status.skipped_unknown += unknown;
        }

        trace!(
            scrape = scrapes,
            stats = stats.len(),
            samples = samples.len(),
            "Scrape complete"
        );

        samples
    }

    /// Snapshot of the scrape status.
    pub fn status(&self) -> ScrapeStatus {
        self.status.read().clone()
    }
}

/// Shareable exporter handle.
pub type SharedExporter<F> = Arc<Exporter<F>>;
