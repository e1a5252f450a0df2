//! Static registry of the metric families the exporter knows about.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::decoder::LABEL_NAMES;

/// Declaration of one exposed metric family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricDescriptor {
    /// Full metric name, including the namespace.
    pub name: String,
    /// HELP text.
    pub help: String,
    /// Variable label names, in the order label values are supplied.
    pub label_names: Vec<String>,
}

impl MetricDescriptor {
    pub fn new(name: impl Into<String>, help: impl Into<String>, label_names: &[&str]) -> Self {
        Self {
            name: name.into(),
            help: help.into(),
            label_names: label_names.iter().map(|l| l.to_string()).collect(),
        }
    }
}

/// Traffic families as `(category, flow, help)`.
const TRAFFIC_FAMILIES: &[(&str, &str, &str)] = &[
    ("traffic", "uplink", "Number of transmitted bytes"),
    ("traffic", "downlink", "Number of received bytes"),
];

/// Read-only map from family name to descriptor.
///
/// Built once at startup; lookups hand out the same `Arc` on every call.
#[derive(Debug, Clone)]
pub struct DescriptorRegistry {
    descriptors: BTreeMap<String, Arc<MetricDescriptor>>,
}

impl DescriptorRegistry {
    /// Build the registry of traffic families under `namespace`.
    pub fn new(namespace: &str) -> Self {
        let descriptors = TRAFFIC_FAMILIES
            .iter()
            .map(|(category, flow, help)| {
                let name = format!("{}_{}_{}_bytes_total", namespace, category, flow);
                let desc = MetricDescriptor::new(name.clone(), *help, &LABEL_NAMES);
                (name, Arc::new(desc))
            })
            .collect();

        Self { descriptors }
    }

    /// Look up the descriptor of a family.
    pub fn lookup(&self, family_name: &str) -> Option<Arc<MetricDescriptor>> {
        self.descriptors.get(family_name).cloned()
    }

    /// All descriptors, sorted by name.
    pub fn descriptors(&self) -> impl Iterator<Item = &Arc<MetricDescriptor>> {
        self.descriptors.values()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}
