//! Decoding of V2Ray stat counter names.
//!
//! V2Ray encodes the taxonomy of a counter in its name, for example
//! `inbound>>>socks-proxy>>>traffic>>>uplink`. Decoding is purely positional:
//! segment values are passed through verbatim as label values.

/// Separator between the segments of a stat name.
pub const STAT_NAME_DELIMITER: &str = ">>>";

/// Label names attached to every traffic metric, in emission order.
pub const LABEL_NAMES: [&str; 2] = ["dimension", "target"];

/// Decoded identity of a stat counter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StatKey {
    /// First segment, e.g. `inbound`, `outbound` or `user`.
    pub direction: String,
    /// Second segment, the inbound/outbound tag or user email.
    pub target: String,
    /// Third segment, e.g. `traffic`.
    pub category: String,
    /// Fourth segment, e.g. `uplink` or `downlink`.
    pub flow: String,
}

impl StatKey {
    /// Metric family this stat belongs to.
    ///
    /// Format: `{namespace}_{category}_{flow}_bytes_total`
    pub fn family_name(&self, namespace: &str) -> String {
        format!(
            "{}_{}_{}_bytes_total",
            namespace, self.category, self.flow
        )
    }

    /// Label values in the order of [`LABEL_NAMES`].
    pub fn label_values(&self) -> [&str; 2] {
        [&self.direction, &self.target]
    }
}

/// Decode a raw stat name.
///
/// Returns `None` when the name has fewer than four segments. Segments past
/// the fourth are ignored.
pub fn decode(raw: &str) -> Option<StatKey> {
    let mut parts = raw.split(STAT_NAME_DELIMITER);

    let direction = parts.next()?;
    let target = parts.next()?;
    let category = parts.next()?;
    let flow = parts.next()?;

    Some(StatKey {
        direction: direction.to_string(),
        target: target.to_string(),
        category: category.to_string(),
        flow: flow.to_string(),
    })
}
