//! Prometheus text exposition format (version 0.0.4).

use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::Arc;

use crate::exporter::EmittedSample;
use crate::registry::MetricDescriptor;

/// Content type of the rendered output.
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Render samples grouped under their descriptors.
///
/// Families are written in name order, and only if they have samples. Samples
/// whose descriptor is not among `descriptors` are dropped.
pub fn render(descriptors: &[Arc<MetricDescriptor>], samples: &[EmittedSample]) -> String {
    let mut families: BTreeMap<&str, (&MetricDescriptor, Vec<&EmittedSample>)> = descriptors
        .iter()
        .map(|d| (d.name.as_str(), (d.as_ref(), Vec::new())))
        .collect();

    for sample in samples {
        if let Some((_, series)) = families.get_mut(sample.descriptor.name.as_str()) {
            series.push(sample);
        }
    }

    let mut output = String::with_capacity(samples.len() * 100);

    for (name, (desc, mut series)) in families {
        if series.is_empty() {
            continue;
        }

        series.sort_by(|a, b| a.label_values.cmp(&b.label_values));

        writeln!(output, "# HELP {} {}", name, escape_help(&desc.help)).ok();
        writeln!(output, "# TYPE {} counter", name).ok();

        for sample in series {
            writeln!(
                output,
                "{}{} {}",
                name,
                format_labels(&desc.label_names, &sample.label_values),
                format_value(sample.value)
            )
            .ok();
        }
    }

    output
}

/// Format labels for Prometheus exposition format.
fn format_labels(names: &[String], values: &[String]) -> String {
    if names.is_empty() {
        return String::new();
    }

    let parts: Vec<String> = names
        .iter()
        .zip(values)
        .map(|(k, v)| format!("{}=\"{}\"", k, escape_label_value(v)))
        .collect();

    format!("{{{}}}", parts.join(","))
}

/// Escape special characters in label values.
fn escape_label_value(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '"' => result.push_str("\\\""),
            '\n' => result.push_str("\\n"),
            _ => result.push(c),
        }
    }
    result
}

/// Escape HELP text. Quotes are legal there.
fn escape_help(help: &str) -> String {
    help.replace('\\', "\\\\").replace('\n', "\\n")
}

/// Format a floating point value for Prometheus.
fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value.is_sign_positive() {
            "+Inf".to_string()
        } else {
            "-Inf".to_string()
        }
    } else if value.fract() == 0.0 {
        format!("{:.0}", value)
    } else {
        format!("{}", value)
    }
}
