//! Prometheus exporter for V2Ray traffic statistics.
//!
//! On every scrape the exporter queries the V2Ray stats API over gRPC,
//! decodes each counter name (`inbound>>>socks-proxy>>>traffic>>>uplink`)
//! into a metric family with `dimension` and `target` labels, and renders
//! the result in the Prometheus text format.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │  V2Ray API      │<────│    Exporter     │<────│   HTTP Server   │
//! │  (StatsService) │     │ (one at a time) │     │   (/metrics)    │
//! └─────────────────┘     └─────────────────┘     └─────────────────┘
//! ```
//!
//! # Usage
//!
//! ```bash
//! v2ray-exporter --v2ray.endpoint 127.0.0.1:10085 --web.listen-address 0.0.0.0:9110
//! ```
//!
//! # Configuration
//!
//! See [`config::ExporterConfig`] for configuration options.

pub mod config;
pub mod decoder;
pub mod error;
pub mod exporter;
pub mod exposition;
pub mod fetcher;
pub mod http;
pub mod logging;
pub mod registry;
pub mod web_config;

/// Generated V2Ray stats API.
pub mod command {
    tonic::include_proto!("v2ray.core.app.stats.command");
}

pub use config::ExporterConfig;
pub use error::{Error, Result};
pub use exporter::{EmittedSample, Exporter, ScrapeStatus, SharedExporter};
pub use fetcher::{FetchError, GrpcStatFetcher, RawStat, StatFetcher};
pub use http::HttpServer;
pub use logging::init_tracing;
pub use registry::{DescriptorRegistry, MetricDescriptor};
pub use web_config::WebSecurityConfig;
