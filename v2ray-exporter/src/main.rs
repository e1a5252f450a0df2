//! Prometheus exporter for V2Ray traffic statistics.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};

use v2ray_exporter::{
    DescriptorRegistry, Exporter, ExporterConfig, GrpcStatFetcher, HttpServer, WebSecurityConfig,
    config::normalize_listen_address, init_tracing,
};

/// Prometheus exporter for V2Ray.
#[derive(Parser, Debug)]
#[command(name = "v2ray-exporter")]
#[command(about = "Export V2Ray traffic statistics as Prometheus metrics")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format).
    #[arg(short, long)]
    config: Option<String>,

    /// V2Ray API endpoint (overrides config).
    #[arg(long = "v2ray.endpoint")]
    v2ray_endpoint: Option<String>,

    /// Address on which to expose metrics and web interface (overrides config).
    #[arg(long = "web.listen-address")]
    listen_address: Option<String>,

    /// Path under which to expose metrics (overrides config).
    #[arg(long = "web.telemetry-path")]
    telemetry_path: Option<String>,

    /// Path to config file that can enable TLS or authentication (overrides config).
    #[arg(long = "web.config")]
    web_config: Option<String>,

    /// Log level (trace, debug, info, warn, error; overrides config).
    #[arg(long)]
    log_level: Option<String>,
}

impl Args {
    /// Apply command line overrides on top of the loaded configuration.
    fn apply(self, config: &mut ExporterConfig) {
        if let Some(endpoint) = self.v2ray_endpoint {
            config.upstream.endpoint = endpoint;
        }
        if let Some(listen) = self.listen_address {
            config.web.listen = normalize_listen_address(&listen);
        }
        if let Some(path) = self.telemetry_path {
            config.web.path = path;
        }
        if let Some(web_config) = self.web_config {
            config.web.config_file = Some(web_config);
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut args = Args::parse();

    // Load configuration
    let mut config = match args.config.take() {
        Some(path) => ExporterConfig::load_from_file(&path)
            .map_err(|e| anyhow::anyhow!("Failed to load config '{}': {}", path, e))?,
        None => ExporterConfig::default(),
    };
    args.apply(&mut config);
    config.validate()?;

    init_tracing(&config.logging)?;

    info!("Starting V2Ray Exporter");

    let security = match &config.web.config_file {
        Some(path) => WebSecurityConfig::load_from_file(path)
            .map_err(|e| anyhow::anyhow!("Failed to load web config '{}': {}", path, e))?,
        None => WebSecurityConfig::default(),
    };

    let listen_addr: SocketAddr = config
        .web
        .listen
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid listen address: {}", e))?;

    // The exporter must not serve without a working upstream connection.
    let fetcher = match GrpcStatFetcher::connect(&config.upstream).await {
        Ok(fetcher) => fetcher,
        Err(e) => {
            error!(error = %e, "Cannot reach V2Ray API");
            return Err(e.into());
        }
    };

    let registry = Arc::new(DescriptorRegistry::new(&config.metrics.namespace));
    let exporter = Arc::new(Exporter::new(
        fetcher,
        &config.metrics.namespace,
        registry,
    ));

    let http_server = HttpServer::new(
        exporter.clone(),
        listen_addr,
        config.web.path.clone(),
        security,
    )?;
    let listener = http_server.bind().await?;

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut http_task = tokio::spawn(http_server.serve(listener, shutdown_rx));

    // Wait for shutdown signal
    let outcome = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
            None
        }
        _ = terminate() => {
            info!("Received SIGTERM, shutting down...");
            None
        }
        joined = &mut http_task => Some(joined),
    };

    let result = match outcome {
        None => {
            // Signal shutdown and wait for the server to drain
            let _ = shutdown_tx.send(true);
            match tokio::time::timeout(Duration::from_secs(5), http_task).await {
                Ok(Ok(served)) => served,
                Ok(Err(e)) => Err(anyhow::anyhow!("HTTP server task failed: {}", e)),
                Err(_) => {
                    warn!("HTTP server did not drain in time");
                    Ok(())
                }
            }
        }
        // The server only stops on its own when something went wrong.
        Some(joined) => {
            let e = match joined {
                Ok(Ok(())) => anyhow::anyhow!("HTTP server exited unexpectedly"),
                Ok(Err(e)) => e,
                Err(e) => anyhow::anyhow!("HTTP server task failed: {}", e),
            };
            error!(error = %e, "HTTP server stopped");
            Err(e)
        }
    };

    let status = exporter.status();
    info!(
        scrapes = status.scrapes,
        skipped_malformed = status.skipped_malformed,
        skipped_unknown = status.skipped_unknown,
        "Final statistics"
    );

    info!("Exporter stopped");
    result
}

#[cfg(unix)]
async fn terminate() {
    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            error!(error = %e, "Failed to install SIGTERM handler");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
