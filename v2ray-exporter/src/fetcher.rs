//! Retrieval of raw stat counters from the V2Ray stats API.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tonic::transport::{Channel, Endpoint};
use tracing::{debug, info};

use crate::command::QueryStatsRequest;
use crate::command::stats_service_client::StatsServiceClient;
use crate::config::UpstreamConfig;
use crate::error::{Error, Result};

/// One upstream counter observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawStat {
    pub name: String,
    pub value: i64,
}

impl RawStat {
    pub fn new(name: impl Into<String>, value: i64) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// Errors from a single stats query.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("stats query failed: {0}")]
    Status(#[from] tonic::Status),
    #[error("stats query timed out after {0:?}")]
    Timeout(Duration),
}

/// Source of raw stat counters, queried once per scrape.
pub trait StatFetcher: Send + Sync + 'static {
    /// Fetch the current value of every counter without resetting it.
    fn fetch(&self) -> impl Future<Output = std::result::Result<Vec<RawStat>, FetchError>> + Send;
}

/// Fetcher backed by a single long-lived gRPC channel to V2Ray.
#[derive(Debug, Clone)]
pub struct GrpcStatFetcher {
    client: StatsServiceClient<Channel>,
    request_timeout: Option<Duration>,
}

impl GrpcStatFetcher {
    /// Connect to the V2Ray API.
    ///
    /// The channel is established eagerly and must come up within
    /// `connect_timeout_secs`.
    pub async fn connect(config: &UpstreamConfig) -> Result<Self> {
        let connect_timeout = Duration::from_secs(config.connect_timeout_secs);
        let uri = if config.endpoint.contains("://") {
            config.endpoint.clone()
        } else {
            format!("http://{}", config.endpoint)
        };

        let connect_error = |reason: String| Error::Connect {
            endpoint: config.endpoint.clone(),
            reason,
        };

        let endpoint = Endpoint::from_shared(uri)
            .map_err(|e| connect_error(e.to_string()))?
            .connect_timeout(connect_timeout);

        debug!(endpoint = %config.endpoint, ?connect_timeout, "Connecting to V2Ray API");

        let channel = tokio::time::timeout(connect_timeout, endpoint.connect())
            .await
            .map_err(|_| connect_error(format!("timed out after {:?}", connect_timeout)))?
            .map_err(|e| connect_error(e.to_string()))?;

        info!(endpoint = %config.endpoint, "Connected to V2Ray API");

        let request_timeout = match config.request_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        Ok(Self::from_channel(channel, request_timeout))
    }

    /// Wrap an already established channel.
    pub fn from_channel(channel: Channel, request_timeout: Option<Duration>) -> Self {
        Self {
            client: StatsServiceClient::new(channel),
            request_timeout,
        }
    }
}

impl StatFetcher for GrpcStatFetcher {
    async fn fetch(&self) -> std::result::Result<Vec<RawStat>, FetchError> {
        // Clones share the underlying channel.
        let mut client = self.client.clone();
        let request = QueryStatsRequest {
            pattern: String::new(),
            reset: false,
        };

        let response = match self.request_timeout {
            Some(timeout) => tokio::time::timeout(timeout, client.query_stats(request))
                .await
                .map_err(|_| FetchError::Timeout(timeout))??,
            None => client.query_stats(request).await?,
        };

        let stats = response
            .into_inner()
            .stat
            .into_iter()
            .map(|s| RawStat::new(s.name, s.value))
            .collect::<Vec<_>>();

        debug!(count = stats.len(), "Fetched V2Ray stats");
        Ok(stats)
    }
}
