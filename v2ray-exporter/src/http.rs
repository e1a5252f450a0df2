//! HTTP server for the Prometheus metrics endpoint.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::{Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use hyper_util::service::TowerToHyperService;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tokio_rustls::rustls::ServerConfig;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::exporter::SharedExporter;
use crate::exposition::{CONTENT_TYPE, render};
use crate::fetcher::StatFetcher;
use crate::web_config::WebSecurityConfig;

/// Application state shared across handlers.
struct AppState<F> {
    exporter: SharedExporter<F>,
    metrics_path: String,
}

impl<F> Clone for AppState<F> {
    fn clone(&self) -> Self {
        Self {
            exporter: self.exporter.clone(),
            metrics_path: self.metrics_path.clone(),
        }
    }
}

/// Create the HTTP router.
fn create_router<F: StatFetcher>(
    exporter: SharedExporter<F>,
    metrics_path: &str,
    security: Arc<WebSecurityConfig>,
) -> Router {
    let state = AppState {
        exporter,
        metrics_path: metrics_path.to_string(),
    };

    let mut router = Router::new()
        .route(metrics_path, get(metrics_handler::<F>))
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler::<F>));

    // A metrics path of "/" replaces the landing page.
    if metrics_path != "/" {
        router = router.route("/", get(landing_handler::<F>));
    }

    router
        .layer(middleware::from_fn_with_state(security, basic_auth))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Handler for the metrics endpoint.
async fn metrics_handler<F: StatFetcher>(State(state): State<AppState<F>>) -> Response {
    let descriptors = state.exporter.describe();
    let samples = state.exporter.collect().await;
    let body = render(&descriptors, &samples);

    (StatusCode::OK, [(header::CONTENT_TYPE, CONTENT_TYPE)], body).into_response()
}

/// Landing page linking to the metrics endpoint.
async fn landing_handler<F: StatFetcher>(State(state): State<AppState<F>>) -> Html<String> {
    Html(format!(
        "<html>
<head><title>V2Ray Exporter</title></head>
<body>
<h1>V2Ray Exporter</h1>
<p><a href=\"{}\">Metrics</a></p>
</body>
</html>
",
        state.metrics_path
    ))
}

/// Handler for the /health endpoint.
async fn health_handler() -> Response {
    (StatusCode::OK, "healthy\n").into_response()
}

/// Handler for the /ready endpoint.
///
/// Not ready only when the most recent stats query failed.
async fn ready_handler<F: StatFetcher>(State(state): State<AppState<F>>) -> Response {
    let status = state.exporter.status();

    match status.last_fetch_ok {
        Some(false) => (
            StatusCode::SERVICE_UNAVAILABLE,
            format!(
                "not ready - last stats query failed: {}\n",
                status.last_error.unwrap_or_default()
            ),
        )
            .into_response(),
        _ => (StatusCode::OK, "ready\n").into_response(),
    }
}

/// Reject requests without valid basic auth credentials, when configured.
async fn basic_auth(
    State(security): State<Arc<WebSecurityConfig>>,
    request: Request,
    next: Next,
) -> Response {
    let header_value = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    if security.authorize(header_value) {
        return next.run(request).await;
    }

    debug!(uri = %request.uri(), "Rejected unauthorized request");
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, "Basic")],
        "Unauthorized\n",
    )
        .into_response()
}

/// Pause after a failed accept, so descriptor exhaustion does not spin.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// HTTP server configuration.
pub struct HttpServer<F> {
    exporter: SharedExporter<F>,
    listen_addr: SocketAddr,
    metrics_path: String,
    security: WebSecurityConfig,
    tls: Option<Arc<ServerConfig>>,
}

impl<F: StatFetcher> HttpServer<F> {
    /// Create a new HTTP server.
    ///
    /// Loads the TLS certificate and key when the web config enables TLS.
    pub fn new(
        exporter: SharedExporter<F>,
        listen_addr: SocketAddr,
        metrics_path: String,
        security: WebSecurityConfig,
    ) -> Result<Self> {
        let tls = security.rustls_config()?;

        Ok(Self {
            exporter,
            listen_addr,
            metrics_path,
            security,
            tls,
        })
    }

    /// Bind the listen address.
    ///
    /// Split from [`HttpServer::serve`] so bind failures surface at startup.
    pub async fn bind(&self) -> anyhow::Result<TcpListener> {
        TcpListener::bind(self.listen_addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", self.listen_addr, e))
    }

    /// Serve on an already bound listener until the shutdown signal is received.
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        let auth = self.security.auth_enabled();
        let addr = listener.local_addr().unwrap_or(self.listen_addr);
        let router = create_router(self.exporter, &self.metrics_path, Arc::new(self.security));

        info!(
            %addr,
            path = %self.metrics_path,
            tls = self.tls.is_some(),
            auth,
            "HTTP server listening"
        );

        match self.tls {
            Some(tls) => serve_tls(listener, router, TlsAcceptor::from(tls), shutdown).await,
            None => {
                axum::serve(listener, router)
                    .with_graceful_shutdown(wait_for_shutdown(shutdown))
                    .await
                    .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))?;
            }
        }

        info!("HTTP server stopped");
        Ok(())
    }
}

/// Accept TLS connections until shutdown, one task per connection, then
/// drain the open connections.
async fn serve_tls(
    listener: TcpListener,
    router: Router,
    acceptor: TlsAcceptor,
    shutdown: watch::Receiver<bool>,
) {
    let stop = wait_for_shutdown(shutdown.clone());
    tokio::pin!(stop);
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    connections.spawn(serve_tls_connection(
                        stream,
                        peer,
                        acceptor.clone(),
                        router.clone(),
                        shutdown.clone(),
                    ));
                }
                Err(e) => {
                    warn!(error = %e, "Failed to accept connection");
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            _ = &mut stop => break,
        }
    }

    drop(listener);
    debug!(open = connections.len(), "Draining TLS connections");
    while connections.join_next().await.is_some() {}
}

async fn serve_tls_connection(
    stream: TcpStream,
    peer: SocketAddr,
    acceptor: TlsAcceptor,
    router: Router,
    shutdown: watch::Receiver<bool>,
) {
    let stream = match acceptor.accept(stream).await {
        Ok(stream) => stream,
        Err(e) => {
            debug!(%peer, error = %e, "TLS handshake failed");
            return;
        }
    };

    let builder = auto::Builder::new(TokioExecutor::new());
    let conn = builder.serve_connection(TokioIo::new(stream), TowerToHyperService::new(router));
    tokio::pin!(conn);

    let result = tokio::select! {
        result = conn.as_mut() => result,
        _ = shutdown_requested(shutdown) => {
            conn.as_mut().graceful_shutdown();
            conn.await
        }
    };

    if let Err(e) = result {
        debug!(%peer, error = %e, "Connection error");
    }
}

async fn wait_for_shutdown(shutdown: watch::Receiver<bool>) {
    shutdown_requested(shutdown).await;
    info!("HTTP server shutting down");
}

/// Resolves once the flag is set or the sender is gone.
async fn shutdown_requested(mut shutdown: watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            break;
        }
        if shutdown.changed().await.is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exporter::tests::{StaticFetcher, make_exporter};
    use crate::fetcher::RawStat;
    use axum::body::Body;
    use axum::http::Request;
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use tower::ServiceExt;

    fn router_with(fetcher: StaticFetcher, path: &str) -> Router {
        create_router(
            Arc::new(make_exporter(fetcher)),
            path,
            Arc::new(WebSecurityConfig::default()),
        )
    }

    async fn body_string(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let router = router_with(
            StaticFetcher::new(vec![RawStat::new(
                "inbound>>>socks-proxy>>>traffic>>>uplink",
                1024,
            )]),
            "/metrics",
        );

        let response = router
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers().get("content-type").unwrap();
        assert!(content_type.to_str().unwrap().contains("version=0.0.4"));

        let body = body_string(response).await;
        assert!(body.contains(
            "v2ray_traffic_uplink_bytes_total{dimension=\"inbound\",target=\"socks-proxy\"} 1024"
        ));
        assert!(body.contains("v2ray_scrape_counter 1"));
    }

    #[tokio::test]
    async fn test_metrics_endpoint_survives_fetch_failure() {
        let router = router_with(StaticFetcher::failing(), "/metrics");

        let response = router
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_string(response).await;
        assert!(body.contains("v2ray_scrape_counter 1"));
        assert!(!body.contains("bytes_total"));
    }

    #[tokio::test]
    async fn test_landing_page() {
        let router = router_with(StaticFetcher::new(Vec::new()), "/custom");

        let response = router
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_string(response).await;
        assert!(body.contains("<h1>V2Ray Exporter</h1>"));
        assert!(body.contains("href=\"/custom\""));
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let router = router_with(StaticFetcher::new(Vec::new()), "/metrics");

        let response = router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_ready_before_first_scrape() {
        let router = router_with(StaticFetcher::failing(), "/metrics");

        let response = router
            .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_not_ready_after_failed_fetch() {
        let router = router_with(StaticFetcher::failing(), "/metrics");

        let response = router
            .clone()
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = router
            .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(body_string(response).await.contains("connection refused"));
    }

    #[tokio::test]
    async fn test_custom_metrics_path() {
        let router = router_with(StaticFetcher::new(Vec::new()), "/v2ray/metrics");

        let response = router
            .clone()
            .oneshot(Request::get("/v2ray/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = router
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_basic_auth() {
        let security = WebSecurityConfig::parse(&format!(
            "basic_auth_users:\n  prometheus: '{}'\n",
            bcrypt::hash("secret", 4).unwrap()
        ))
        .unwrap();
        let router = create_router(
            Arc::new(make_exporter(StaticFetcher::new(Vec::new()))),
            "/metrics",
            Arc::new(security),
        );

        let response = router
            .clone()
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            "Basic"
        );

        let response = router
            .oneshot(
                Request::get("/metrics")
                    .header(
                        header::AUTHORIZATION,
                        format!("Basic {}", STANDARD.encode("prometheus:secret")),
                    )
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
