//! Web layer module
//!
//! The HTTP surface of the proxy: router construction, shared state,
//! middleware and handlers. Handlers are thin; the proxying itself lives
//! in `crate::proxy` and the long-lived components in `crate::services`.
//!
//! All components are built once in [`AppState::from_config`] and
//! injected into handlers through axum state. There are no global
//! singletons; tests construct the same state and router the binary
//! uses.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{get, post};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::Config;
use crate::metrics::MetricsRegistry;
use crate::services::{HostPolicy, PlaylistCache, SegmentCache, Throttler, UrlResolver};

pub mod cors;
pub mod handlers;
pub mod middleware;
pub mod responses;

// Re-export commonly used types
pub use responses::{ErrorBody, error_response};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub http_client: reqwest::Client,
    pub policy: Arc<HostPolicy>,
    pub playlist_cache: Arc<PlaylistCache>,
    pub segment_cache: Arc<SegmentCache>,
    pub throttler: Arc<Throttler>,
    pub metrics: Arc<MetricsRegistry>,
    pub resolver: Arc<UrlResolver>,
}

impl AppState {
    /// Construct every component from configuration.
    pub fn from_config(config: Config) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(config.upstream.connect_timeout)
            .pool_max_idle_per_host(8)
            .build()?;

        let resolver = UrlResolver::new(http_client.clone(), config.upstream.probe_timeout);

        Ok(Self {
            policy: Arc::new(HostPolicy::from_config(&config.policy)),
            playlist_cache: Arc::new(PlaylistCache::new(
                config.cache.playlist_ttl,
                config.cache.playlist_max_entries,
            )),
            segment_cache: Arc::new(SegmentCache::new(
                config.cache.segment_cache_enabled,
                config.cache.segment_max_entries,
                config.cache.segment_ttl,
            )),
            throttler: Arc::new(Throttler::new(&config.throttle)),
            metrics: Arc::new(MetricsRegistry::new()),
            resolver: Arc::new(resolver),
            http_client,
            config: Arc::new(config),
        })
    }

    /// Start the cache and throttler sweeps; both run until `shutdown`
    /// fires.
    pub fn spawn_sweepers(&self, shutdown: &CancellationToken) {
        let _ = Arc::clone(&self.playlist_cache)
            .spawn_sweeper(self.config.cache.sweep_interval, shutdown.clone());
        let _ = Arc::clone(&self.throttler)
            .spawn_sweeper(self.config.throttle.sweep_interval, shutdown.clone());
    }
}

/// Create the router with all routes and middleware. Tests drive this
/// exact router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/proxy/status", get(handlers::status::proxy_status))
        .route(
            "/m3u8-proxy",
            get(handlers::manifest::manifest_query).post(handlers::manifest::manifest_body),
        )
        .route("/proxy/hls", get(handlers::manifest::manifest_link))
        .route("/ts-proxy", get(handlers::segment::segment))
        .route("/sub-proxy", get(handlers::subtitle::subtitle))
        .route("/resolve", post(handlers::resolve::resolve))
        .route("/health", get(handlers::health::health_check))
        .route("/proxy/metrics", get(handlers::metrics::metrics_snapshot))
        .route(
            "/proxy/metrics/reset",
            post(handlers::metrics::reset_metrics),
        )
        .route(
            "/proxy/cache/flush",
            post(handlers::metrics::flush_playlist_cache),
        )
        .fallback(handlers::fallback)
        // Middleware (applied in reverse order): deadline innermost,
        // throttler next, CORS outermost so preflights bypass both.
        .layer(from_fn_with_state(
            state.clone(),
            middleware::timeout_middleware,
        ))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::throttle_middleware,
        ))
        .layer(from_fn(middleware::cors_middleware))
        .with_state(state)
}

/// Web server configuration and setup
pub struct WebServer {
    app: Router,
    addr: SocketAddr,
    shutdown: CancellationToken,
}

impl WebServer {
    pub fn new(config: Config, shutdown: CancellationToken) -> Result<Self> {
        let addr: SocketAddr = format!("{}:{}", config.web.host, config.web.port).parse()?;
        let state = AppState::from_config(config)?;
        state.spawn_sweepers(&shutdown);
        let app = create_router(state);
        Ok(Self {
            app,
            addr,
            shutdown,
        })
    }

    /// The address the server will bind.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Bind and serve until the shutdown token fires.
    pub async fn serve(self) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(&self.addr).await?;
        info!("listening on {}", self.addr);
        axum::serve(
            listener,
            self.app
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(self.shutdown.cancelled_owned())
        .await?;
        Ok(())
    }
}
