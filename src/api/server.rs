//! API server setup and shared state.

use axum::extract::Request;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::Span;

use crate::api::routes;
use crate::config::AppConfig;
use crate::downloader::{
    DownloadError, MediaExtractor, ProgressTracker, RenditionResolver, StagingArea,
    TransferExecutor, YtDlpExtractor,
};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Server start time for uptime calculation
    pub start_time: Instant,
    pub extractor: Arc<dyn MediaExtractor>,
    pub resolver: Arc<RenditionResolver>,
    pub executor: Arc<TransferExecutor>,
    pub tracker: ProgressTracker,
    pub staging: StagingArea,
    /// Cadence of progress events
    pub progress_interval: Duration,
}

impl AppState {
    /// Wire every component around one extractor
    pub fn new(extractor: Arc<dyn MediaExtractor>, staging: StagingArea, config: &AppConfig) -> Self {
        let tracker = ProgressTracker::new(config.eviction_grace);
        let resolver = RenditionResolver::new(
            extractor.clone(),
            config.allowed_hosts.clone(),
            config.resolve_timeout,
        );
        let executor = TransferExecutor::new(
            extractor.clone(),
            tracker.clone(),
            staging.clone(),
            config.allowed_hosts.clone(),
        );

        Self {
            start_time: Instant::now(),
            extractor,
            resolver: Arc::new(resolver),
            executor: Arc::new(executor),
            tracker,
            staging,
            progress_interval: config.progress_interval,
        }
    }

    /// Production state backed by yt-dlp
    pub async fn from_config(config: &AppConfig) -> Result<Self, DownloadError> {
        let extractor = YtDlpExtractor::new(
            config.extractor_mode,
            config.ytdlp_path.as_deref(),
            &config.python,
        )
        .with_admission(config.max_processes, config.admission_timeout);
        let staging = StagingArea::create(&config.staging_dir, config.staged_file_ttl).await?;
        Ok(Self::new(Arc::new(extractor), staging, config))
    }

    /// Allow-list used to normalize progress queries
    pub fn allowed_hosts(&self) -> &[String] {
        self.resolver.allowed_hosts()
    }
}

/// API server.
pub struct ApiServer {
    config: AppConfig,
    state: AppState,
    cancel_token: CancellationToken,
}

impl ApiServer {
    pub fn new(config: AppConfig, state: AppState) -> Self {
        Self {
            config,
            state,
            cancel_token: CancellationToken::new(),
        }
    }

    /// Get the cancellation token for graceful shutdown.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Build the router with all middleware and routes.
    pub fn build_router(&self) -> Router {
        let mut router = routes::create_router(self.state.clone());

        if self.config.enable_cors {
            let cors = CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any);
            router = router.layer(cors);
        }

        router.layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &Request| {
                    if req.uri().path().starts_with("/api/health") {
                        Span::none()
                    } else {
                        let mut make_span =
                            tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO);
                        use tower_http::trace::MakeSpan;
                        make_span.make_span(req)
                    }
                })
                .on_request(|req: &Request, span: &Span| {
                    if span.is_disabled() {
                        return;
                    }
                    let mut on_request =
                        tower_http::trace::DefaultOnRequest::new().level(tracing::Level::INFO);
                    use tower_http::trace::OnRequest;
                    on_request.on_request(req, span);
                })
                .on_response(
                    |res: &axum::http::Response<_>, latency: Duration, span: &Span| {
                        if span.is_disabled() {
                            return;
                        }
                        let on_response =
                            tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO);
                        use tower_http::trace::OnResponse;
                        on_response.on_response(res, latency, span);
                    },
                ),
        )
    }

    /// Start the server.
    pub async fn run(&self) -> anyhow::Result<()> {
        let addr: SocketAddr = self
            .config
            .socket_address()
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid address {}: {}", self.config.socket_address(), e))?;

        let router = self.build_router();
        let listener = TcpListener::bind(addr).await?;

        tracing::info!("API server listening on http://{}", addr);

        let cancel_token = self.cancel_token.clone();
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                cancel_token.cancelled().await;
                tracing::info!("API server shutting down...");
            })
            .await?;

        Ok(())
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }
}
