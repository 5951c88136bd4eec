use crate::{
    app::SessionHandle,
    config::{ServerConfig, SnapboothConfig},
    error::{Result, ServerError, SnapboothError},
    events::EventBus,
    storage::BucketStore,
};
use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};

use super::handlers::{
    cleanup_handler, debug_handler, gallery_handler, health_handler, public_object_handler,
    session_command_handler, session_status_handler, upload_handler,
};

/// Shared state for the Axum server
#[derive(Clone)]
pub struct ServerState {
    pub(crate) bucket: Arc<BucketStore>,
    pub(crate) config: Arc<SnapboothConfig>,
    pub(crate) event_bus: Arc<EventBus>,
    pub(crate) session: Option<SessionHandle>,
}

/// HTTP API server fronting the bucket store and the booth session
pub struct ApiServer {
    pub(crate) config: Arc<SnapboothConfig>,
    pub(crate) bucket: Arc<BucketStore>,
    pub(crate) event_bus: Arc<EventBus>,
    pub(crate) session: Option<SessionHandle>,
    cancellation_token: CancellationToken,
}

impl ApiServer {
    pub fn new(
        config: Arc<SnapboothConfig>,
        bucket: Arc<BucketStore>,
        event_bus: Arc<EventBus>,
        session: Option<SessionHandle>,
    ) -> Self {
        Self {
            config,
            bucket,
            event_bus,
            session,
            cancellation_token: CancellationToken::new(),
        }
    }

    pub fn builder() -> ApiServerBuilder {
        ApiServerBuilder::new()
    }

    /// Routes with CORS and body limit applied
    pub fn router(&self) -> Router {
        let state = ServerState {
            bucket: Arc::clone(&self.bucket),
            config: Arc::clone(&self.config),
            event_bus: Arc::clone(&self.event_bus),
            session: self.session.clone(),
        };

        Router::new()
            .route("/health", get(health_handler))
            .route("/api/upload", post(upload_handler))
            .route("/api/gallery", get(gallery_handler))
            .route("/api/cleanup", post(cleanup_handler))
            .route("/api/debug", get(debug_handler))
            .route("/api/session", get(session_status_handler))
            .route("/api/session/:action", post(session_command_handler))
            .route(
                "/storage/v1/object/public/:bucket/:file",
                get(public_object_handler),
            )
            .layer(DefaultBodyLimit::max(self.config.server.body_limit_bytes))
            .layer(cors_layer(&self.config.server))
            .with_state(state)
    }

    /// Bind and serve until [`ApiServer::stop`] is called
    pub async fn start(&self) -> Result<()> {
        let app = self.router();
        let addr = format!("{}:{}", self.config.server.ip, self.config.server.port);

        info!("Starting API server on {}", addr);

        let listener =
            tokio::net::TcpListener::bind(&addr)
                .await
                .map_err(|e| ServerError::BindFailed {
                    address: addr.clone(),
                    source: e,
                })?;

        info!("API server listening on {}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancellation_token.clone().cancelled_owned())
            .await
            .map_err(|e| ServerError::StartupFailed {
                details: format!("Server error: {}", e),
            })?;

        info!("API server stopped");
        Ok(())
    }

    pub fn stop(&self) {
        self.cancellation_token.cancel();
    }
}

/// Allow-listed origins with credentials; development mirrors any origin
fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let origins = if config.development {
        AllowOrigin::mirror_request()
    } else {
        let allowed: Vec<HeaderValue> = config
            .allowed_origins
            .iter()
            .filter_map(|origin| match origin.parse::<HeaderValue>() {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!("Ignoring invalid CORS origin: {}", origin);
                    None
                }
            })
            .collect();
        AllowOrigin::list(allowed)
    };

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}

/// API server builder for configuration
#[derive(Default)]
pub struct ApiServerBuilder {
    config: Option<Arc<SnapboothConfig>>,
    bucket: Option<Arc<BucketStore>>,
    event_bus: Option<Arc<EventBus>>,
    session: Option<SessionHandle>,
}

impl ApiServerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: Arc<SnapboothConfig>) -> Self {
        self.config = Some(config);
        self
    }

    pub fn bucket(mut self, bucket: Arc<BucketStore>) -> Self {
        self.bucket = Some(bucket);
        self
    }

    pub fn event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Expose the booth session under `/api/session`
    pub fn session(mut self, session: SessionHandle) -> Self {
        self.session = Some(session);
        self
    }

    pub fn build(self) -> Result<ApiServer> {
        let config = self.config.ok_or_else(|| {
            SnapboothError::Server(ServerError::StartupFailed {
                details: "Server configuration is required".to_string(),
            })
        })?;

        let bucket = self.bucket.ok_or_else(|| {
            SnapboothError::Server(ServerError::StartupFailed {
                details: "Bucket store is required".to_string(),
            })
        })?;

        let event_bus = self.event_bus.ok_or_else(|| {
            SnapboothError::Server(ServerError::StartupFailed {
                details: "Event bus is required".to_string(),
            })
        })?;

        Ok(ApiServer::new(config, bucket, event_bus, self.session))
    }
}
