use crate::config::GatewayConfig;
use crate::handlers;
use crate::pipeline::{
    AudioDecoder, AudioSpectrogramClassifier, Classifier, FfmpegDecoder, ImageEnsembleClassifier,
    OnnxClassifier,
};
use crate::services::{CommandExecutor, Database, EvidenceStore};
use crate::verifier::Verifier;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::{metrics_middleware, request_id_middleware};
use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// The injected inference and decoding capabilities. Loaded once and shared
/// by every session.
#[derive(Clone)]
pub struct Capabilities {
    pub image_classifier: Arc<dyn Classifier>,
    pub audio_classifier: Arc<dyn Classifier>,
    pub decoder: Arc<dyn AudioDecoder>,
}

impl Capabilities {
    /// Loads both ONNX models. Any failure here aborts startup.
    pub fn load(config: &GatewayConfig) -> Result<Self, AppError> {
        let size = config.pipeline.image_input_size;
        let load = |path: &std::path::Path| {
            OnnxClassifier::load(path, size, size).map_err(|e| {
                tracing::error!(model_path = %path.display(), error = %e, "Failed to load model");
                AppError::ConfigError(anyhow::anyhow!(e))
            })
        };

        let image_classifier = load(config.models.image_model_path.as_path())?;
        let audio_classifier = load(config.models.audio_model_path.as_path())?;
        let decoder = FfmpegDecoder::new(
            config.pipeline.decoder_program.clone(),
            CommandExecutor::new(config.pipeline.decoder_timeout()),
        );

        Ok(Self {
            image_classifier: Arc::new(image_classifier),
            audio_classifier: Arc::new(audio_classifier),
            decoder: Arc::new(decoder),
        })
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: GatewayConfig,
    pub db: Database,
    pub verifier: Verifier,
}

type Server = Pin<Box<dyn Future<Output = std::io::Result<()>> + Send>>;

pub struct Application {
    port: u16,
    server: Server,
    state: AppState,
}

impl Application {
    pub async fn build(config: GatewayConfig) -> Result<Self, AppError> {
        let capabilities = Capabilities::load(&config)?;
        Self::build_with(config, capabilities).await
    }

    pub async fn build_with(
        config: GatewayConfig,
        capabilities: Capabilities,
    ) -> Result<Self, AppError> {
        let db = Database::connect(&config.database.url, config.database.max_connections)
            .await
            .map_err(|e| {
                tracing::error!("Failed to connect to database: {}", e);
                e
            })?;
        db.run_migrations().await?;

        tokio::fs::create_dir_all(&config.storage.upload_folder)
            .await
            .map_err(|e| {
                tracing::error!(
                    "Failed to create upload folder {}: {}",
                    config.storage.upload_folder.display(),
                    e
                );
                AppError::StorageError(anyhow::anyhow!(e))
            })?;

        let pipeline = &config.pipeline;
        let verifier = Verifier::new(
            ImageEnsembleClassifier::new(capabilities.image_classifier, pipeline.image_policy()),
            AudioSpectrogramClassifier::new(
                capabilities.audio_classifier,
                capabilities.decoder,
                pipeline.audio_policy(),
            ),
            pipeline.fusion_policy(),
            EvidenceStore::new(&config.storage.upload_folder),
            db.clone(),
            pipeline.image_workers,
        );

        let state = AppState {
            config: config.clone(),
            db,
            verifier,
        };

        let app = router(state.clone());

        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind TCP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(port = port, "Gateway listening");

        let server = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal());

        Ok(Self {
            port,
            server: Box::pin(server.into_future()),
            state,
        })
    }

    pub fn db(&self) -> &Database {
        &self.state.db
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        self.server.await
    }
}

pub fn router(state: AppState) -> Router {
    let body_limit = state.config.http.max_content_length;

    Router::new()
        .route("/", post(handlers::verify_submission))
        .route("/access-log", get(handlers::access_history))
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics_endpoint))
        .route_layer(middleware::from_fn(metrics_middleware))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
