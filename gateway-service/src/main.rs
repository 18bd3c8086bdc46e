use gateway_service::config::GatewayConfig;
use gateway_service::services::metrics::init_metrics;
use gateway_service::startup::Application;
use service_core::observability::init_tracing;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    // Recorder must exist before any metric is emitted.
    init_metrics();

    let config = GatewayConfig::load().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        std::io::Error::other(format!("Configuration error: {}", e))
    })?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );

    tracing::info!(
        environment = %config.common.environment,
        upload_folder = %config.storage.upload_folder.display(),
        image_quorum = config.pipeline.image_quorum,
        image_threshold = config.pipeline.image_threshold,
        audio_threshold = config.pipeline.audio_threshold,
        "Starting gateway"
    );

    let application = Application::build(config).await.map_err(|e| {
        tracing::error!("Failed to build application: {}", e);
        std::io::Error::other(format!("Startup error: {}", e))
    })?;

    application.run_until_stopped().await
}
