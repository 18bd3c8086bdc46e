//! Common test utilities for gateway-service integration tests.

#![allow(dead_code)]

use gateway_service::config::{
    DatabaseConfig, GatewayConfig, HttpConfig, ModelConfig, PipelineConfig, StorageConfig,
    DEFAULT_MAX_CONTENT_LENGTH,
};
use gateway_service::pipeline::mock::{solid_png, MockClassifier, MockDecoder};
use gateway_service::services::metrics::init_metrics;
use gateway_service::services::Database;
use gateway_service::startup::{Application, Capabilities};
use reqwest::multipart::{Form, Part};
use service_core::config::Config as CommonConfig;
use std::path::PathBuf;
use std::sync::{Arc, Once};
use tempfile::TempDir;

pub const REDIRECT_URL: &str = "https://portal.example.org/";

static INIT: Once = Once::new();

/// Initialize tracing and the metrics recorder (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,gateway_service=debug,sqlx=warn")
            .with_test_writer()
            .try_init()
            .ok();
        init_metrics();
    });
}

pub struct TestApp {
    pub address: String,
    pub port: u16,
    pub db: Database,
    pub decoder: Arc<MockDecoder>,
    pub upload_folder: PathBuf,
    _dir: TempDir,
}

pub struct TestOptions {
    /// Confidence returned by the voice model.
    pub audio_confidence: f32,
    pub decoder: MockDecoder,
    pub max_content_length: usize,
}

impl Default for TestOptions {
    fn default() -> Self {
        Self {
            audio_confidence: 0.95,
            decoder: MockDecoder::tone(440.0, 1.0),
            max_content_length: DEFAULT_MAX_CONTENT_LENGTH,
        }
    }
}

impl TestApp {
    /// Face model scores by brightness: white frames are REAL, black FAKE.
    pub async fn spawn() -> Self {
        Self::spawn_with(TestOptions::default()).await
    }

    pub async fn spawn_with(options: TestOptions) -> Self {
        init_tracing();

        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let upload_folder = dir.path().join("uploads");

        let config = GatewayConfig {
            common: CommonConfig {
                port: 0,
                environment: "test".to_string(),
            },
            service_name: "gateway-service-test".to_string(),
            log_level: "debug".to_string(),
            otlp_endpoint: None,
            database: DatabaseConfig {
                url: format!("sqlite://{}", dir.path().join("access_logs.db").display()),
                max_connections: 4,
            },
            storage: StorageConfig {
                upload_folder: upload_folder.clone(),
            },
            models: ModelConfig {
                image_model_path: dir.path().join("unused-image.onnx"),
                audio_model_path: dir.path().join("unused-audio.onnx"),
            },
            pipeline: PipelineConfig::default(),
            http: HttpConfig {
                max_content_length: options.max_content_length,
                redirect_url: REDIRECT_URL.to_string(),
            },
        };

        let decoder = Arc::new(options.decoder);
        let capabilities = Capabilities {
            image_classifier: Arc::new(MockClassifier::mean_intensity()),
            audio_classifier: Arc::new(MockClassifier::fixed(options.audio_confidence)),
            decoder: decoder.clone(),
        };

        let app = Application::build_with(config, capabilities)
            .await
            .expect("Failed to build test application");

        let port = app.port();
        let db = app.db().clone();
        let address = format!("http://127.0.0.1:{}", port);

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        // Wait for the server to accept connections
        let client = reqwest::Client::new();
        let health_url = format!("{}/health", address);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        }

        TestApp {
            address,
            port,
            db,
            decoder,
            upload_folder,
            _dir: dir,
        }
    }

    pub async fn submit(&self, form: Form) -> reqwest::Response {
        reqwest::Client::new()
            .post(format!("{}/", self.address))
            .multipart(form)
            .send()
            .await
            .expect("Failed to execute request")
    }
}

/// `real` white frames followed by `fake` black frames, all distinct.
pub fn face_burst(real: usize, fake: usize) -> Vec<Vec<u8>> {
    let white = (0..real).map(|i| solid_png(8 + i as u32, 8, [255, 255, 255]));
    let black = (0..fake).map(|i| solid_png(8 + i as u32, 8, [0, 0, 0]));
    white.chain(black).collect()
}

pub fn voice_clip(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 256) as u8).collect()
}

pub fn submission_form(images: Vec<Vec<u8>>, audio: Option<Vec<u8>>) -> Form {
    let mut form = Form::new();
    for (i, image) in images.into_iter().enumerate() {
        form = form.part(
            "images",
            Part::bytes(image).file_name(format!("frame_{}.png", i)),
        );
    }
    if let Some(audio) = audio {
        form = form.part("audio", Part::bytes(audio).file_name("voice.webm"));
    }
    form
}
