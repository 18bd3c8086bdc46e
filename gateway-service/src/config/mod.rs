use crate::pipeline::audio::{
    AudioPolicy, DEFAULT_AUDIO_THRESHOLD, DEFAULT_MAX_DURATION_SECS, DEFAULT_SAMPLE_RATE,
    MIN_AUDIO_BYTES,
};
use crate::pipeline::fusion::{FusionPolicy, DEFAULT_IMAGE_QUORUM};
use crate::pipeline::image::{ImagePolicy, DEFAULT_IMAGE_THRESHOLD, DEFAULT_INPUT_SIZE};
use service_core::config::{self as core_config, get_env, get_env_parsed};
use service_core::error::AppError;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const SERVICE_NAME: &str = "gateway-service";
pub const DEFAULT_MAX_CONTENT_LENGTH: usize = 16 * 1024 * 1024;
pub const DEFAULT_REDIRECT_URL: &str = "https://cats.iku.edu.tr/portal";

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub models: ModelConfig,
    pub pipeline: PipelineConfig,
    pub http: HttpConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub upload_folder: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub image_model_path: PathBuf,
    pub audio_model_path: PathBuf,
}

/// Decision thresholds and media settings shared by both classifiers.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub image_input_size: u32,
    pub image_threshold: f32,
    pub audio_threshold: f32,
    pub image_quorum: usize,
    pub audio_sample_rate: u32,
    pub audio_duration_secs: f32,
    pub audio_min_bytes: u64,
    pub decoder_program: String,
    pub decoder_timeout_secs: u64,
    pub image_workers: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            image_input_size: DEFAULT_INPUT_SIZE,
            image_threshold: DEFAULT_IMAGE_THRESHOLD,
            audio_threshold: DEFAULT_AUDIO_THRESHOLD,
            image_quorum: DEFAULT_IMAGE_QUORUM,
            audio_sample_rate: DEFAULT_SAMPLE_RATE,
            audio_duration_secs: DEFAULT_MAX_DURATION_SECS,
            audio_min_bytes: MIN_AUDIO_BYTES,
            decoder_program: "ffmpeg".to_string(),
            decoder_timeout_secs: 30,
            image_workers: 4,
        }
    }
}

impl PipelineConfig {
    pub fn image_policy(&self) -> ImagePolicy {
        ImagePolicy {
            input_width: self.image_input_size,
            input_height: self.image_input_size,
            threshold: self.image_threshold,
            ..ImagePolicy::default()
        }
    }

    pub fn audio_policy(&self) -> AudioPolicy {
        AudioPolicy {
            threshold: self.audio_threshold,
            min_bytes: self.audio_min_bytes,
            sample_rate: self.audio_sample_rate,
            max_duration_secs: self.audio_duration_secs,
            input_size: self.image_input_size,
            ..AudioPolicy::default()
        }
    }

    pub fn fusion_policy(&self) -> FusionPolicy {
        FusionPolicy::new(self.image_quorum)
    }

    pub fn decoder_timeout(&self) -> Duration {
        Duration::from_secs(self.decoder_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        let invalid = |msg: String| Err(AppError::ConfigError(anyhow::anyhow!(msg)));

        for (name, value) in [
            ("IMAGE_THRESHOLD", self.image_threshold),
            ("AUDIO_THRESHOLD", self.audio_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return invalid(format!("{} must be within [0, 1], got {}", name, value));
            }
        }
        if self.image_input_size == 0 {
            return invalid("IMAGE_INPUT_SIZE must be positive".to_string());
        }
        if self.audio_sample_rate == 0 {
            return invalid("AUDIO_SAMPLE_RATE must be positive".to_string());
        }
        if !self.audio_duration_secs.is_finite() || self.audio_duration_secs <= 0.0 {
            return invalid(format!(
                "AUDIO_DURATION_SECS must be positive and finite, got {}",
                self.audio_duration_secs
            ));
        }
        // A zero quorum would pass every face burst.
        if self.image_quorum == 0 {
            return invalid("IMAGE_QUORUM must be at least 1".to_string());
        }
        if self.decoder_timeout_secs == 0 {
            return invalid("DECODER_TIMEOUT_SECS must be positive".to_string());
        }
        if self.image_workers == 0 {
            return invalid("IMAGE_WORKERS must be positive".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub max_content_length: usize,
    pub redirect_url: String,
}

impl GatewayConfig {
    pub fn load() -> Result<Self, AppError> {
        // Handles .env and the APP__ prefix.
        let common = core_config::Config::load()?;
        let is_prod = common.is_production();
        let defaults = PipelineConfig::default();

        let pipeline = PipelineConfig {
            image_input_size: get_env_parsed(
                "IMAGE_INPUT_SIZE",
                &defaults.image_input_size.to_string(),
                false,
            )?,
            image_threshold: get_env_parsed(
                "IMAGE_THRESHOLD",
                &defaults.image_threshold.to_string(),
                false,
            )?,
            audio_threshold: get_env_parsed(
                "AUDIO_THRESHOLD",
                &defaults.audio_threshold.to_string(),
                false,
            )?,
            image_quorum: get_env_parsed("IMAGE_QUORUM", &defaults.image_quorum.to_string(), false)?,
            audio_sample_rate: get_env_parsed(
                "AUDIO_SAMPLE_RATE",
                &defaults.audio_sample_rate.to_string(),
                false,
            )?,
            audio_duration_secs: get_env_parsed(
                "AUDIO_DURATION_SECS",
                &defaults.audio_duration_secs.to_string(),
                false,
            )?,
            audio_min_bytes: get_env_parsed(
                "AUDIO_MIN_BYTES",
                &defaults.audio_min_bytes.to_string(),
                false,
            )?,
            decoder_program: get_env("DECODER_PROGRAM", Some(defaults.decoder_program.as_str()), false)?,
            decoder_timeout_secs: get_env_parsed(
                "DECODER_TIMEOUT_SECS",
                &defaults.decoder_timeout_secs.to_string(),
                false,
            )?,
            image_workers: get_env_parsed(
                "IMAGE_WORKERS",
                &defaults.image_workers.to_string(),
                false,
            )?,
        };
        pipeline.validate()?;

        Ok(GatewayConfig {
            common,
            service_name: SERVICE_NAME.to_string(),
            log_level: get_env("LOG_LEVEL", Some("info"), false)?,
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|v| !v.is_empty()),
            database: DatabaseConfig {
                url: get_env("DATABASE_URL", Some("sqlite://access_logs.db"), is_prod)?,
                max_connections: get_env_parsed("DATABASE_MAX_CONNECTIONS", "5", false)?,
            },
            storage: StorageConfig {
                upload_folder: get_env("UPLOAD_FOLDER", Some("uploads"), is_prod)?.into(),
            },
            models: ModelConfig {
                image_model_path: get_env(
                    "IMAGE_MODEL_PATH",
                    Some("models/image_antispoof.onnx"),
                    is_prod,
                )?
                .into(),
                audio_model_path: get_env(
                    "AUDIO_MODEL_PATH",
                    Some("models/audio_antispoof.onnx"),
                    is_prod,
                )?
                .into(),
            },
            pipeline,
            http: HttpConfig {
                max_content_length: get_env_parsed(
                    "MAX_CONTENT_LENGTH",
                    &DEFAULT_MAX_CONTENT_LENGTH.to_string(),
                    false,
                )?,
                redirect_url: get_env("ACCESS_REDIRECT_URL", Some(DEFAULT_REDIRECT_URL), false)?,
            },
        })
    }
}
