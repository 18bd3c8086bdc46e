use thiserror::Error;

/// Why a stage could not produce a label. Every variant folds to `FAKE`.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Image decode failed: {0}")]
    ImageDecode(String),

    #[error("Classifier failed: {0}")]
    Classifier(#[from] ClassifierError),

    #[error("Audio clip missing")]
    MissingAudio,

    #[error("Audio clip too small: {size} bytes (minimum {min})")]
    AudioTooSmall { size: u64, min: u64 },

    #[error("Audio decode failed: {0}")]
    Decoder(String),

    #[error("Audio signal is empty")]
    EmptySignal,

    #[error("Spectrogram synthesis failed: {0}")]
    Spectrogram(String),

    #[error("Evidence storage failed: {0}")]
    Evidence(String),

    #[error("Worker task failed: {0}")]
    Worker(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("Failed to load model from {path}: {reason}")]
    Load { path: String, reason: String },

    #[error("Input is {got_width}x{got_height}, model expects {width}x{height}")]
    Shape {
        width: u32,
        height: u32,
        got_width: u32,
        got_height: u32,
    },

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Confidence {0} is outside [0, 1]")]
    OutOfRange(f32),
}
