//! Decoding of arbitrary client audio containers to raw PCM.

use crate::pipeline::error::PipelineError;
use crate::services::executor::CommandExecutor;
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::Path;

/// Turns an encoded clip into little-endian `f32` PCM at the requested rate
/// and channel count, written to `output`. At most `max_duration_secs` of
/// signal is decoded.
#[async_trait]
pub trait AudioDecoder: Send + Sync {
    async fn decode(
        &self,
        input: &Path,
        output: &Path,
        sample_rate: u32,
        channels: u16,
        max_duration_secs: f32,
    ) -> Result<(), PipelineError>;
}

/// Decoder backed by an `ffmpeg` binary.
#[derive(Debug, Clone)]
pub struct FfmpegDecoder {
    program: String,
    executor: CommandExecutor,
}

impl FfmpegDecoder {
    pub fn new(program: impl Into<String>, executor: CommandExecutor) -> Self {
        Self {
            program: program.into(),
            executor,
        }
    }
}

/// Command line for a bounded decode to raw `f32le`. `-t` on the output side
/// stops ffmpeg once the window is written.
pub fn ffmpeg_args(
    input: &Path,
    output: &Path,
    sample_rate: u32,
    channels: u16,
    max_duration_secs: f32,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = ["-y", "-v", "error", "-i"]
        .into_iter()
        .map(OsString::from)
        .collect();
    args.push(input.as_os_str().to_owned());
    args.extend(
        [
            "-t".to_string(),
            format!("{:.3}", max_duration_secs),
            "-ar".to_string(),
            sample_rate.to_string(),
            "-ac".to_string(),
            channels.to_string(),
            "-f".to_string(),
            "f32le".to_string(),
            "-acodec".to_string(),
            "pcm_f32le".to_string(),
        ]
        .into_iter()
        .map(OsString::from),
    );
    args.push(output.as_os_str().to_owned());
    args
}

#[async_trait]
impl AudioDecoder for FfmpegDecoder {
    async fn decode(
        &self,
        input: &Path,
        output: &Path,
        sample_rate: u32,
        channels: u16,
        max_duration_secs: f32,
    ) -> Result<(), PipelineError> {
        let args = ffmpeg_args(input, output, sample_rate, channels, max_duration_secs);

        self.executor
            .execute(&self.program, args.as_slice())
            .await
            .map_err(|e| PipelineError::Decoder(e.to_string()))?;

        match tokio::fs::metadata(output).await {
            Ok(meta) if meta.len() > 0 => Ok(()),
            Ok(_) => Err(PipelineError::EmptySignal),
            Err(_) => Err(PipelineError::Decoder(format!(
                "{} produced no output",
                self.program
            ))),
        }
    }
}
