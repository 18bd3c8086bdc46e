use service_core::error::AppError;
use std::path::{Path, PathBuf};
use tokio::fs;
use uuid::Uuid;

/// Container extensions kept verbatim for uploaded audio.
pub const AUDIO_EXTENSIONS: [&str; 4] = ["webm", "ogg", "wav", "mp3"];
pub const DEFAULT_AUDIO_EXTENSION: &str = "webm";
pub const DEFAULT_IMAGE_EXTENSION: &str = "jpg";

/// Per-session evidence folders under a single base directory. Each session
/// gets `<base>/<session_id>/` with uploaded images in `images/`.
#[derive(Debug, Clone)]
pub struct EvidenceStore {
    base_path: PathBuf,
}

impl EvidenceStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn session_dir(&self, session_id: Uuid) -> PathBuf {
        self.base_path.join(session_id.to_string())
    }

    pub async fn create_session_dir(&self, session_id: Uuid) -> Result<PathBuf, AppError> {
        let dir = self.session_dir(session_id);
        fs::create_dir_all(dir.join("images")).await.map_err(|e| {
            AppError::StorageError(anyhow::anyhow!(
                "Failed to create evidence folder {}: {}",
                dir.display(),
                e
            ))
        })?;
        Ok(dir)
    }

    /// Writes `images/image_{index}.{ext}` and returns its path.
    pub async fn store_image(
        &self,
        session_dir: &Path,
        index: usize,
        extension: Option<&str>,
        data: &[u8],
    ) -> Result<PathBuf, AppError> {
        let ext = extension
            .filter(|e| !e.is_empty() && e.chars().all(|c| c.is_ascii_alphanumeric()))
            .unwrap_or(DEFAULT_IMAGE_EXTENSION);
        let path = session_dir
            .join("images")
            .join(format!("image_{}.{}", index, ext));
        write(&path, data).await?;
        Ok(path)
    }

    /// Writes `audio.{ext}` and returns its path.
    pub async fn store_audio(
        &self,
        session_dir: &Path,
        extension: Option<&str>,
        data: &[u8],
    ) -> Result<PathBuf, AppError> {
        let path = session_dir.join(format!("audio.{}", audio_extension(extension)));
        write(&path, data).await?;
        Ok(path)
    }
}

async fn write(path: &Path, data: &[u8]) -> Result<(), AppError> {
    fs::write(path, data).await.map_err(|e| {
        AppError::StorageError(anyhow::anyhow!("Failed to write {}: {}", path.display(), e))
    })
}

pub fn audio_extension(extension: Option<&str>) -> &'static str {
    extension
        .and_then(|ext| {
            AUDIO_EXTENSIONS
                .iter()
                .find(|known| known.eq_ignore_ascii_case(ext))
        })
        .copied()
        .unwrap_or(DEFAULT_AUDIO_EXTENSION)
}
