use crate::models::session::SessionStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

/// Result recorded for a modality that was never evaluated.
pub const UNKNOWN_RESULT: &str = "UNKNOWN";

/// Modality tag of a row in the dedup index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Image,
    Audio,
    Face,
}

impl FileType {
    pub fn as_str(self) -> &'static str {
        match self {
            FileType::Image => "image",
            FileType::Audio => "audio",
            FileType::Face => "face",
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FileType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "image" => Ok(FileType::Image),
            "audio" => Ok(FileType::Audio),
            "face" => Ok(FileType::Face),
            _ => Err(format!("Invalid file type: {}", s)),
        }
    }
}

/// Access log row to be appended for one session outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessLogEntry {
    pub session_id: Uuid,
    pub ip_address: Option<String>,
    pub face_result: String,
    pub audio_result: String,
    pub image_hash: Option<String>,
    pub audio_hash: Option<String>,
    pub status: SessionStatus,
    pub error_message: Option<String>,
}

/// A row from the `access_log` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct AccessLogRecord {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub session_id: String,
    pub ip_address: Option<String>,
    pub face_result: String,
    pub audio_result: String,
    pub image_hash: Option<String>,
    pub audio_hash: Option<String>,
    pub status: String,
    pub error_message: Option<String>,
}

/// A row from the `file_hashes` dedup index.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ContentHashRecord {
    pub id: i64,
    pub file_hash: String,
    pub file_type: String,
    pub created_at: DateTime<Utc>,
    pub session_id: String,
    pub status: String,
}

/// A row from the legacy `logs` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct LegacyLogRecord {
    pub id: i64,
    pub ip: Option<String>,
    pub image_result: Option<String>,
    pub audio_result: Option<String>,
    pub timestamp: Option<String>,
    pub folder_hash: Option<String>,
    pub created_at: Option<String>,
}

/// Outcome of an audit write. Writes never fail the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditWrite {
    Recorded,
    /// The hash was already present in the dedup index.
    Duplicate,
    Failed,
}
