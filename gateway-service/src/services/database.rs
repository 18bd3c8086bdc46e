//! Audit store: append-only access log, content-hash dedup index, and the
//! legacy `logs` table.

use crate::models::{
    AccessLogEntry, AccessLogRecord, AuditWrite, ContentHashRecord, FileType, LegacyLogRecord,
};
use crate::services::metrics::record_dedup_hit;
use chrono::Utc;
use service_core::error::AppError;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens (creating if absent) the SQLite database at `database_url`.
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, AppError> {
        info!(max_connections = max_connections, "Connecting to SQLite");

        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!("Invalid DATABASE_URL: {}", e)))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("SQLite connection pool established");

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }

    /// Creates the audit tables if they do not exist.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Writes (never fail the caller)
    // -------------------------------------------------------------------------

    /// Appends one access log row for a session outcome.
    #[instrument(skip(self, entry), fields(session_id = %entry.session_id, status = %entry.status))]
    pub async fn log_access(&self, entry: &AccessLogEntry) -> AuditWrite {
        let result = sqlx::query(
            r#"
            INSERT INTO access_log
                (created_at, session_id, ip_address, face_result, audio_result,
                 image_hash, audio_hash, status, error_message)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Utc::now())
        .bind(entry.session_id.to_string())
        .bind(&entry.ip_address)
        .bind(&entry.face_result)
        .bind(&entry.audio_result)
        .bind(&entry.image_hash)
        .bind(&entry.audio_hash)
        .bind(entry.status.as_str())
        .bind(&entry.error_message)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                info!(
                    face_result = %entry.face_result,
                    audio_result = %entry.audio_result,
                    "Access logged"
                );
                AuditWrite::Recorded
            }
            Err(e) => {
                error!(error = %e, "Failed to write access log");
                AuditWrite::Failed
            }
        }
    }

    /// Records the first sighting of `file_hash` with the label the file got
    /// in that session. A repeat is a dedup hit.
    #[instrument(skip(self), fields(file_type = %file_type, session_id = %session_id))]
    pub async fn log_file_hash(
        &self,
        file_hash: &str,
        file_type: FileType,
        session_id: Uuid,
        status: &str,
    ) -> AuditWrite {
        let result = sqlx::query(
            r#"
            INSERT INTO file_hashes (file_hash, file_type, created_at, session_id, status)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(file_hash)
        .bind(file_type.as_str())
        .bind(Utc::now())
        .bind(session_id.to_string())
        .bind(status)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => AuditWrite::Recorded,
            Err(sqlx::Error::Database(ref db_err)) if db_err.is_unique_violation() => {
                warn!(file_hash = %file_hash, "Duplicate file hash detected");
                record_dedup_hit(file_type);
                AuditWrite::Duplicate
            }
            Err(e) => {
                error!(error = %e, "Failed to write file hash");
                AuditWrite::Failed
            }
        }
    }

    /// Writes a row in the legacy `logs` table.
    #[instrument(skip(self))]
    pub async fn insert_legacy_log(
        &self,
        ip: Option<&str>,
        image_result: &str,
        audio_result: &str,
        folder_hash: Option<&str>,
    ) -> Result<i64, AppError> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            r#"
            INSERT INTO logs (ip, image_result, audio_result, timestamp, folder_hash, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(ip)
        .bind(image_result)
        .bind(audio_result)
        .bind(&now)
        .bind(folder_hash)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Most recent access log rows, newest first.
    #[instrument(skip(self))]
    pub async fn access_history(&self, limit: i64) -> Result<Vec<AccessLogRecord>, AppError> {
        let rows = sqlx::query_as::<_, AccessLogRecord>(
            r#"
            SELECT id, created_at, session_id, ip_address, face_result, audio_result,
                   image_hash, audio_hash, status, error_message
            FROM access_log
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    #[instrument(skip(self), fields(session_id = %session_id))]
    pub async fn access_log_for_session(
        &self,
        session_id: Uuid,
    ) -> Result<Vec<AccessLogRecord>, AppError> {
        let rows = sqlx::query_as::<_, AccessLogRecord>(
            r#"
            SELECT id, created_at, session_id, ip_address, face_result, audio_result,
                   image_hash, audio_hash, status, error_message
            FROM access_log
            WHERE session_id = ?
            ORDER BY id
            "#,
        )
        .bind(session_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    #[instrument(skip(self))]
    pub async fn file_hash(&self, file_hash: &str) -> Result<Option<ContentHashRecord>, AppError> {
        let row = sqlx::query_as::<_, ContentHashRecord>(
            r#"
            SELECT id, file_hash, file_type, created_at, session_id, status
            FROM file_hashes
            WHERE file_hash = ?
            "#,
        )
        .bind(file_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    #[instrument(skip(self))]
    pub async fn recent_legacy_logs(&self, limit: i64) -> Result<Vec<LegacyLogRecord>, AppError> {
        let rows = sqlx::query_as::<_, LegacyLogRecord>(
            r#"
            SELECT id, ip, image_result, audio_result, timestamp, folder_hash, created_at
            FROM logs
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SessionStatus;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;
    use tracing_subscriber::fmt::MakeWriter;

    async fn test_db() -> (Database, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("audit.db").display());
        let db = Database::connect(&url, 2).await.unwrap();
        db.run_migrations().await.unwrap();
        (db, dir)
    }

    fn entry(session_id: Uuid, status: SessionStatus) -> AccessLogEntry {
        AccessLogEntry {
            session_id,
            ip_address: Some("10.1.2.3".to_string()),
            face_result: "REAL".to_string(),
            audio_result: "FAKE".to_string(),
            image_hash: Some("aa".repeat(32)),
            audio_hash: None,
            status,
            error_message: None,
        }
    }

    #[tokio::test]
    async fn access_log_round_trip() {
        let (db, _dir) = test_db().await;
        let id = Uuid::new_v4();

        assert_eq!(db.log_access(&entry(id, SessionStatus::Denied)).await, AuditWrite::Recorded);

        let rows = db.access_log_for_session(id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].session_id, id.to_string());
        assert_eq!(rows[0].status, "denied");
        assert_eq!(rows[0].face_result, "REAL");
        assert!(rows[0].audio_hash.is_none());
    }

    #[tokio::test]
    async fn access_history_is_newest_first_and_limited() {
        let (db, _dir) = test_db().await;
        let ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        for id in &ids {
            db.log_access(&entry(*id, SessionStatus::Success)).await;
        }

        let rows = db.access_history(2).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].session_id, ids[2].to_string());
        assert_eq!(rows[1].session_id, ids[1].to_string());
    }

    #[tokio::test]
    async fn duplicate_hash_is_detected_not_fatal() {
        let (db, _dir) = test_db().await;
        let hash = "ab".repeat(32);
        let first = Uuid::new_v4();

        let w1 = db
            .log_file_hash(&hash, FileType::Image, first, "REAL")
            .await;
        let w2 = db
            .log_file_hash(&hash, FileType::Image, Uuid::new_v4(), "FAKE")
            .await;

        assert_eq!(w1, AuditWrite::Recorded);
        assert_eq!(w2, AuditWrite::Duplicate);

        let record = db.file_hash(&hash).await.unwrap().unwrap();
        assert_eq!(record.session_id, first.to_string());
        assert_eq!(record.file_type, "image");
        assert_eq!(record.status, "REAL");
    }

    #[tokio::test]
    async fn unknown_hash_is_none() {
        let (db, _dir) = test_db().await;
        assert!(db.file_hash("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn audit_tables_are_append_only() {
        let (db, _dir) = test_db().await;
        let id = Uuid::new_v4();
        db.log_access(&entry(id, SessionStatus::Success)).await;
        db.log_file_hash("cd", FileType::Audio, id, "REAL").await;

        let update = sqlx::query("UPDATE access_log SET status = 'success'")
            .execute(db.pool())
            .await;
        assert!(update.is_err());

        let delete = sqlx::query("DELETE FROM file_hashes").execute(db.pool()).await;
        assert!(delete.is_err());

        assert_eq!(db.access_log_for_session(id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn legacy_logs_round_trip() {
        let (db, _dir) = test_db().await;
        db.insert_legacy_log(Some("1.1.1.1"), "REAL", "FAKE", Some("folder"))
            .await
            .unwrap();

        let rows = db.recent_legacy_logs(10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].ip.as_deref(), Some("1.1.1.1"));
        assert_eq!(rows[0].audio_result.as_deref(), Some("FAKE"));
    }

    #[tokio::test]
    async fn write_to_closed_pool_is_swallowed() {
        let (db, _dir) = test_db().await;
        db.pool().close().await;
        let write = db.log_access(&entry(Uuid::new_v4(), SessionStatus::Success)).await;
        assert_eq!(write, AuditWrite::Failed);
    }

    /// Formatted log output captured for the current thread.
    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Captured {
        type Writer = Captured;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    fn capture() -> (Captured, tracing::subscriber::DefaultGuard) {
        let captured = Captured::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(captured.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::INFO)
            .finish();
        let guard = tracing::subscriber::set_default(subscriber);
        (captured, guard)
    }

    #[tokio::test]
    async fn storage_failure_logs_error_and_dedup_logs_warning() {
        let (db, _dir) = test_db().await;
        let (captured, _guard) = capture();
        let hash = "cd".repeat(32);

        db.log_file_hash(&hash, FileType::Audio, Uuid::new_v4(), "REAL").await;
        db.log_file_hash(&hash, FileType::Audio, Uuid::new_v4(), "REAL").await;
        let dedup = captured.text();
        assert!(dedup.contains("WARN"));
        assert!(dedup.contains("Duplicate file hash detected"));
        assert!(!dedup.contains("ERROR"));

        db.pool().close().await;
        let write = db.log_file_hash(&"ef".repeat(32), FileType::Image, Uuid::new_v4(), "FAKE").await;
        let access = db.log_access(&entry(Uuid::new_v4(), SessionStatus::Denied)).await;
        assert_eq!(write, AuditWrite::Failed);
        assert_eq!(access, AuditWrite::Failed);

        let failures = captured.text();
        assert!(failures.contains("ERROR"));
        assert!(failures.contains("Failed to write file hash"));
        assert!(failures.contains("Failed to write access log"));
    }
}
