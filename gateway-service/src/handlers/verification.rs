use crate::models::{SessionStatus, Submission, UploadedFile, Verdict, VerificationOutcome};
use crate::startup::AppState;
use axum::{
    extract::{multipart::MultipartError, ConnectInfo, Multipart, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use service_core::error::AppError;
use std::net::SocketAddr;
use uuid::Uuid;

pub const IMAGES_FIELD: &str = "images";
pub const AUDIO_FIELD: &str = "audio";

#[derive(Debug, Serialize)]
pub struct GrantedResponse {
    pub redirect: String,
    pub session_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct DeniedResponse {
    pub error: &'static str,
    pub image_results: Vec<Verdict>,
    pub audio_result: Verdict,
    pub session_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct FailedResponse {
    pub error: &'static str,
    pub session_id: Uuid,
}

/// `POST /`: a face burst (`images`, repeated) and a voice clip (`audio`).
/// A form that cannot be read is still audited as a failed session.
pub async fn verify_submission(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let mut submission = Submission {
        ip_address: client_ip(&headers, connect_info.map(|ConnectInfo(addr)| addr)),
        ..Submission::default()
    };

    if let Err(e) = read_form(&mut multipart, &mut submission).await {
        let session_id = state
            .verifier
            .record_rejected(submission.ip_address.clone(), &e.body_text())
            .await;
        tracing::warn!(session_id = %session_id, error = %e, "Unreadable submission");
        return Err(multipart_error(e));
    }

    tracing::info!(
        ip = ?submission.ip_address,
        images = submission.images.len(),
        audio = submission.audio.is_some(),
        "Submission received"
    );

    let outcome = state.verifier.verify(submission).await;
    Ok(outcome_response(outcome, &state.config.http.redirect_url))
}

async fn read_form(
    multipart: &mut Multipart,
    submission: &mut Submission,
) -> Result<(), MultipartError> {
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(str::to_string);
        let data = field.bytes().await?;

        match name.as_str() {
            IMAGES_FIELD => submission.images.push(UploadedFile::new(file_name, data)),
            AUDIO_FIELD => submission.audio = Some(UploadedFile::new(file_name, data)),
            other => tracing::debug!(field = %other, "Ignoring unknown form field"),
        }
    }
    Ok(())
}

pub fn outcome_response(outcome: VerificationOutcome, redirect_url: &str) -> Response {
    match outcome.status {
        SessionStatus::Success => (
            StatusCode::OK,
            Json(GrantedResponse {
                redirect: redirect_url.to_string(),
                session_id: outcome.session_id,
            }),
        )
            .into_response(),
        SessionStatus::Denied => (
            StatusCode::FORBIDDEN,
            Json(DeniedResponse {
                error: "Access Denied",
                image_results: outcome.image_labels,
                audio_result: outcome.audio_label,
                session_id: outcome.session_id,
            }),
        )
            .into_response(),
        SessionStatus::Error => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(FailedResponse {
                error: "Verification failed",
                session_id: outcome.session_id,
            }),
        )
            .into_response(),
    }
}

/// First `X-Forwarded-For` entry, else the socket peer.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
}

fn multipart_error(e: MultipartError) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge(e.body_text())
    } else {
        AppError::BadRequest(anyhow::anyhow!("Failed to read multipart field: {}", e))
    }
}
