//! Verification session: one submission, its evidence folder, and its verdict.
//!
//! The session is a small state machine. Pipeline stages may only move it
//! forward in order; anything unexpected moves it to [`SessionState::Error`].

use crate::models::audit::{AccessLogEntry, UNKNOWN_RESULT};
use crate::models::verdict::Verdict;
use crate::pipeline::fusion::{FusionDecision, FusionPolicy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    ImagesEvaluated,
    AudioEvaluated,
    Decided,
    Logged,
    Error,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Logged | SessionState::Error)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Created => "CREATED",
            SessionState::ImagesEvaluated => "IMAGES_EVALUATED",
            SessionState::AudioEvaluated => "AUDIO_EVALUATED",
            SessionState::Decided => "DECIDED",
            SessionState::Logged => "LOGGED",
            SessionState::Error => "ERROR",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Success,
    Denied,
    Error,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Success => "success",
            SessionStatus::Denied => "denied",
            SessionStatus::Error => "error",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("Invalid session transition from {from} to {to}")]
    InvalidTransition { from: SessionState, to: SessionState },
}

/// What the web layer gets back for one submission.
#[derive(Debug, Clone, Serialize)]
pub struct VerificationOutcome {
    pub session_id: Uuid,
    pub final_decision: Verdict,
    pub image_final: Option<Verdict>,
    pub image_labels: Vec<Verdict>,
    pub audio_label: Verdict,
    pub primary_image_hash: Option<String>,
    pub audio_hash: Option<String>,
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Debug)]
pub struct VerificationSession {
    session_id: Uuid,
    ip_address: Option<String>,
    evidence_root: PathBuf,
    state: SessionState,
    image_labels: Vec<Verdict>,
    audio_label: Verdict,
    primary_image_hash: Option<String>,
    audio_hash: Option<String>,
    decision: Option<FusionDecision>,
    error_message: Option<String>,
}

impl VerificationSession {
    pub fn new(session_id: Uuid, ip_address: Option<String>, evidence_root: PathBuf) -> Self {
        Self {
            session_id,
            ip_address,
            evidence_root,
            state: SessionState::Created,
            image_labels: Vec::new(),
            audio_label: Verdict::Fake,
            primary_image_hash: None,
            audio_hash: None,
            decision: None,
            error_message: None,
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn evidence_root(&self) -> &PathBuf {
        &self.evidence_root
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn image_labels(&self) -> &[Verdict] {
        &self.image_labels
    }

    pub fn audio_label(&self) -> Verdict {
        self.audio_label
    }

    fn transition(&mut self, expected: SessionState, to: SessionState) -> Result<(), SessionError> {
        if self.state != expected {
            return Err(SessionError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }

    pub fn record_images(
        &mut self,
        labels: Vec<Verdict>,
        primary_image_hash: Option<String>,
    ) -> Result<(), SessionError> {
        self.transition(SessionState::Created, SessionState::ImagesEvaluated)?;
        self.image_labels = labels;
        self.primary_image_hash = primary_image_hash;
        Ok(())
    }

    pub fn record_audio(
        &mut self,
        label: Verdict,
        audio_hash: Option<String>,
    ) -> Result<(), SessionError> {
        self.transition(SessionState::ImagesEvaluated, SessionState::AudioEvaluated)?;
        self.audio_label = label;
        self.audio_hash = audio_hash;
        Ok(())
    }

    pub fn decide(&mut self, policy: &FusionPolicy) -> Result<FusionDecision, SessionError> {
        self.transition(SessionState::AudioEvaluated, SessionState::Decided)?;
        let decision = policy.fuse(&self.image_labels, self.audio_label);
        self.decision = Some(decision);
        Ok(decision)
    }

    pub fn mark_logged(&mut self) -> Result<(), SessionError> {
        self.transition(SessionState::Decided, SessionState::Logged)
    }

    /// Moves the session to `Error`. A session that is already terminal keeps
    /// its state.
    pub fn fail(&mut self, message: impl Into<String>) {
        if self.state.is_terminal() {
            return;
        }
        self.state = SessionState::Error;
        self.error_message = Some(message.into());
    }

    pub fn status(&self) -> SessionStatus {
        match (self.state, self.decision) {
            (SessionState::Error, _) | (_, None) => SessionStatus::Error,
            (_, Some(d)) if d.final_decision.is_real() => SessionStatus::Success,
            (_, Some(_)) => SessionStatus::Denied,
        }
    }

    /// Access log row for the session as it stands. Failed sessions report
    /// `UNKNOWN` per-modality results and no hashes.
    pub fn access_entry(&self) -> AccessLogEntry {
        let status = self.status();
        match (status, self.decision) {
            (SessionStatus::Error, _) | (_, None) => AccessLogEntry {
                session_id: self.session_id,
                ip_address: self.ip_address.clone(),
                face_result: UNKNOWN_RESULT.to_string(),
                audio_result: UNKNOWN_RESULT.to_string(),
                image_hash: None,
                audio_hash: None,
                status: SessionStatus::Error,
                error_message: Some(
                    self.error_message
                        .clone()
                        .unwrap_or_else(|| "verification did not complete".to_string()),
                ),
            },
            (_, Some(decision)) => AccessLogEntry {
                session_id: self.session_id,
                ip_address: self.ip_address.clone(),
                face_result: decision.image_final.as_str().to_string(),
                audio_result: self.audio_label.as_str().to_string(),
                image_hash: self.primary_image_hash.clone(),
                audio_hash: self.audio_hash.clone(),
                status,
                error_message: None,
            },
        }
    }

    pub fn into_outcome(self) -> VerificationOutcome {
        let status = self.status();
        let final_decision = match (status, self.decision) {
            (SessionStatus::Error, _) | (_, None) => Verdict::Fake,
            (_, Some(d)) => d.final_decision,
        };
        VerificationOutcome {
            session_id: self.session_id,
            final_decision,
            image_final: self.decision.map(|d| d.image_final),
            image_labels: self.image_labels,
            audio_label: self.audio_label,
            primary_image_hash: self.primary_image_hash,
            audio_hash: self.audio_hash,
            status,
            error_message: self.error_message,
        }
    }
}
