//! Session orchestration: evidence persistence, per-modality classification,
//! fusion, and the audit write.
//!
//! Stage results are `Result<Classification, PipelineError>` and are folded
//! to labels here, in one place, with [`fail_closed`]. Only failures outside
//! the stages (the evidence folder cannot be created, an out-of-order session
//! transition) move the session to `ERROR`.

use crate::models::{
    AuditWrite, FileType, Submission, UploadedFile, Verdict, VerificationOutcome,
    VerificationSession,
};
use crate::pipeline::{
    fail_closed, AudioSpectrogramClassifier, FusionPolicy, ImageEnsembleClassifier, PipelineError,
};
use crate::services::hasher::hash_file;
use crate::services::metrics::{record_session, record_verdict};
use crate::services::{Database, EvidenceStore};
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::Instrument;
use uuid::Uuid;

#[derive(Clone)]
pub struct Verifier {
    images: ImageEnsembleClassifier,
    audio: AudioSpectrogramClassifier,
    fusion: FusionPolicy,
    evidence: EvidenceStore,
    db: Database,
    image_workers: usize,
}

impl Verifier {
    pub fn new(
        images: ImageEnsembleClassifier,
        audio: AudioSpectrogramClassifier,
        fusion: FusionPolicy,
        evidence: EvidenceStore,
        db: Database,
        image_workers: usize,
    ) -> Self {
        Self {
            images,
            audio,
            fusion,
            evidence,
            db,
            image_workers: image_workers.max(1),
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Runs one submission end to end. Always returns an outcome and always
    /// attempts exactly one access log write.
    pub async fn verify(&self, submission: Submission) -> VerificationOutcome {
        let started = Instant::now();
        let session_id = Uuid::new_v4();
        let mut session = VerificationSession::new(
            session_id,
            submission.ip_address.clone(),
            self.evidence.session_dir(session_id),
        );

        let span = tracing::info_span!(
            "verification",
            session_id = %session_id,
            images = submission.images.len(),
            audio = submission.audio.is_some(),
        );

        async {
            tracing::info!("Verification started");
            if let Err(e) = self.run(&mut session, submission).await {
                tracing::error!(error = %e, "Verification failed");
                session.fail(e.to_string());
            }
            self.settle(&mut session).await;
        }
        .instrument(span)
        .await;

        let outcome = session.into_outcome();
        record_session(outcome.status, started.elapsed());
        outcome
    }

    /// Audits a submission that could not be read off the wire. No evidence
    /// exists, so the row carries `UNKNOWN` results and `message`.
    pub async fn record_rejected(&self, ip_address: Option<String>, message: &str) -> Uuid {
        let session_id = Uuid::new_v4();
        let mut session = VerificationSession::new(
            session_id,
            ip_address,
            self.evidence.session_dir(session_id),
        );

        tracing::warn!(session_id = %session_id, error = %message, "Submission rejected");
        session.fail(message);
        self.settle(&mut session).await;
        record_session(session.status(), Duration::ZERO);
        session_id
    }

    async fn run(
        &self,
        session: &mut VerificationSession,
        submission: Submission,
    ) -> anyhow::Result<()> {
        let session_id = session.session_id();
        let dir = self.evidence.create_session_dir(session_id).await?;

        let (labels, primary_hash) = self
            .evaluate_images(session_id, &dir, submission.images)
            .await;
        session.record_images(labels, primary_hash)?;

        let (audio_label, audio_hash) = self
            .evaluate_audio(session_id, &dir, submission.audio.as_ref())
            .await;
        session.record_audio(audio_label, audio_hash)?;

        let decision = session.decide(&self.fusion)?;
        tracing::info!(
            real_images = decision.real_images,
            image_final = %decision.image_final,
            audio = %audio_label,
            final_decision = %decision.final_decision,
            "Decision made"
        );
        Ok(())
    }

    /// One label per submitted image, in submission order, plus the hash of
    /// the first image that was persisted and decoded.
    async fn evaluate_images(
        &self,
        session_id: Uuid,
        dir: &Path,
        images: Vec<UploadedFile>,
    ) -> (Vec<Verdict>, Option<String>) {
        let mut hashes = Vec::with_capacity(images.len());
        for (idx, image) in images.iter().enumerate() {
            hashes.push(self.persist_image(dir, idx, image).await);
        }

        let results = self
            .images
            .classify_batch(
                images.into_iter().map(|image| image.data).collect(),
                self.image_workers,
            )
            .await;

        let mut labels = Vec::with_capacity(results.len());
        let mut primary_hash = None;
        for (idx, (result, hash)) in results.iter().zip(hashes).enumerate() {
            let label = fail_closed(result);
            if let Err(e) = result {
                tracing::warn!(image = idx, error = %e, "Image degraded to FAKE");
            }
            record_verdict("image", label);
            labels.push(label);

            // Bytes that never decoded as an image stay out of the dedup index.
            if matches!(result, Err(PipelineError::ImageDecode(_))) {
                continue;
            }
            if let Some(hash) = hash {
                self.db
                    .log_file_hash(&hash, FileType::Image, session_id, label.as_str())
                    .await;
                if primary_hash.is_none() {
                    primary_hash = Some(hash);
                }
            }
        }

        (labels, primary_hash)
    }

    async fn persist_image(&self, dir: &Path, idx: usize, image: &UploadedFile) -> Option<String> {
        let extension = image.extension();
        let stored = self
            .evidence
            .store_image(dir, idx, extension.as_deref(), &image.data)
            .await;

        let path = match stored {
            Ok(path) => path,
            Err(e) => {
                tracing::warn!(image = idx, error = %e, "Image not persisted");
                return None;
            }
        };

        match hash_file(&path).await {
            Ok(hash) => Some(hash),
            Err(e) => {
                tracing::warn!(image = idx, error = %e, "Image not hashed");
                None
            }
        }
    }

    /// The audio label plus the clip hash. Clips under the size gate are
    /// neither hashed nor decoded.
    async fn evaluate_audio(
        &self,
        session_id: Uuid,
        dir: &Path,
        audio: Option<&UploadedFile>,
    ) -> (Verdict, Option<String>) {
        let mut hash = None;
        let result = match audio {
            None => Err(PipelineError::MissingAudio),
            Some(clip) => {
                let extension = clip.extension();
                match self
                    .evidence
                    .store_audio(dir, extension.as_deref(), &clip.data)
                    .await
                {
                    Ok(path) => {
                        if self.audio.passes_size_gate(clip.len() as u64) {
                            hash = match hash_file(&path).await {
                                Ok(h) => Some(h),
                                Err(e) => {
                                    tracing::warn!(error = %e, "Audio not hashed");
                                    None
                                }
                            };
                        }
                        self.audio.classify(&path, dir).await
                    }
                    Err(e) => Err(PipelineError::Evidence(e.to_string())),
                }
            }
        };

        let label = fail_closed(&result);
        if let Err(e) = &result {
            tracing::warn!(error = %e, "Audio degraded to FAKE");
        }
        record_verdict("audio", label);

        if let Some(hash) = &hash {
            self.db
                .log_file_hash(hash, FileType::Audio, session_id, label.as_str())
                .await;
        }
        (label, hash)
    }

    /// Writes the access log row. A decided session becomes `LOGGED` only if
    /// the write lands; a failed write never changes the decision.
    async fn settle(&self, session: &mut VerificationSession) {
        let entry = session.access_entry();
        let write = self.db.log_access(&entry).await;

        if write == AuditWrite::Recorded && !session.state().is_terminal() {
            if let Err(e) = session.mark_logged() {
                tracing::warn!(error = %e, "Session not marked as logged");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SessionStatus;
    use crate::pipeline::mock::{solid_png, MockClassifier, MockDecoder};
    use crate::pipeline::{AudioPolicy, ImagePolicy};
    use std::sync::Arc;
    use tempfile::TempDir;

    struct Harness {
        verifier: Verifier,
        decoder: Arc<MockDecoder>,
        _dir: TempDir,
    }

    async fn harness_with(audio_model: MockClassifier, decoder: MockDecoder) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("audit.db").display());
        let db = Database::connect(&url, 2).await.unwrap();
        db.run_migrations().await.unwrap();

        let decoder = Arc::new(decoder);
        let images = ImageEnsembleClassifier::new(
            Arc::new(MockClassifier::mean_intensity()),
            ImagePolicy::default(),
        );
        let audio = AudioSpectrogramClassifier::new(
            Arc::new(audio_model),
            decoder.clone(),
            AudioPolicy::default(),
        );
        let verifier = Verifier::new(
            images,
            audio,
            FusionPolicy::default(),
            EvidenceStore::new(dir.path().join("uploads")),
            db,
            4,
        );

        Harness {
            verifier,
            decoder,
            _dir: dir,
        }
    }

    async fn harness(audio_confidence: f32) -> Harness {
        harness_with(
            MockClassifier::fixed(audio_confidence),
            MockDecoder::tone(440.0, 1.0),
        )
        .await
    }

    /// `real` white frames followed by `fake` black frames. Each frame is
    /// unique so no two collide in the dedup index.
    fn burst(real: usize, fake: usize) -> Vec<UploadedFile> {
        let white = (0..real).map(|i| solid_png(8 + i as u32, 8, [255, 255, 255]));
        let black = (0..fake).map(|i| solid_png(8 + i as u32, 8, [0, 0, 0]));
        white
            .chain(black)
            .enumerate()
            .map(|(i, png)| UploadedFile::new(Some(format!("frame{}.png", i)), png))
            .collect()
    }

    fn clip(size: usize) -> UploadedFile {
        UploadedFile::new(Some("voice.webm".to_string()), vec![1u8; size])
    }

    fn submission(images: Vec<UploadedFile>, audio: Option<UploadedFile>) -> Submission {
        Submission {
            ip_address: Some("192.0.2.10".to_string()),
            images,
            audio,
        }
    }

    #[tokio::test]
    async fn scenario_a_access_granted() {
        let h = harness(0.95).await;
        let outcome = h
            .verifier
            .verify(submission(burst(6, 9), Some(clip(4096))))
            .await;

        assert_eq!(outcome.image_labels.len(), 15);
        assert_eq!(outcome.image_final, Some(Verdict::Real));
        assert_eq!(outcome.audio_label, Verdict::Real);
        assert_eq!(outcome.final_decision, Verdict::Real);
        assert_eq!(outcome.status, SessionStatus::Success);
        assert!(outcome.primary_image_hash.is_some());
        assert!(outcome.audio_hash.is_some());
    }

    #[tokio::test]
    async fn scenario_b_quorum_not_met() {
        let h = harness(0.95).await;
        let outcome = h
            .verifier
            .verify(submission(burst(4, 11), Some(clip(4096))))
            .await;

        assert_eq!(outcome.image_final, Some(Verdict::Fake));
        assert_eq!(outcome.final_decision, Verdict::Fake);
        assert_eq!(outcome.status, SessionStatus::Denied);
    }

    #[tokio::test]
    async fn scenario_c_audio_fake_denies() {
        let h = harness(0.5).await;
        let outcome = h
            .verifier
            .verify(submission(burst(10, 5), Some(clip(4096))))
            .await;

        assert_eq!(outcome.image_final, Some(Verdict::Real));
        assert_eq!(outcome.audio_label, Verdict::Fake);
        assert_eq!(outcome.final_decision, Verdict::Fake);
    }

    #[tokio::test]
    async fn scenario_d_small_clip_skips_decoder() {
        let h = harness(0.95).await;
        let outcome = h
            .verifier
            .verify(submission(burst(6, 0), Some(clip(500))))
            .await;

        assert_eq!(outcome.audio_label, Verdict::Fake);
        assert!(outcome.audio_hash.is_none());
        assert_eq!(outcome.final_decision, Verdict::Fake);
        assert_eq!(h.decoder.calls(), 0);
    }

    #[tokio::test]
    async fn scenario_e_identical_images_across_sessions() {
        let h = harness(0.95).await;
        let face = || {
            vec![UploadedFile::new(
                Some("face.png".to_string()),
                solid_png(16, 16, [255, 255, 255]),
            )]
        };

        let first = h.verifier.verify(submission(face(), Some(clip(4096)))).await;
        let second = h.verifier.verify(submission(face(), Some(clip(4096)))).await;

        assert_ne!(first.session_id, second.session_id);
        assert_eq!(first.primary_image_hash, second.primary_image_hash);
        assert_eq!(first.status, SessionStatus::Denied);
        assert_eq!(second.status, SessionStatus::Denied);

        let hash = first.primary_image_hash.unwrap();
        let record = h.verifier.database().file_hash(&hash).await.unwrap().unwrap();
        assert_eq!(record.session_id, first.session_id.to_string());

        let db = h.verifier.database();
        assert_eq!(db.access_log_for_session(first.session_id).await.unwrap().len(), 1);
        assert_eq!(db.access_log_for_session(second.session_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn corrupt_images_and_failing_decoder_fail_closed() {
        let h = harness_with(MockClassifier::fixed(0.99), MockDecoder::failing()).await;
        let mut images = burst(5, 0);
        images.push(UploadedFile::new(Some("x.jpg".to_string()), b"not an image".to_vec()));

        let outcome = h.verifier.verify(submission(images, Some(clip(4096)))).await;

        assert_eq!(outcome.image_labels.len(), 6);
        assert_eq!(outcome.image_labels[5], Verdict::Fake);
        assert_eq!(outcome.image_final, Some(Verdict::Real));
        assert_eq!(outcome.audio_label, Verdict::Fake);
        assert_eq!(outcome.final_decision, Verdict::Fake);
        assert_eq!(h.decoder.calls(), 1);
    }

    #[tokio::test]
    async fn missing_audio_is_fake() {
        let h = harness(0.99).await;
        let outcome = h.verifier.verify(submission(burst(8, 0), None)).await;
        assert_eq!(outcome.audio_label, Verdict::Fake);
        assert_eq!(outcome.status, SessionStatus::Denied);
    }

    #[tokio::test]
    async fn every_session_writes_one_access_row() {
        let h = harness(0.99).await;
        let ids = [
            h.verifier.verify(submission(burst(6, 0), Some(clip(4096)))).await.session_id,
            h.verifier.verify(submission(burst(1, 0), Some(clip(4096)))).await.session_id,
            h.verifier.verify(submission(vec![], None)).await.session_id,
        ];

        for id in ids {
            let rows = h.verifier.database().access_log_for_session(id).await.unwrap();
            assert_eq!(rows.len(), 1);
        }
        assert_eq!(h.verifier.database().access_history(10).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn unusable_evidence_root_is_a_session_error() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("audit.db").display());
        let db = Database::connect(&url, 2).await.unwrap();
        db.run_migrations().await.unwrap();

        let blocker = dir.path().join("uploads");
        tokio::fs::write(&blocker, b"file, not folder").await.unwrap();

        let decoder = Arc::new(MockDecoder::tone(440.0, 1.0));
        let verifier = Verifier::new(
            ImageEnsembleClassifier::new(
                Arc::new(MockClassifier::fixed(0.99)),
                ImagePolicy::default(),
            ),
            AudioSpectrogramClassifier::new(
                Arc::new(MockClassifier::fixed(0.99)),
                decoder,
                AudioPolicy::default(),
            ),
            FusionPolicy::default(),
            EvidenceStore::new(&blocker),
            db.clone(),
            2,
        );

        let outcome = verifier.verify(submission(burst(6, 0), Some(clip(4096)))).await;
        assert_eq!(outcome.status, SessionStatus::Error);
        assert_eq!(outcome.final_decision, Verdict::Fake);
        assert!(outcome.error_message.is_some());

        let rows = db.access_log_for_session(outcome.session_id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, "error");
        assert_eq!(rows[0].face_result, "UNKNOWN");
        assert_eq!(rows[0].audio_result, "UNKNOWN");
        assert!(rows[0].error_message.is_some());
    }

    #[tokio::test]
    async fn rejected_submission_writes_one_error_row() {
        let h = harness(0.99).await;
        let id = h
            .verifier
            .record_rejected(Some("192.0.2.44".to_string()), "body too large")
            .await;

        let rows = h.verifier.database().access_log_for_session(id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, "error");
        assert_eq!(rows[0].face_result, "UNKNOWN");
        assert_eq!(rows[0].audio_result, "UNKNOWN");
        assert_eq!(rows[0].ip_address.as_deref(), Some("192.0.2.44"));
        assert_eq!(rows[0].error_message.as_deref(), Some("body too large"));
        assert!(rows[0].image_hash.is_none());
        assert_eq!(h.decoder.calls(), 0);
    }

    #[tokio::test]
    async fn undecodable_image_is_not_indexed() {
        let h = harness(0.99).await;
        let junk = UploadedFile::new(Some("junk.jpg".to_string()), b"not an image".to_vec());
        let junk_hash = crate::services::hasher::hash_bytes(b"not an image");
        let mut images = vec![junk];
        images.extend(burst(5, 0));

        let outcome = h.verifier.verify(submission(images, Some(clip(4096)))).await;

        assert_eq!(outcome.image_labels[0], Verdict::Fake);
        assert_eq!(outcome.image_final, Some(Verdict::Real));
        assert_ne!(outcome.primary_image_hash.as_deref(), Some(junk_hash.as_str()));
        assert!(outcome.primary_image_hash.is_some());
        assert!(h.verifier.database().file_hash(&junk_hash).await.unwrap().is_none());
    }
}
