mod common;

use common::{face_burst, submission_form, voice_clip, TestApp, TestOptions, REDIRECT_URL};
use gateway_service::pipeline::mock::MockDecoder;
use reqwest::StatusCode;
use serde_json::Value;
use uuid::Uuid;

fn session_id(body: &Value) -> Uuid {
    body["session_id"]
        .as_str()
        .and_then(|s| s.parse().ok())
        .expect("session_id missing from response")
}

#[tokio::test]
async fn quorum_met_and_real_voice_redirects() {
    let app = TestApp::spawn().await;

    let response = app
        .submit(submission_form(face_burst(6, 9), Some(voice_clip(4096))))
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["redirect"], REDIRECT_URL);

    let id = session_id(&body);
    let rows = app.db.access_log_for_session(id).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, "success");
    assert_eq!(rows[0].face_result, "REAL");
    assert_eq!(rows[0].audio_result, "REAL");
    assert!(rows[0].image_hash.is_some());
    assert!(rows[0].audio_hash.is_some());

    let session_dir = app.upload_folder.join(id.to_string());
    assert!(session_dir.join("images").join("image_0.png").exists());
    assert!(session_dir.join("audio.webm").exists());
    assert!(session_dir.join("audio_spec.png").exists());
}

#[tokio::test]
async fn quorum_missed_is_denied_with_detail() {
    let app = TestApp::spawn().await;

    let response = app
        .submit(submission_form(face_burst(4, 11), Some(voice_clip(4096))))
        .await;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "Access Denied");
    assert_eq!(body["audio_result"], "REAL");

    let labels = body["image_results"].as_array().unwrap();
    assert_eq!(labels.len(), 15);
    assert_eq!(labels.iter().filter(|l| *l == "REAL").count(), 4);
    // Submission order is preserved.
    assert_eq!(labels[0], "REAL");
    assert_eq!(labels[14], "FAKE");

    let rows = app.db.access_log_for_session(session_id(&body)).await.unwrap();
    assert_eq!(rows[0].status, "denied");
    assert_eq!(rows[0].face_result, "FAKE");
}

#[tokio::test]
async fn fake_voice_denies_despite_image_quorum() {
    let app = TestApp::spawn_with(TestOptions {
        audio_confidence: 0.6,
        ..TestOptions::default()
    })
    .await;

    let response = app
        .submit(submission_form(face_burst(10, 5), Some(voice_clip(4096))))
        .await;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["audio_result"], "FAKE");
}

#[tokio::test]
async fn tiny_clip_is_fake_without_decoding() {
    let app = TestApp::spawn().await;

    let response = app
        .submit(submission_form(face_burst(6, 0), Some(voice_clip(500))))
        .await;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["audio_result"], "FAKE");
    assert_eq!(app.decoder.calls(), 0);

    let rows = app.db.access_log_for_session(session_id(&body)).await.unwrap();
    assert!(rows[0].audio_hash.is_none());
}

#[tokio::test]
async fn broken_decoder_fails_closed() {
    let app = TestApp::spawn_with(TestOptions {
        decoder: MockDecoder::failing(),
        ..TestOptions::default()
    })
    .await;

    let response = app
        .submit(submission_form(face_burst(15, 0), Some(voice_clip(4096))))
        .await;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(app.decoder.calls(), 1);
}

#[tokio::test]
async fn empty_form_is_denied() {
    let app = TestApp::spawn().await;

    let response = app.submit(submission_form(vec![], None)).await;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["image_results"].as_array().unwrap().len(), 0);
    assert_eq!(body["audio_result"], "FAKE");
}

#[tokio::test]
async fn repeated_images_are_deduplicated_across_sessions() {
    let app = TestApp::spawn().await;
    let burst = face_burst(6, 0);

    let first = app
        .submit(submission_form(burst.clone(), Some(voice_clip(4096))))
        .await;
    let second = app
        .submit(submission_form(burst, Some(voice_clip(4096))))
        .await;

    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(second.status(), StatusCode::OK);

    let first_id = session_id(&first.json().await.unwrap());
    let second_id = session_id(&second.json().await.unwrap());
    assert_ne!(first_id, second_id);

    let first_row = &app.db.access_log_for_session(first_id).await.unwrap()[0];
    let second_row = &app.db.access_log_for_session(second_id).await.unwrap()[0];
    assert_eq!(first_row.image_hash, second_row.image_hash);

    let hash = first_row.image_hash.clone().unwrap();
    let record = app.db.file_hash(&hash).await.unwrap().unwrap();
    assert_eq!(record.session_id, first_id.to_string());
}

#[tokio::test]
async fn forwarded_for_is_logged_as_client_ip() {
    let app = TestApp::spawn().await;

    let response = reqwest::Client::new()
        .post(format!("{}/", app.address))
        .header("x-forwarded-for", "198.51.100.23, 10.0.0.2")
        .multipart(submission_form(face_burst(1, 0), Some(voice_clip(2048))))
        .send()
        .await
        .unwrap();

    let body: Value = response.json().await.unwrap();
    let rows = app.db.access_log_for_session(session_id(&body)).await.unwrap();
    assert_eq!(rows[0].ip_address.as_deref(), Some("198.51.100.23"));
}

#[tokio::test]
async fn storage_outage_is_a_logged_error() {
    let app = TestApp::spawn().await;

    tokio::fs::remove_dir_all(&app.upload_folder).await.unwrap();
    tokio::fs::write(&app.upload_folder, b"not a directory")
        .await
        .unwrap();

    let response = app
        .submit(submission_form(face_burst(6, 0), Some(voice_clip(4096))))
        .await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = response.json().await.unwrap();

    let rows = app.db.access_log_for_session(session_id(&body)).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, "error");
    assert_eq!(rows[0].face_result, "UNKNOWN");
    assert_eq!(rows[0].audio_result, "UNKNOWN");
    assert!(rows[0].error_message.is_some());
}

#[tokio::test]
async fn oversized_upload_is_rejected() {
    let app = TestApp::spawn_with(TestOptions {
        max_content_length: 4 * 1024,
        ..TestOptions::default()
    })
    .await;

    let response = app
        .submit(submission_form(face_burst(1, 0), Some(voice_clip(16 * 1024))))
        .await;

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

    let rows = app.db.access_history(10).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, "error");
    assert_eq!(rows[0].face_result, "UNKNOWN");
    assert_eq!(rows[0].audio_result, "UNKNOWN");
    assert_eq!(rows[0].ip_address.as_deref(), Some("127.0.0.1"));
    assert!(rows[0].error_message.is_some());
    assert_eq!(app.decoder.calls(), 0);
}

#[tokio::test]
async fn truncated_form_is_rejected_and_audited() {
    let app = TestApp::spawn().await;

    let body = "--XYZ\r\nContent-Disposition: form-data; name=\"images\"; filename=\"a.png\"\r\n\r\npartial";
    let response = reqwest::Client::new()
        .post(format!("{}/", app.address))
        .header("content-type", "multipart/form-data; boundary=XYZ")
        .body(body)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let rows = app.db.access_history(10).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, "error");
    assert_eq!(rows[0].face_result, "UNKNOWN");
}
