use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::handlers;
use crate::storage::models::AssetKind;
use crate::AppState;

/// Room for multipart framing and text fields around the largest file.
const MULTIPART_OVERHEAD: usize = 1024 * 1024;

pub fn create_router(state: Arc<AppState>) -> Router {
    let upload_limit =
        state.config.upload_limits.limit(AssetKind::Video) as usize + MULTIPART_OVERHEAD;

    Router::new()
        // Assets
        .route(
            "/assets",
            post(handlers::upload_asset).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route(
            "/assets/:id",
            get(handlers::get_asset).delete(handlers::delete_asset),
        )
        .route("/assets/:id/variants", post(handlers::add_variant))
        .route("/storage/files", get(handlers::list_storage_files))
        // Streams
        .route("/streams", post(handlers::start_stream))
        .route("/streams/:id/progress", post(handlers::report_progress))
        .route("/streams/:id/finish", post(handlers::finish_stream))
        // Internal
        .route("/_internal/delivery/status", get(handlers::delivery_status))
        .route("/_internal/delivery/emergency", post(handlers::set_emergency))
        .route("/_internal/delivery/costs", post(handlers::run_cost_monitor))
        .route("/_internal/health", get(handlers::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use std::collections::BTreeMap;
    use tower::ServiceExt;

    use crate::media::Quality;
    use crate::storage::models::StoredAsset;
    use crate::testutil::test_state;

    const BOUNDARY: &str = "course-delivery-test-boundary";

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn as_viewer(
        builder: axum::http::request::Builder,
        user: &str,
        role: &str,
        tier: &str,
    ) -> axum::http::request::Builder {
        builder
            .header("x-user-id", user)
            .header("x-user-role", role)
            .header("x-subscription-tier", tier)
    }

    fn json_post(uri: &str, user: &str, role: &str, tier: &str, body: Value) -> Request<Body> {
        as_viewer(Request::post(uri), user, role, tier)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn multipart_upload(role: &str, kind: &str, file_name: &str, data: &[u8]) -> Request<Body> {
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"kind\"\r\n\r\n{kind}\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        as_viewer(Request::post("/assets"), "instructor-1", role, "premium")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn seed_video(state: &AppState, id: &str) {
        state
            .catalog
            .insert_asset(&StoredAsset {
                id: id.to_string(),
                kind: AssetKind::Video,
                file_name: "lesson.mp4".to_string(),
                mime_type: "video/mp4".to_string(),
                byte_size: 2048,
                original_key: format!("originals/{id}/lesson.mp4"),
                quality_variants: BTreeMap::from([
                    (Quality::Q480, format!("videos/{id}/480p.mp4")),
                    (Quality::Q720, format!("videos/{id}/720p.mp4")),
                ]),
                thumbnail_key: None,
                failed_variants: Vec::new(),
                uploaded_at: chrono::Utc::now(),
            })
            .unwrap();
    }

    #[tokio::test]
    async fn test_health() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_router(test_state(&dir));

        let (status, body) = send(
            &app,
            Request::get("/_internal/health").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "success");
        assert_eq!(body["data"]["status"], "ok");
    }

    #[tokio::test]
    async fn test_missing_identity_is_unauthorized() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_router(test_state(&dir));

        let request = Request::post("/streams")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"asset_id":"x"}"#))
            .unwrap();
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["status"], "fail");
    }

    #[tokio::test]
    async fn test_unknown_tier_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_router(test_state(&dir));

        let request = json_post("/streams", "u1", "student", "platinum", serde_json::json!({"asset_id": "x"}));
        let (status, _) = send(&app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_upload_document_and_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_router(test_state(&dir));

        let (status, body) = send(
            &app,
            multipart_upload("instructor", "document", "syllabus.pdf", b"%PDF-1.7 body"),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["data"]["kind"], "document");
        assert_eq!(body["data"]["mime_type"], "application/pdf");
        let id = body["data"]["id"].as_str().unwrap().to_string();
        assert_eq!(
            body["data"]["original_url"],
            format!("https://media.test/originals/{id}/syllabus.pdf")
        );

        let request = as_viewer(
            Request::get(format!("/assets/{id}")),
            "instructor-1",
            "instructor",
            "premium",
        )
        .body(Body::empty())
        .unwrap();
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["byte_size"], 13);

        let request = as_viewer(
            Request::get("/storage/files?folder=originals"),
            "instructor-1",
            "instructor",
            "premium",
        )
        .body(Body::empty())
        .unwrap();
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"][0]["key"], format!("originals/{id}"));
        assert_eq!(body["data"][0]["is_directory"], true);
    }

    #[tokio::test]
    async fn test_upload_validation_and_roles() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_router(test_state(&dir));

        let (status, _) = send(
            &app,
            multipart_upload("student", "document", "notes.pdf", b"%PDF"),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = send(
            &app,
            multipart_upload("instructor", "image", "payload.exe", b"MZ"),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["data"]["details"]["reason"], "unsupported_extension");
    }

    #[tokio::test]
    async fn test_missing_asset_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_router(test_state(&dir));

        let request = as_viewer(Request::get("/assets/missing"), "ops", "admin", "premium")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["status"], "fail");

        let request = as_viewer(Request::delete("/assets/missing"), "ops", "admin", "premium")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&app, request).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_asset_metadata_hidden_from_viewers() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir);
        seed_video(&state, "lesson-1");
        let app = create_router(Arc::clone(&state));

        let (status, body) = send(
            &app,
            Request::get("/assets/lesson-1").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body["data"]["variants"].is_null());

        let request = as_viewer(Request::get("/assets/lesson-1"), "s1", "student", "premium")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(body["data"]["variants"].is_null());
        assert!(!body.to_string().contains("https://media.test"));

        let request = as_viewer(Request::get("/assets/lesson-1"), "instructor-1", "instructor", "premium")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body["data"]["variants"]["720p"],
            "https://media.test/videos/lesson-1/720p.mp4"
        );
    }

    #[tokio::test]
    async fn test_delete_asset_removes_objects() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_router(test_state(&dir));

        let (status, body) = send(
            &app,
            multipart_upload("instructor", "document", "syllabus.pdf", b"%PDF-1.7 body"),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        let id = body["data"]["id"].as_str().unwrap().to_string();
        let stored = dir.path().join("files").join(format!("originals/{id}/syllabus.pdf"));
        assert!(stored.exists());

        let request = as_viewer(Request::delete(format!("/assets/{id}")), "s1", "student", "pro")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&app, request).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(stored.exists());

        let request = as_viewer(Request::delete(format!("/assets/{id}")), "instructor-1", "instructor", "premium")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["data"]["id"], id.as_str());
        assert_eq!(body["data"]["removed_keys"][0], format!("originals/{id}/syllabus.pdf"));
        assert!(!stored.exists());

        let request = as_viewer(Request::get(format!("/assets/{id}")), "instructor-1", "instructor", "premium")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&app, request).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_progress_is_owner_scoped_and_resigns() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir);
        seed_video(&state, "lesson-1");
        let app = create_router(Arc::clone(&state));

        let start = serde_json::json!({"asset_id": "lesson-1", "watched_seconds": 0});
        let (status, body) = send(&app, json_post("/streams", "s1", "student", "basic", start)).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        let session_id = body["data"]["session_id"].as_str().unwrap().to_string();
        let progress_uri = format!("/streams/{session_id}/progress");

        let (status, _) = send(
            &app,
            json_post(&progress_uri, "intruder", "student", "basic", serde_json::json!({"bytes_transferred": 1_000_000})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = send(
            &app,
            json_post(&progress_uri, "s1", "student", "basic", serde_json::json!({"bytes_transferred": 2048, "watched_seconds": 45})),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["data"]["quality"], "720p");
        assert_eq!(body["data"]["bytes_transferred"], 2048);
        assert_eq!(body["data"]["renewed"]["session_id"], session_id.as_str());
        let url = body["data"]["renewed"]["url"].as_str().unwrap();
        assert!(url.starts_with("https://cdn.test/videos/lesson-1/720p.mp4?token="));

        let (status, body) = send(
            &app,
            json_post(&progress_uri, "s1", "student", "basic", serde_json::json!({"bytes_transferred": 10})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["data"]["renewed"].is_null());
    }

    #[tokio::test]
    async fn test_stream_lifecycle_and_denial() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir);
        seed_video(&state, "lesson-1");
        let app = create_router(Arc::clone(&state));

        let start = serde_json::json!({"asset_id": "lesson-1", "watched_seconds": 0});
        let (status, body) = send(&app, json_post("/streams", "s1", "student", "free", start.clone())).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["data"]["quality"], "480p");
        let url = body["data"]["url"].as_str().unwrap();
        assert!(url.starts_with("https://cdn.test/videos/lesson-1/480p.mp4?token="));
        let session_id = body["data"]["session_id"].as_str().unwrap().to_string();

        // Free tier allows a single concurrent stream
        let (status, body) = send(&app, json_post("/streams", "s1", "student", "free", start.clone())).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["data"]["message"], "Maximum concurrent streams reached");
        assert_eq!(body["data"]["details"]["reason"], "concurrency_exceeded");
        assert_eq!(body["data"]["details"]["upgrade_to"], "basic");

        let (status, body) = send(
            &app,
            json_post(
                &format!("/streams/{session_id}/finish"),
                "s1",
                "student",
                "free",
                serde_json::json!({"bytes_transferred": 4096, "completed": true}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["outcome"], "completed");
        assert_eq!(body["data"]["bytes_transferred"], 4096);

        let (status, _) = send(&app, json_post("/streams", "s1", "student", "free", start)).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_emergency_toggle_requires_admin() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir);
        seed_video(&state, "lesson-1");
        let app = create_router(Arc::clone(&state));

        let (status, _) = send(
            &app,
            json_post("/_internal/delivery/emergency", "s1", "student", "pro", serde_json::json!({"active": true})),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = send(
            &app,
            json_post("/_internal/delivery/emergency", "ops", "admin", "premium", serde_json::json!({"active": true})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["active"], true);
        assert_eq!(body["data"]["changed"], true);

        let start = serde_json::json!({"asset_id": "lesson-1", "watched_seconds": 600});
        let (status, body) = send(&app, json_post("/streams", "s2", "student", "free", start)).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["data"]["details"]["reason"], "emergency_throttle");

        let (status, body) = send(
            &app,
            as_viewer(Request::get("/_internal/delivery/status"), "ops", "admin", "premium")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["emergency_active"], true);
        assert_eq!(body["data"]["signing_configured"], true);
    }

    #[tokio::test]
    async fn test_cost_monitor_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_router(test_state(&dir));

        let request = as_viewer(Request::post("/_internal/delivery/costs"), "ops", "admin", "premium")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "ok");
        assert_eq!(body["data"]["emergency_active"], false);
    }
}
