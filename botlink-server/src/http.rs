//! HTTP surface.
//!
//! ```text
//! GET  /video_feed    multipart/x-mixed-replace MJPEG relay
//! GET  /api/status    command channel status (JSON)
//! POST /api/command   connect / disconnect / send / press / release
//! GET  /health        liveness probe
//! ```

use axum::body::Body;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use tracing::{debug, error};

use botlink_core::encode_part;
use botlink_core::multipart::CONTENT_TYPE;

use crate::app::{AppState, CommandRequest, CommandResponse};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/video_feed", get(video_feed))
        .route("/api/status", get(status))
        .route("/api/command", post(command))
        .route("/health", get(health))
        .with_state(state)
}

/// Each viewer gets its own subscriber; dropping the body (client gone)
/// drops the subscriber, which the broadcaster prunes on the next frame.
async fn video_feed(State(state): State<AppState>) -> Response {
    let subscriber = state.subscribe();
    debug!(viewer = ?subscriber.id(), "video viewer attached");

    let parts = subscriber.into_stream().map(|frame| encode_part(&frame));

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, CONTENT_TYPE)
        .header(header::CACHE_CONTROL, "no-cache, no-store, must-revalidate")
        .header(header::PRAGMA, "no-cache")
        .body(Body::from_stream(parts))
        .unwrap_or_else(|e| {
            error!("failed to build video response: {e}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        })
}

async fn status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.status())
}

async fn command(
    State(state): State<AppState>,
    Json(req): Json<CommandRequest>,
) -> Json<CommandResponse> {
    Json(state.handle_command(req).await)
}

async fn health() -> &'static str {
    "OK"
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axum::http::Request;
    use botlink_core::{Frame, StatusSnapshot};
    use bytes::Bytes;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use crate::app::ResponseStatus;
    use crate::config::RelayConfig;

    fn state() -> AppState {
        AppState::new(RelayConfig::default()).unwrap()
    }

    async fn body_bytes(resp: Response) -> Bytes {
        resp.into_body().collect().await.unwrap().to_bytes()
    }

    #[tokio::test]
    async fn health_says_ok() {
        let resp = router(state())
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_bytes(resp).await.as_ref(), b"OK");
    }

    #[tokio::test]
    async fn status_reports_disconnected() {
        let resp = router(state())
            .oneshot(Request::get("/api/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let snapshot: StatusSnapshot = serde_json::from_slice(&body_bytes(resp).await).unwrap();
        assert!(!snapshot.connected);
        assert_eq!(snapshot.total_commands, 0);
        assert!(snapshot.current_time > 0);
    }

    #[tokio::test]
    async fn command_while_disconnected_is_an_error_body() {
        let req = Request::post("/api/command")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"command":"forward","button_id":"fwd"}"#))
            .unwrap();
        let resp = router(state()).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body: CommandResponse = serde_json::from_slice(&body_bytes(resp).await).unwrap();
        assert_eq!(body.status, ResponseStatus::Error);
        assert_eq!(body.message.as_deref(), Some("Not connected to robot"));
        assert_eq!(body.status_info.failed_commands, 1);
    }

    #[tokio::test]
    async fn malformed_command_body_is_rejected() {
        let req = Request::post("/api/command")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"button_id":"fwd"}"#))
            .unwrap();
        let resp = router(state()).oneshot(req).await.unwrap();
        assert!(resp.status().is_client_error());
    }

    #[tokio::test]
    async fn video_feed_streams_published_frames() {
        let state = state();
        let resp = router(state.clone())
            .oneshot(Request::get("/video_feed").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers()[header::CONTENT_TYPE],
            "multipart/x-mixed-replace; boundary=frame"
        );
        assert_eq!(state.broadcaster().subscriber_count(), 1);

        let jpeg = Bytes::from_static(b"\xff\xd8\xff\xe0pic\xff\xd9");
        state.broadcaster().publish(Frame::new(0, jpeg));

        let mut body = resp.into_body();
        let chunk = tokio::time::timeout(Duration::from_secs(5), body.frame())
            .await
            .expect("timeout")
            .expect("body ended")
            .unwrap()
            .into_data()
            .unwrap();
        assert_eq!(
            chunk.as_ref(),
            b"--frame\r\nContent-Type: image/jpeg\r\n\r\n\xff\xd8\xff\xe0pic\xff\xd9\r\n"
        );

        // Closing the broadcaster ends the response.
        state.broadcaster().close();
        let rest = tokio::time::timeout(Duration::from_secs(5), body.collect())
            .await
            .expect("timeout")
            .unwrap()
            .to_bytes();
        assert!(rest.is_empty());
    }
}
