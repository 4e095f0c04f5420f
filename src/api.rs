//! ==============================================================================
//! api.rs - http control surface
//! ==============================================================================
//!
//! routes:
//!     GET  /api/control   current ControlSnapshot
//!     POST /api/control   {"mode": "auto"|"manual", "manual_on": bool}
//!     GET  /api/reading   last accepted reading (404 before the first one)
//!     GET  /api/live      server-sent events, one LiveEvent per message
//!
//! handlers only read snapshots and request mode changes; the relay belongs to
//! the control loop.
//!
//! ==============================================================================

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use crate::domain::{ControlSnapshot, Reading};
use crate::error::ApiError;
use crate::live::LiveBroadcaster;
use crate::state::ControlState;

#[derive(Clone)]
pub struct ApiState {
    pub control: Arc<ControlState>,
    pub live: LiveBroadcaster,
}

#[derive(Debug, Deserialize)]
pub struct ControlRequest {
    /// omitted: keep the current mode
    pub mode: Option<String>,
    pub manual_on: Option<bool>,
}

pub fn router(api: ApiState) -> Router {
    Router::new()
        .route("/api/control", get(get_control).post(post_control))
        .route("/api/reading", get(get_reading))
        .route("/api/live", get(live_stream))
        .layer(CorsLayer::permissive())
        .with_state(api)
}

pub async fn run_server(bind: &str, api: ApiState, shutdown: CancellationToken) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {}", bind))?;
    tracing::info!("API listening on http://{}", bind);
    axum::serve(listener, router(api))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("web server error")?;
    Ok(())
}

async fn get_control(State(api): State<ApiState>) -> Json<ControlSnapshot> {
    Json(api.control.get_snapshot().await)
}

async fn post_control(
    State(api): State<ApiState>,
    Json(request): Json<ControlRequest>,
) -> Result<Json<ControlSnapshot>, ApiError> {
    let mode = match request.mode {
        Some(mode) => mode,
        None => api.control.get_snapshot().await.mode.as_str().to_string(),
    };
    let snapshot = api.control.request_mode(&mode, request.manual_on).await?;
    tracing::info!(mode = %snapshot.mode, manual_on = snapshot.manual_on, "control request accepted");
    Ok(Json(snapshot))
}

async fn get_reading(State(api): State<ApiState>) -> Result<Json<Reading>, ApiError> {
    api.control
        .get_snapshot()
        .await
        .last_reading
        .map(Json)
        .ok_or(ApiError::NoReading)
}

async fn live_stream(State(api): State<ApiState>) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    tracing::debug!("live subscriber connected ({} total)", api.live.subscriber_count() + 1);
    let stream = api.live.subscribe().map(|event| Event::default().json_data(event));
    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{LiveEvent, Transition, TransitionReason};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chrono::Utc;
    use tower::ServiceExt;

    fn api() -> ApiState {
        ApiState {
            control: Arc::new(ControlState::new()),
            live: LiveBroadcaster::new(8),
        }
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post(body: &'static str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/control")
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn test_get_control_defaults() {
        let response = router(api())
            .oneshot(Request::get("/api/control").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["mode"], "auto");
        assert_eq!(json["relay_on"], false);
        assert!(json["last_reading"].is_null());
    }

    #[tokio::test]
    async fn test_post_manual() {
        let api = api();
        let response = router(api.clone())
            .oneshot(post(r#"{"mode": "manual", "manual_on": true}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["mode"], "manual");
        assert_eq!(json["manual_on"], true);
        // the loop drives the relay, not the handler
        assert_eq!(json["relay_on"], false);
    }

    #[tokio::test]
    async fn test_post_without_mode_keeps_mode() {
        let api = api();
        api.control.request_mode("manual", Some(false)).await.unwrap();
        let response = router(api.clone()).oneshot(post(r#"{"manual_on": true}"#)).await.unwrap();
        let json = json_body(response).await;
        assert_eq!(json["mode"], "manual");
        assert_eq!(json["manual_on"], true);
    }

    #[tokio::test]
    async fn test_post_invalid_mode_is_rejected() {
        let api = api();
        let before = api.control.get_snapshot().await;
        let response = router(api.clone())
            .oneshot(post(r#"{"mode": "turbo", "manual_on": true}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = json_body(response).await;
        assert_eq!(json["error"]["code"], 400);
        assert!(json["error"]["message"].as_str().unwrap().contains("turbo"));
        assert_eq!(api.control.get_snapshot().await, before);
    }

    #[tokio::test]
    async fn test_reading_not_found_before_first_sample() {
        let response = router(api())
            .oneshot(Request::get("/api/reading").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_live_stream_delivers_events() {
        let api = api();
        let response = router(api.clone())
            .oneshot(Request::get("/api/live").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "text/event-stream");
        assert_eq!(api.live.subscriber_count(), 1);

        api.live.publish(LiveEvent::Transition(Transition {
            timestamp: Utc::now(),
            previous_relay_on: false,
            new_relay_on: true,
            reason: TransitionReason::Manual,
        }));

        let mut body = response.into_body().into_data_stream();
        let frame = tokio::time::timeout(Duration::from_secs(1), body.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let text = String::from_utf8(frame.to_vec()).unwrap();
        assert!(text.starts_with("data: "));
        assert!(text.contains(r#""type":"transition""#));
        assert!(text.contains(r#""reason":"manual""#));
    }
}
