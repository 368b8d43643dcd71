use std::time::Duration;

use axum::{
    body::{self, Body, BodyDataStream},
    http::{header, Request, StatusCode},
    Router,
};
use futures_util::StreamExt;
use serde::de::DeserializeOwned;
use tower::ServiceExt;
use vps_scan_sim::config::ScanPolicy;
use vps_scan_sim::server::{router, AppState, Status};
use vps_scan_sim::session::ScanController;
use vps_scan_sim::types::{ScanResult, ScanStatus, SessionSnapshot};

fn app() -> Router {
    let controller = ScanController::new(ScanPolicy::default()).with_seed(99);
    router(AppState::new(controller), "ui")
}

fn post_json(uri: &str, json: &str) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(json.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

async fn read_json<T: DeserializeOwned>(resp: axum::response::Response) -> T {
    let bytes = body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).expect("valid JSON body")
}

/// Read SSE chunks until the accumulated text contains `needle`.
async fn read_until(stream: &mut BodyDataStream, needle: &str) -> String {
    let mut text = String::new();
    for _ in 0..1_000 {
        let chunk = stream
            .next()
            .await
            .expect("event stream ended early")
            .unwrap();
        text.push_str(std::str::from_utf8(&chunk).unwrap());
        if text.contains(needle) {
            return text;
        }
    }
    panic!("no {needle:?} in event stream: {text}");
}

#[tokio::test(start_paused = true)]
async fn idle_status_before_any_scan() {
    let app = app();
    let resp = app.clone().oneshot(get("/api/status")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let status: Status = read_json(resp).await;
    assert_eq!(status.state, ScanStatus::Idle);
    assert!(status.session_id.is_none());

    let resp = app.clone().oneshot(get("/api/results")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    let resp = app.oneshot(get("/api/report")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
}

#[tokio::test(start_paused = true)]
async fn blank_target_is_rejected() {
    let resp = app()
        .oneshot(post_json("/api/scan", r#"{ "target": "   " }"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test(start_paused = true)]
async fn second_scan_request_returns_existing_session() {
    let app = app();
    let resp = app
        .clone()
        .oneshot(post_json("/api/scan", r#"{ "target": "https://shop.example" }"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::ACCEPTED);
    let first: Status = read_json(resp).await;
    assert_eq!(first.state, ScanStatus::Connecting);

    let resp = app
        .clone()
        .oneshot(post_json("/api/scan", r#"{ "target": "https://docs.example" }"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let second: Status = read_json(resp).await;
    assert_eq!(second.session_id, first.session_id);
    assert_eq!(second.target.as_deref(), Some("https://shop.example"));
}

#[tokio::test(start_paused = true)]
async fn completed_scan_exposes_results_and_report() {
    let app = app();
    let resp = app
        .clone()
        .oneshot(post_json("/api/scan", r#"{ "target": "https://shop.example" }"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::ACCEPTED);

    tokio::time::sleep(Duration::from_secs(15)).await;

    let resp = app.clone().oneshot(get("/api/results")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let result: ScanResult = read_json(resp).await;
    assert_eq!(result.recommended_cpu, 8);
    assert_eq!(result.recommended_ram, 16);

    let resp = app.oneshot(get("/api/report")).await.unwrap();
    let report: SessionSnapshot = read_json(resp).await;
    assert_eq!(report.status, ScanStatus::Completed);
    assert_eq!(report.chart.len(), 30);
    assert!(report.logs.iter().any(|l| l.message == "Scan completed successfully."));
}

#[tokio::test(start_paused = true)]
async fn stop_and_error_endpoints() {
    let app = app();
    app.clone()
        .oneshot(post_json("/api/scan", r#"{ "target": "example.com" }"#))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(1_500)).await;
    let stop = Request::post("/api/scan/stop").body(Body::empty()).unwrap();
    let resp = app.clone().oneshot(stop).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    let status: Status = read_json(app.clone().oneshot(get("/api/status")).await.unwrap()).await;
    assert_eq!(status.state, ScanStatus::Idle);

    // A fresh scan, failed by an external report.
    let resp = app
        .clone()
        .oneshot(post_json("/api/scan", r#"{ "target": "example.com" }"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::ACCEPTED);
    let resp = app
        .clone()
        .oneshot(post_json("/api/scan/error", r#"{ "message": "quota exceeded" }"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let report: SessionSnapshot = read_json(app.oneshot(get("/api/report")).await.unwrap()).await;
    assert_eq!(report.status, ScanStatus::Failed);
    assert_eq!(report.error.as_deref(), Some("quota exceeded"));
}

#[tokio::test(start_paused = true)]
async fn event_stream_tags_frames_with_session_and_announces_stop() {
    let app = app();
    let resp = app.clone().oneshot(get("/api/events")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let content_type = resp.headers()[header::CONTENT_TYPE].to_str().unwrap().to_string();
    assert!(content_type.starts_with("text/event-stream"), "{content_type}");
    let mut events = resp.into_body().into_data_stream();

    let resp = app
        .clone()
        .oneshot(post_json("/api/scan", r#"{ "target": "https://shop.example" }"#))
        .await
        .unwrap();
    let status: Status = read_json(resp).await;
    let session_id = status.session_id.expect("session started");

    let text = read_until(&mut events, "event: scan:progress").await;
    assert!(text.contains(&format!("id: {session_id}")), "{text}");
    assert!(text.contains("Establishing connection..."), "{text}");

    let stop = Request::post("/api/scan/stop").body(Body::empty()).unwrap();
    app.clone().oneshot(stop).await.unwrap();
    let text = read_until(&mut events, "event: scan:stopped").await;
    let tail = &text[text.rfind("event: scan:stopped").unwrap_or(0)..];
    assert!(tail.contains(&format!(r#""session_id":"{session_id}""#)), "{tail}");
    assert!(tail.contains(r#""state":"idle""#), "{tail}");

    // Stopping an idle session announces nothing further.
    let stop = Request::post("/api/scan/stop").body(Body::empty()).unwrap();
    assert_eq!(app.oneshot(stop).await.unwrap().status(), StatusCode::NO_CONTENT);
}
