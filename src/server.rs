use std::{convert::Infallible, path::Path, time::Duration};

use anyhow::Result;
use axum::{
    extract::State,
    http::{header, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    routing::{get, post},
    Json, Router,
};
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::{services::ServeDir, set_header::SetResponseHeaderLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::{
    session::{EventSink, ScanController},
    types::{ScanEvent, ScanStatus, SessionEvent},
};

/// Buffered events per SSE subscriber before it starts lagging.
const EVENT_BUFFER: usize = 1024;

/// What SSE subscribers receive: session events, plus a notice when a scan is stopped.
#[derive(Debug, Clone)]
enum Frame {
    Scan(SessionEvent),
    Stopped(StopNotice),
}

#[derive(Debug, Clone, Serialize)]
struct StopNotice {
    session_id: String,
    state: ScanStatus,
}

/// Tags each event with its session before fanning it out to SSE subscribers.
struct BroadcastSink(broadcast::Sender<Frame>);

impl EventSink for BroadcastSink {
    fn emit(&mut self, session_id: &str, event: ScanEvent) {
        // No subscribers is not an error.
        let _ = self.0.send(Frame::Scan(SessionEvent {
            session_id: session_id.to_string(),
            event,
        }));
    }
}

#[derive(Clone)]
pub struct AppState {
    controller: ScanController,
    events: broadcast::Sender<Frame>, // every session emits here; SSE clients subscribe
}

impl AppState {
    pub fn new(controller: ScanController) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self { controller, events }
    }

    pub fn controller(&self) -> &ScanController {
        &self.controller
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Status {
    pub state: ScanStatus,
    pub progress: u8,
    pub step: String,
    pub target: Option<String>,
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ScanRequest {
    pub target: String,
}

#[derive(Debug, Deserialize)]
pub struct FailRequest {
    pub message: String,
}

/// Build the API router, with static UI files served from `ui_dir` as the fallback.
pub fn router(state: AppState, ui_dir: impl AsRef<Path>) -> Router {
    let api = Router::new()
        .route("/status", get(get_status))
        .route("/scan", post(post_scan))
        .route("/scan/stop", post(post_stop))
        .route("/scan/error", post(post_error))
        .route("/results", get(get_results))
        .route("/report", get(get_report))
        .route("/events", get(get_events))
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .with_state(state);

    let static_svc = ServeDir::new(ui_dir.as_ref()).append_index_html_on_directories(true);

    Router::new()
        .nest("/api", api)
        .fallback_service(static_svc)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}

pub async fn spawn_server(bind: &str, controller: ScanController, ui_dir: &Path) -> Result<()> {
    let app = router(AppState::new(controller), ui_dir);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(%bind, ui_dir = %ui_dir.display(), "serving scanner API");
    axum::serve(listener, app).await?;
    Ok(())
}

fn current_status(app: &AppState) -> Status {
    match app.controller.snapshot() {
        Some(s) => Status {
            state: s.status,
            progress: s.progress,
            step: s.step,
            target: Some(s.target),
            session_id: Some(s.id),
        },
        None => Status {
            state: ScanStatus::Idle,
            progress: 0,
            step: "Waiting to start...".into(),
            target: None,
            session_id: None,
        },
    }
}

async fn get_status(State(app): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(current_status(&app)))
}

async fn get_results(State(app): State<AppState>) -> impl IntoResponse {
    match app.controller.snapshot().and_then(|s| s.result) {
        Some(res) => (StatusCode::OK, Json(res)).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

async fn get_report(State(app): State<AppState>) -> impl IntoResponse {
    let Some(mut snap) = app.controller.snapshot() else {
        return StatusCode::NO_CONTENT.into_response();
    };
    let window = app.controller.policy().chart_window;
    snap.chart = snap.chart_window(window).to_vec();
    (StatusCode::OK, Json(snap)).into_response()
}

async fn post_scan(State(app): State<AppState>, Json(req): Json<ScanRequest>) -> impl IntoResponse {
    let target = req.target.trim();
    if target.is_empty() {
        return (StatusCode::BAD_REQUEST, "target must not be empty").into_response();
    }

    // An active scan is left alone; the caller just gets its status back.
    let code = match app.controller.start(target, BroadcastSink(app.events.clone())) {
        Some(_) => StatusCode::ACCEPTED,
        None => StatusCode::OK,
    };
    (code, Json(current_status(&app))).into_response()
}

async fn post_stop(State(app): State<AppState>) -> impl IntoResponse {
    if let Some(handle) = app.controller.current() {
        if app.controller.stop(&handle) {
            let _ = app.events.send(Frame::Stopped(StopNotice {
                session_id: handle.id().to_string(),
                state: ScanStatus::Idle,
            }));
        }
    }
    StatusCode::NO_CONTENT
}

async fn post_error(State(app): State<AppState>, Json(req): Json<FailRequest>) -> impl IntoResponse {
    if let Some(handle) = app.controller.current() {
        app.controller.fail(&handle, req.message);
    }
    StatusCode::NO_CONTENT
}

async fn get_events(
    State(app): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>> + Send + 'static> {
    let mut rx = app.events.subscribe();
    let stream = async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(frame) => yield Ok(sse_event(&frame)),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "SSE subscriber lagging; events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    };
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keepalive"),
    )
}

/// One SSE frame, with the session id as the SSE `id` field.
fn sse_event(frame: &Frame) -> Event {
    let (name, session_id) = match frame {
        Frame::Scan(ev) => (event_name(&ev.event), ev.session_id.as_str()),
        Frame::Stopped(notice) => ("scan:stopped", notice.session_id.as_str()),
    };
    let event = Event::default().event(name).id(session_id);
    let event = match frame {
        Frame::Scan(ev) => event.json_data(ev),
        Frame::Stopped(notice) => event.json_data(notice),
    };
    event.unwrap_or_else(|_| Event::default().event(name).data("{}"))
}

fn event_name(ev: &ScanEvent) -> &'static str {
    match ev {
        ScanEvent::Progress { .. } => "scan:progress",
        ScanEvent::Log(_) => "scan:log",
        ScanEvent::Metrics(_) => "scan:metrics",
        ScanEvent::Chart(_) => "scan:chart",
        ScanEvent::Result(_) => "scan:done",
        ScanEvent::Error { .. } => "scan:error",
    }
}
