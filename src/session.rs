use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ScanPolicy;
use crate::profile;
use crate::telemetry::{self, MAX_TICK};
use crate::types::{
    ChartPoint, LogEntry, LogType, ScanEvent, ScanMetrics, ScanResult, ScanStatus,
    SessionSnapshot, TargetProfile,
};

/// Receiver of a session's event stream. Called synchronously from the timer loop
/// while the session lock is held, so it must not block.
pub trait EventSink: Send + 'static {
    fn emit(&mut self, session_id: &str, event: ScanEvent);
}

/// A per-session channel already knows its session.
impl EventSink for mpsc::UnboundedSender<ScanEvent> {
    fn emit(&mut self, _session_id: &str, event: ScanEvent) {
        // A dropped receiver only means nobody is watching.
        let _ = self.send(event);
    }
}

pub type EventStream = mpsc::UnboundedReceiver<ScanEvent>;

/// Identifies one started session for `stop` and `fail`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionHandle {
    id: String,
}

impl SessionHandle {
    pub fn id(&self) -> &str {
        &self.id
    }
}

struct Session {
    id: String,
    target: String,
    cancel: CancellationToken,
    state: Mutex<SessionState>,
}

struct SessionState {
    session_id: String,
    status: ScanStatus,
    tick: u8,
    step: String,
    profile: TargetProfile,
    rng: StdRng,
    sink: Option<Box<dyn EventSink>>,
    metrics: ScanMetrics,
    logs: Vec<LogEntry>,
    chart: Vec<ChartPoint>,
    result: Option<ScanResult>,
    error: Option<String>,
    next_log: u64,
}

impl SessionState {
    fn emit(&mut self, event: ScanEvent) {
        if let Some(sink) = self.sink.as_mut() {
            sink.emit(&self.session_id, event);
        }
    }

    fn push_log(&mut self, kind: LogType, message: String) {
        let id = format!("{}-{}", self.session_id, self.next_log);
        self.next_log += 1;
        let entry = telemetry::log_entry(id, kind, message);
        self.logs.push(entry.clone());
        self.emit(ScanEvent::Log(entry));
    }

    /// Leave the active states. Dropping the sink ends the stream for its consumer.
    fn close(&mut self, status: ScanStatus) {
        self.status = status;
        self.sink = None;
    }
}

impl Session {
    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn status(&self) -> ScanStatus {
        self.lock().status
    }

    fn handle(&self) -> SessionHandle {
        SessionHandle {
            id: self.id.clone(),
        }
    }

    /// Connection setup finished; returns false if the session was stopped meanwhile.
    fn begin_scanning(&self) -> bool {
        let mut guard = self.lock();
        let st = &mut *guard;
        if st.status != ScanStatus::Connecting {
            return false;
        }
        st.status = ScanStatus::Scanning;
        st.push_log(
            LogType::Info,
            format!("Connection established to {}", self.target),
        );
        debug!(session = %self.id, "scanning");
        true
    }

    /// One timer fire. Returns false once the loop must end.
    fn advance(&self, policy: &ScanPolicy) -> bool {
        let mut guard = self.lock();
        let st = &mut *guard;
        if st.status != ScanStatus::Scanning {
            return false;
        }

        st.tick = st.tick.saturating_add(1).min(MAX_TICK);
        let tick = st.tick;
        st.step = telemetry::step_label(tick, &policy.steps).to_string();
        let step = st.step.clone();
        st.emit(ScanEvent::Progress { percent: tick, step });

        if let Some((kind, message)) = telemetry::log_line(&mut st.rng, policy.log_probability) {
            st.push_log(kind, message);
        }

        let metrics = telemetry::derive_metrics(tick, &st.profile, policy.burst_multiplier, &mut st.rng);
        st.metrics = metrics;
        st.emit(ScanEvent::Metrics(metrics));

        let point = telemetry::chart_point(&metrics, &mut st.rng);
        st.chart.push(point.clone());
        st.emit(ScanEvent::Chart(point));

        if tick < MAX_TICK {
            return true;
        }

        let result = telemetry::final_result(&st.profile, &mut st.rng);
        st.push_log(LogType::Success, telemetry::COMPLETED_MESSAGE.to_string());
        st.result = Some(result);
        st.emit(ScanEvent::Result(result));
        st.close(ScanStatus::Completed);
        info!(
            session = %self.id,
            cpu = result.recommended_cpu,
            ram_gb = result.recommended_ram,
            disk_gb = result.recommended_disk,
            confidence = result.confidence_score,
            "scan completed"
        );
        false
    }

    /// Returns the session to idle if it is still active. Terminal sessions are left untouched.
    fn stop(&self) -> bool {
        let mut st = self.lock();
        if !st.status.is_active() {
            return false;
        }
        st.close(ScanStatus::Idle);
        self.cancel.cancel();
        info!(session = %self.id, tick = st.tick, "scan stopped");
        true
    }

    fn fail(&self, message: String) {
        let mut guard = self.lock();
        let st = &mut *guard;
        if !st.status.is_active() {
            return;
        }
        st.push_log(LogType::Error, message.clone());
        st.error = Some(message.clone());
        st.emit(ScanEvent::Error { message });
        st.close(ScanStatus::Failed);
        self.cancel.cancel();
        warn!(session = %self.id, error = ?st.error, "scan failed");
    }

    fn snapshot(&self) -> SessionSnapshot {
        let st = self.lock();
        SessionSnapshot {
            id: self.id.clone(),
            target: self.target.clone(),
            status: st.status,
            progress: st.tick,
            step: st.step.clone(),
            profile: st.profile,
            metrics: st.metrics,
            logs: st.logs.clone(),
            chart: st.chart.clone(),
            result: st.result,
            error: st.error.clone(),
        }
    }
}

async fn run_timer_loop(session: Arc<Session>, policy: Arc<ScanPolicy>) {
    let cancel = session.cancel.clone();

    tokio::select! {
        biased;
        _ = cancel.cancelled() => return,
        _ = time::sleep(policy.connect_delay()) => {}
    }
    if !session.begin_scanning() {
        return;
    }

    let period = policy.tick_interval();
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        if !session.advance(&policy) {
            break;
        }
    }
    debug!(session = %session.id, "timer loop finished");
}

/// Owns the single scan session and its timer loop.
///
/// Cloning yields another handle to the same controller.
#[derive(Clone)]
pub struct ScanController {
    policy: Arc<ScanPolicy>,
    seed: Option<u64>,
    current: Arc<Mutex<Option<Arc<Session>>>>,
    started: Arc<AtomicU64>,
}

impl ScanController {
    pub fn new(policy: ScanPolicy) -> Self {
        Self {
            policy: Arc::new(policy),
            seed: None,
            current: Arc::new(Mutex::new(None)),
            started: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Draw all randomness from generators seeded with `seed` (offset per session).
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn policy(&self) -> &ScanPolicy {
        &self.policy
    }

    fn lock_current(&self) -> MutexGuard<'_, Option<Arc<Session>>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a scan of `target`, delivering its events to `sink`.
    ///
    /// Returns `None` without touching any state while another session is
    /// connecting or scanning. Must be called from within a Tokio runtime.
    pub fn start(&self, target: &str, sink: impl EventSink) -> Option<SessionHandle> {
        let mut current = self.lock_current();
        if let Some(active) = current.as_ref().filter(|s| s.status().is_active()) {
            debug!(session = %active.id, url = %target, "scan already active; start ignored");
            return None;
        }

        let n = self.started.fetch_add(1, Ordering::Relaxed);
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(n)),
            None => StdRng::from_os_rng(),
        };
        let profile = profile::select_profile(target, &self.policy.keywords, &mut rng);

        let id = Uuid::new_v4().to_string();
        let mut state = SessionState {
            session_id: id.clone(),
            status: ScanStatus::Connecting,
            tick: 0,
            step: telemetry::CONNECTING_STEP.to_string(),
            profile,
            rng,
            sink: Some(Box::new(sink)),
            metrics: ScanMetrics::default(),
            logs: Vec::new(),
            chart: Vec::new(),
            result: None,
            error: None,
            next_log: 0,
        };
        state.emit(ScanEvent::Progress {
            percent: 0,
            step: telemetry::CONNECTING_STEP.to_string(),
        });

        let session = Arc::new(Session {
            id,
            target: target.to_string(),
            cancel: CancellationToken::new(),
            state: Mutex::new(state),
        });
        info!(session = %session.id, url = %target, class = ?profile.class, "scan started");

        tokio::spawn(run_timer_loop(session.clone(), self.policy.clone()));
        let handle = session.handle();
        *current = Some(session);
        Some(handle)
    }

    /// Like [`start`](Self::start), with an unbounded channel as the sink.
    ///
    /// The stream ends after the terminal event, or right after `stop`.
    pub fn start_stream(&self, target: &str) -> Option<(SessionHandle, EventStream)> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.start(target, tx).map(|h| (h, rx))
    }

    /// Cancel the session if it is still running. Safe to call repeatedly or after completion;
    /// no event reaches the sink once this returns.
    ///
    /// Returns true only when this call moved an active session back to idle.
    pub fn stop(&self, handle: &SessionHandle) -> bool {
        self.find(handle).is_some_and(|session| session.stop())
    }

    /// Report an external failure into the session. Emits a terminal `Error` event if it was active.
    pub fn fail(&self, handle: &SessionHandle, message: impl Into<String>) {
        if let Some(session) = self.find(handle) {
            session.fail(message.into());
        }
    }

    /// Handle of the most recently started session.
    pub fn current(&self) -> Option<SessionHandle> {
        self.lock_current().as_ref().map(|s| s.handle())
    }

    pub fn status(&self) -> ScanStatus {
        self.lock_current()
            .as_ref()
            .map(|s| s.status())
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> Option<SessionSnapshot> {
        self.lock_current().as_ref().map(|s| s.snapshot())
    }

    pub fn sessions_started(&self) -> u64 {
        self.started.load(Ordering::Relaxed)
    }

    fn find(&self, handle: &SessionHandle) -> Option<Arc<Session>> {
        self.lock_current()
            .as_ref()
            .filter(|s| s.id == handle.id)
            .cloned()
    }
}
