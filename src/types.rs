use serde::{Deserialize, Serialize};

/// Traffic class a target was sorted into by keyword containment.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProfileClass {
    Heavy,
    Static,
    Unknown,
}

/// Baseline resource figures derived once per session from the target string.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetProfile {
    pub class: ProfileClass,
    pub base_cpu_cores: u32,
    pub base_ram_gb: u32,
    pub base_disk_gb: u32,
    pub base_daily_traffic: u64,
}

/// Point-in-time resource estimate, recomputed every tick.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct ScanMetrics {
    pub cpu_cores: f64,
    pub ram_gb: f64,
    pub disk_gb: f64,
    pub daily_bandwidth_gb: f64,
    pub monthly_bandwidth_gb: f64,
    pub requests_per_second: f64,
    pub estimated_daily_visitors: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogType {
    Info,
    Metrics,
    Error,
    Success,
}

/// One line of the session log. Insertion order is display order.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub id: String,
    pub timestamp: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: LogType,
}

/// One sample of the live request chart.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ChartPoint {
    pub time: String,
    pub requests: f64,
    pub bandwidth: f64,
}

/// Final sizing recommendation, produced once per completed session.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanResult {
    pub recommended_cpu: u32,
    pub recommended_ram: u32,
    pub recommended_disk: u32,
    pub max_daily_traffic: u64,
    pub confidence_score: u8,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    #[default]
    Idle,
    Connecting,
    Scanning,
    Completed,
    Failed,
}

impl ScanStatus {
    /// A session in this state owns a running timer loop.
    pub fn is_active(self) -> bool {
        matches!(self, ScanStatus::Connecting | ScanStatus::Scanning)
    }
}

/// Everything a session reports, in emission order, through one subscription.
///
/// `Result` and `Error` are terminal: nothing follows them on the same stream.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ScanEvent {
    Progress { percent: u8, step: String },
    Log(LogEntry),
    Metrics(ScanMetrics),
    Chart(ChartPoint),
    Result(ScanResult),
    Error { message: String },
}

impl ScanEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ScanEvent::Result(_) | ScanEvent::Error { .. })
    }
}

/// An event tagged with the session that emitted it, for streams shared across sessions.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SessionEvent {
    pub session_id: String,
    #[serde(flatten)]
    pub event: ScanEvent,
}

/// Read-only copy of a session for display and export.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub id: String,
    pub target: String,
    pub status: ScanStatus,
    pub progress: u8,
    pub step: String,
    pub profile: TargetProfile,
    pub metrics: ScanMetrics,
    pub logs: Vec<LogEntry>,
    pub chart: Vec<ChartPoint>,
    pub result: Option<ScanResult>,
    pub error: Option<String>,
}

impl SessionSnapshot {
    /// The most recent `window` chart points, oldest first.
    pub fn chart_window(&self, window: usize) -> &[ChartPoint] {
        let start = self.chart.len().saturating_sub(window);
        &self.chart[start..]
    }
}
