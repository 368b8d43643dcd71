//! Derivation of everything a scan tick reports.
//!
//! All functions here are pure apart from the random draws they take from the
//! caller's generator and the wall-clock labels on log lines and chart points.
use ::time::{macros::format_description, OffsetDateTime};
use rand::Rng;

use crate::config::StepThreshold;
use crate::types::{ChartPoint, LogEntry, LogType, ScanMetrics, ScanResult, TargetProfile};

/// Final tick; progress is clamped here.
pub const MAX_TICK: u8 = 100;

const SECONDS_PER_DAY: f64 = 86_400.0;
const AVG_PAGE_MB: f64 = 2.5;
const DAYS_PER_MONTH: f64 = 30.0;

/// Weighted pool for log types: three in four lines are plain info.
const LOG_TYPES: [LogType; 4] = [LogType::Info, LogType::Metrics, LogType::Info, LogType::Info];

pub const CONNECTING_STEP: &str = "Establishing connection...";
pub const COMPLETED_MESSAGE: &str = "Scan completed successfully.";

/// Label for `tick`: the last threshold it satisfies, scanning in ascending order.
pub fn step_label(tick: u8, steps: &[StepThreshold]) -> &str {
    steps
        .iter()
        .take_while(|s| tick >= s.min_tick)
        .last()
        .map(|s| s.label.as_str())
        .unwrap_or("")
}

/// With `probability`, pick a log line and its type for this tick.
pub fn log_line<R: Rng + ?Sized>(rng: &mut R, probability: f64) -> Option<(LogType, String)> {
    if !rng.random_bool(probability.clamp(0.0, 1.0)) {
        return None;
    }
    let message = match rng.random_range(0..4) {
        0 => format!("Fetched chunk {} from CDN", rng.random_range(0..1000)),
        1 => format!(
            "Analyzed packet header size: {} bytes",
            rng.random_range(0..500)
        ),
        2 => format!(
            "Detected script execution time: {:.2}ms",
            rng.random::<f64>()
        ),
        _ => format!("Resource load: image_asset_{}.jpg", rng.random_range(0..50)),
    };
    let kind = LOG_TYPES[rng.random_range(0..LOG_TYPES.len())];
    Some((kind, message))
}

/// Stamp a log line with its id and the current wall-clock time.
pub fn log_entry(id: String, kind: LogType, message: impl Into<String>) -> LogEntry {
    LogEntry {
        id,
        timestamp: clock_label(),
        message: message.into(),
        kind,
    }
}

/// Metrics for `tick`: cpu/ram ramp toward the baseline, disk and traffic grow linearly.
pub fn derive_metrics<R: Rng + ?Sized>(
    tick: u8,
    profile: &TargetProfile,
    burst_multiplier: f64,
    rng: &mut R,
) -> ScanMetrics {
    let t = f64::from(tick.min(MAX_TICK)) / f64::from(MAX_TICK);
    let ramp = 1.0 - (1.0 - t).powi(2);

    let cpu = f64::from(profile.base_cpu_cores) * ramp + rng.random_range(0.0..0.3);
    let ram = f64::from(profile.base_ram_gb) * ramp + rng.random_range(0.0..0.5);
    let disk = (f64::from(profile.base_disk_gb) * t).floor();

    let visitors = profile.base_daily_traffic as f64 * t + rng.random_range(0.0..500.0);
    let rps = visitors / SECONDS_PER_DAY * burst_multiplier.max(0.0) + rng.random_range(0.0..10.0);
    let daily_gb = visitors * AVG_PAGE_MB / 1024.0 + rng.random_range(0.0..1.0);
    let monthly_gb = daily_gb * DAYS_PER_MONTH + rng.random_range(0.0..10.0);

    ScanMetrics {
        cpu_cores: round_to(cpu, 1),
        ram_gb: round_to(ram, 1),
        disk_gb: disk.max(0.0),
        daily_bandwidth_gb: round_to(daily_gb, 2),
        monthly_bandwidth_gb: round_to(monthly_gb, 2),
        requests_per_second: rps.floor().max(0.0),
        estimated_daily_visitors: visitors.floor().max(0.0) as u64,
    }
}

/// One chart sample from the current metrics, with its own small jitter.
pub fn chart_point<R: Rng + ?Sized>(metrics: &ScanMetrics, rng: &mut R) -> ChartPoint {
    let requests = round_to(metrics.requests_per_second + rng.random_range(0.0..5.0), 1);
    ChartPoint {
        time: clock_label(),
        requests,
        bandwidth: round_to(requests * AVG_PAGE_MB * 8.0, 1),
    }
}

/// Sizing recommendation: the profile baseline plus one-time jitter on disk, traffic and confidence.
pub fn final_result<R: Rng + ?Sized>(profile: &TargetProfile, rng: &mut R) -> ScanResult {
    ScanResult {
        recommended_cpu: profile.base_cpu_cores,
        recommended_ram: profile.base_ram_gb,
        recommended_disk: profile.base_disk_gb + rng.random_range(0..20),
        max_daily_traffic: profile.base_daily_traffic + rng.random_range(0..5_000),
        confidence_score: rng.random_range(85..=99),
    }
}

/// Wall-clock `HH:MM:SS` (UTC).
pub fn clock_label() -> String {
    OffsetDateTime::now_utc()
        .format(format_description!("[hour]:[minute]:[second]"))
        .unwrap_or_else(|_| String::from("00:00:00"))
}

fn round_to(v: f64, decimals: i32) -> f64 {
    let f = 10f64.powi(decimals);
    ((v * f).round() / f).max(0.0)
}
