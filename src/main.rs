use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use vps_scan_sim::config::ScanPolicy;
use vps_scan_sim::keywords;
use vps_scan_sim::server;
use vps_scan_sim::session::ScanController;
use vps_scan_sim::types::{LogType, ScanEvent, SessionSnapshot};

/// vps-scan-sim — Simulated website resource scan producing a VPS sizing recommendation.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "vps-scan-sim",
    version,
    about = "Simulated website resource scan producing a VPS sizing recommendation.",
    long_about = None
)]
struct Cli {
    /// Website to "scan" (never contacted). Required unless --serve-ui is given.
    #[arg(required_unless_present = "serve_ui")]
    target: Option<String>,

    /// JSON policy file overriding timing, thresholds and keywords.
    #[arg(long)]
    policy: Option<PathBuf>,

    /// Keyword file (`heavy: a, b` / `static: c` lines) replacing the policy's keyword lists.
    #[arg(long)]
    keywords: Option<PathBuf>,

    /// Timer loop period in milliseconds.
    #[arg(long = "interval-ms")]
    interval_ms: Option<u64>,

    /// Simulated connection setup delay in milliseconds.
    #[arg(long = "connect-delay-ms")]
    connect_delay_ms: Option<u64>,

    /// Seed for reproducible runs.
    #[arg(long)]
    seed: Option<u64>,

    /// Write the final report as pretty JSON to this path (optional).
    #[arg(long)]
    output: Option<PathBuf>,

    /// Only print progress milestones and the final report, not live log lines.
    #[arg(long, default_value_t = false)]
    quiet: bool,

    /// Start the HTTP API and event stream.
    #[arg(long = "serve-ui", default_value_t = false)]
    serve_ui: bool,

    /// Bind address for --serve-ui.
    #[arg(long, default_value = "127.0.0.1:8080")]
    bind: String,

    /// Directory of static UI files served next to the API.
    #[arg(long = "ui-dir", default_value = "ui")]
    ui_dir: PathBuf,

    /// Enable debug logging (RUST_LOG takes precedence).
    #[arg(long, default_value_t = false)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let policy = build_policy(&cli)?;

    println!("vps-scan-sim configuration:");
    println!("  target       : {}", cli.target.as_deref().unwrap_or("<none>"));
    println!("  interval_ms  : {}", policy.tick_interval_ms);
    println!("  connect_ms   : {}", policy.connect_delay_ms);
    println!("  log_chance   : {}", policy.log_probability);
    println!(
        "  keywords     : heavy={} static={}",
        policy.keywords.heavy.join(","),
        policy.keywords.static_sites.join(",")
    );
    println!(
        "  seed         : {}",
        cli.seed.map(|s| s.to_string()).unwrap_or_else(|| "<random>".to_string())
    );
    println!(
        "  output       : {}",
        cli.output
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<none>".to_string())
    );
    println!("  serve_ui     : {}", cli.serve_ui);

    let mut controller = ScanController::new(policy);
    if let Some(seed) = cli.seed {
        controller = controller.with_seed(seed);
    }

    // Start HTTP API if requested (non-blocking background task)
    if cli.serve_ui {
        let bind = cli.bind.clone();
        let ui_dir = cli.ui_dir.clone();
        let svc_controller = controller.clone();
        tokio::spawn(async move {
            if let Err(e) = server::spawn_server(&bind, svc_controller, &ui_dir).await {
                tracing::error!(error = %e, "HTTP server error");
            }
        });
        println!("API server starting at http://{} (Ctrl+C to stop)", cli.bind);
    }

    if let Some(target) = cli.target.as_deref() {
        run_terminal_scan(&controller, target, cli.quiet, cli.output.as_deref()).await?;
    }

    // If the server is running, keep the process alive until Ctrl+C.
    if cli.serve_ui {
        println!("Press Ctrl+C to stop the server...");
        let _ = tokio::signal::ctrl_c().await;
    }

    Ok(())
}

fn init_logging(debug: bool) {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

/// Policy file first, then keyword file, then individual CLI overrides.
fn build_policy(cli: &Cli) -> Result<ScanPolicy> {
    let mut policy = match cli.policy.as_deref() {
        Some(path) => ScanPolicy::load(path)?,
        None => ScanPolicy::default(),
    };
    if let Some(path) = cli.keywords.as_deref() {
        policy.keywords = keywords::load_keywords_from_path(path)?;
    }
    if let Some(ms) = cli.interval_ms {
        policy.tick_interval_ms = ms;
    }
    if let Some(ms) = cli.connect_delay_ms {
        policy.connect_delay_ms = ms;
    }
    policy.validate()?;
    Ok(policy)
}

async fn run_terminal_scan(
    controller: &ScanController,
    target: &str,
    quiet: bool,
    output: Option<&Path>,
) -> Result<()> {
    let Some((handle, mut events)) = controller.start_stream(target) else {
        bail!("a scan is already running");
    };

    // Ctrl-C stops the scan.
    let stopper = controller.clone();
    let stop_handle = handle.clone();
    let ctrlc = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stopper.stop(&stop_handle);
        }
    });

    println!("\nScanning {target} ...");
    let mut last_step = String::new();
    while let Some(ev) = events.recv().await {
        match ev {
            ScanEvent::Progress { percent, step } => {
                if step != last_step || percent % 10 == 0 {
                    println!("[{percent:>3}%] {step}");
                    last_step = step;
                }
            }
            ScanEvent::Log(entry) if !quiet => {
                let marker = match entry.kind {
                    LogType::Metrics => ">> ",
                    LogType::Error => "!! ",
                    _ => "",
                };
                println!("  {} {marker}{}", entry.timestamp, entry.message);
            }
            ScanEvent::Error { message } => eprintln!("Scan failed: {message}"),
            _ => {}
        }
    }
    ctrlc.abort();

    let Some(snap) = controller.snapshot() else {
        return Ok(());
    };
    if snap.result.is_none() {
        println!("\nScan stopped at {}%.", snap.progress);
        return Ok(());
    }
    print_report_table(&snap);
    if let Some(path) = output {
        if let Err(e) = write_report_json(path, &snap) {
            eprintln!("Failed to write JSON to {}: {}", path.display(), e);
        } else {
            println!("Wrote JSON report to {}", path.display());
        }
    }
    Ok(())
}

fn print_report_table(snap: &SessionSnapshot) {
    let Some(result) = snap.result else {
        return;
    };
    let rows = [
        ("Recommended Processing", format!("{} vCPU", result.recommended_cpu)),
        ("Recommended RAM", format!("{} GB", result.recommended_ram)),
        ("NVMe Storage", format!("{} GB", result.recommended_disk)),
        ("Estimated Daily Capacity", format!("{} Visitors", result.max_daily_traffic)),
    ];
    let key_w = rows.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
    let val_w = rows.iter().map(|(_, v)| v.len()).max().unwrap_or(0);

    println!(
        "\nScan complete for {} ({:?} profile, {}% confidence)",
        snap.target, snap.profile.class, result.confidence_score
    );
    println!("{:-<key_w$}  {:-<val_w$}", "", "", key_w = key_w, val_w = val_w);
    for (k, v) in &rows {
        println!("{:<key_w$}  {:>val_w$}", k, v, key_w = key_w, val_w = val_w);
    }
}

fn write_report_json(path: &Path, snap: &SessionSnapshot) -> Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, snap)?;
    Ok(())
}
