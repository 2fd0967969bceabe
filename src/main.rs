use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use log::{info, warn};
use serde_json::json;

use location_fusion_rs::config::TrackerConfig;
use location_fusion_rs::replay::{load_log, replay, ReplayReport};
use location_fusion_rs::sensors::{run_simulation, Activity, Phase, SimulationPlan};

#[derive(Parser, Debug)]
#[command(name = "location_fusion")]
#[command(about = "Location fusion core - noise filter, bearing fusion and GPS duty cycle", long_about = None)]
struct Args {
    /// Tracker configuration (JSON); missing fields use defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Force the accelerometer-driven duty cycle on
    #[arg(long, global = true, default_value_t = false)]
    motion_sensor: bool,

    /// Override the heartbeat limit (discarded fixes before a forced publish)
    #[arg(long, global = true)]
    max_ignored: Option<u32>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay recorded session logs (.json / .json.gz)
    Replay {
        /// Single session log
        #[arg(long, conflicts_with = "golden_dir")]
        log: Option<PathBuf>,

        /// Directory of logs to batch replay
        #[arg(long)]
        golden_dir: Option<PathBuf>,

        /// Include every fused fix in the JSON output
        #[arg(long, default_value_t = false)]
        with_track: bool,
    },
    /// Run simulated sensors against a live service
    Simulate {
        /// Seconds of walking before and after the stop
        #[arg(long, default_value = "60")]
        walk_secs: f64,

        /// Seconds standing still
        #[arg(long, default_value = "120")]
        still_secs: f64,

        /// Walking speed (m/s)
        #[arg(long, default_value = "1.4")]
        speed: f64,

        /// Simulated seconds per wall-clock second
        #[arg(long, default_value = "20")]
        speedup: f64,

        /// Write the report here instead of stdout
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
}

fn load_config(args: &Args) -> Result<TrackerConfig> {
    let mut config = match &args.config {
        Some(path) => TrackerConfig::from_json_file(path)?,
        None => TrackerConfig::default(),
    };
    if args.motion_sensor {
        config.motion_sensor_enabled = true;
    }
    if let Some(max_ignored) = args.max_ignored {
        config.max_ignored_fixes = max_ignored;
    }
    config.validate()?;
    Ok(config)
}

fn summarize(path: &Path, report: &ReplayReport, with_track: bool) -> serde_json::Value {
    let mut summary = json!({
        "log": path.display().to_string(),
        "readings": report.readings,
        "fixes_in": report.fixes_in,
        "fixes_while_stopped": report.fixes_while_stopped,
        "published": report.published,
        "noise_discarded": report.noise_discarded,
        "suppressed_in_soft_sleep": report.suppressed_in_soft_sleep,
        "invalid": report.invalid,
        "soft_sleeps": report.soft_sleeps,
        "hard_sleeps": report.hard_sleeps,
        "wake_ups": report.wake_ups,
        "final_power_state": report.final_power_state,
        "track_length_m": report.track_length_m,
        "prediction_rmse_m": report.prediction_rmse_m,
    });
    if with_track {
        summary["track"] = json!(report.fused);
    }
    summary
}

fn collect_logs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut logs: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("reading {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            let name = p.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
            name.ends_with(".json") || name.ends_with(".json.gz")
        })
        .collect();
    logs.sort();
    Ok(logs)
}

fn run_replay(config: &TrackerConfig, log: Option<PathBuf>, golden_dir: Option<PathBuf>, with_track: bool) -> Result<()> {
    let paths = match (log, golden_dir) {
        (Some(path), _) => vec![path],
        (None, Some(dir)) => collect_logs(&dir)?,
        (None, None) => bail!("either --log or --golden-dir is required"),
    };
    if paths.is_empty() {
        bail!("no session logs found");
    }

    let mut summaries = Vec::new();
    for path in &paths {
        info!("[{}] replaying {}", ts_now(), path.display());
        let result = load_log(path).and_then(|log| replay(&log, config));
        match result {
            Ok(report) => summaries.push(summarize(path, &report, with_track)),
            Err(e) if e.is_recoverable() && paths.len() > 1 => {
                warn!("skipping {}: {}", path.display(), e);
            }
            Err(e) => return Err(e).with_context(|| format!("replaying {}", path.display())),
        }
    }

    let output = if summaries.len() == 1 {
        summaries.remove(0)
    } else {
        json!({ "replayed": summaries.len(), "sessions": summaries })
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn run_simulate(
    config: TrackerConfig,
    walk_secs: f64,
    still_secs: f64,
    speed: f64,
    speedup: f64,
    output_dir: Option<PathBuf>,
) -> Result<()> {
    let plan = SimulationPlan {
        phases: vec![
            Phase { activity: Activity::Walking { speed_mps: speed }, secs: walk_secs },
            Phase { activity: Activity::Still, secs: still_secs },
            Phase { activity: Activity::Walking { speed_mps: speed }, secs: walk_secs },
        ],
        speedup,
        ..SimulationPlan::default()
    };
    info!(
        "[{}] simulating {:.0}s at {}x (motion sensor: {})",
        ts_now(),
        plan.total_secs(),
        speedup,
        config.motion_sensor_enabled
    );

    let report = run_simulation(plan, config).await?;
    let text = serde_json::to_string_pretty(&report)?;
    match output_dir {
        Some(dir) => {
            fs::create_dir_all(&dir)?;
            let filename = dir.join(format!("simulation_{}.json", ts_now_clean()));
            fs::write(&filename, text)?;
            info!("[{}] report written to {}", ts_now(), filename.display());
        }
        None => println!("{text}"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let config = load_config(&args)?;

    match args.command {
        Command::Replay { log, golden_dir, with_track } => run_replay(&config, log, golden_dir, with_track),
        Command::Simulate {
            walk_secs,
            still_secs,
            speed,
            speedup,
            output_dir,
        } => run_simulate(config, walk_secs, still_secs, speed, speedup, output_dir).await,
    }
}

fn ts_now() -> String {
    Utc::now().format("%H:%M:%S").to_string()
}

fn ts_now_clean() -> String {
    Utc::now().format("%Y%m%d_%H%M%S").to_string()
}
