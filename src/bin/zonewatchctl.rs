//! zonewatchctl - operator CLI for a zonewatch installation
//!
//! Reads the alert database written by zonewatchd and probes cameras
//! without starting the daemon.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use zonewatch::alert::to_epoch_ms;
use zonewatch::{probe_camera, AlertStore, CameraSettings, SqliteAlertStore, ZonewatchConfig};

#[derive(Parser, Debug)]
#[command(name = "zonewatchctl", author, version, about = "Inspect zonewatch alerts and cameras")]
struct Args {
    /// Emit JSON instead of text.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the most recent alerts, newest first
    Alerts {
        /// Path to the alert database (defaults to the configured one).
        #[arg(long, env = "ZONEWATCH_DB_PATH")]
        db: Option<PathBuf>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Alert counts for today and the trailing week
    Stats {
        #[arg(long, env = "ZONEWATCH_DB_PATH")]
        db: Option<PathBuf>,
    },

    /// Open a camera, read frames for a few seconds and report
    ProbeCamera {
        /// Camera source (stub://, http(s)://, rtsp://, /dev/videoN or index).
        #[arg(long, env = "ZONEWATCH_CAMERA")]
        source: Option<String>,
        #[arg(long, default_value_t = 3)]
        seconds: u64,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();
    let config = ZonewatchConfig::load().context("load configuration")?;

    match args.command {
        Command::Alerts { db, limit } => {
            let mut store = open_store(db.unwrap_or(config.db_path))?;
            let alerts = store.recent_alerts(limit)?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&alerts)?);
                return Ok(());
            }
            if alerts.is_empty() {
                println!("no alerts recorded");
            }
            for alert in alerts {
                let record = &alert.record;
                println!(
                    "#{:<5} {:>14} {:<8} {:<20} {:>5.1}%  {}",
                    alert.id,
                    to_epoch_ms(record.triggered_at),
                    alert.status,
                    record.zone_name,
                    record.confidence * 100.0,
                    record
                        .video_path
                        .as_ref()
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|| "-".to_string())
                );
            }
        }
        Command::Stats { db } => {
            let mut store = open_store(db.unwrap_or(config.db_path))?;
            let stats = store.stats(SystemTime::now())?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
                return Ok(());
            }
            println!("alerts today:      {}", stats.alerts_today);
            println!("alerts this week:  {}", stats.alerts_week);
            match stats.most_active_zone {
                Some(zone) => println!(
                    "most active zone:  {} ({} alerts)",
                    zone, stats.zone_activity_count
                ),
                None => println!("most active zone:  -"),
            }
        }
        Command::ProbeCamera { source, seconds } => {
            let settings = CameraSettings {
                source: source.unwrap_or_else(|| config.camera.source.clone()),
                ..config.camera.clone()
            };
            let report = probe_camera(&settings, Duration::from_secs(seconds.max(1)))
                .with_context(|| format!("probe {}", settings.source))?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
                return Ok(());
            }
            println!(
                "{}: {} frames at {}x{} in {:.1}s ({:.1} fps)",
                report.source,
                report.frames,
                report.width,
                report.height,
                report.elapsed.as_secs_f64(),
                report.fps()
            );
        }
    }
    Ok(())
}

fn open_store(path: PathBuf) -> Result<SqliteAlertStore> {
    SqliteAlertStore::open(&path).with_context(|| format!("open {}", path.display()))
}
