//! zonewatchd - zone intrusion surveillance daemon
//!
//! This daemon:
//! 1. Loads configuration (ZONEWATCH_CONFIG file plus environment overrides)
//! 2. Opens the camera, detector backend and alert database
//! 3. Runs capture and detection until Ctrl-C
//! 4. Logs a health line every few seconds and retries a degraded camera

use anyhow::{Context, Result};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

use zonewatch::{CameraState, Surveillance, ZonewatchConfig};

const HEALTH_INTERVAL: Duration = Duration::from_secs(5);

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = ZonewatchConfig::load().context("load configuration")?;
    log::info!(
        "zonewatchd {} starting: camera={} db={} clips={}",
        env!("CARGO_PKG_VERSION"),
        config.camera.source,
        config.db_path.display(),
        config.alerts.clip_dir.display()
    );
    for zone in &config.zones {
        log::info!("zone '{}': {} vertices", zone.name(), zone.polygon().len());
    }

    let mut system = Surveillance::from_config(config)?;
    if let Err(e) = system.start() {
        // Degraded, not fatal: status keeps reporting the camera as unavailable.
        log::error!("{:#}", e);
    }

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("error setting Ctrl-C handler")?;

    log::info!("zonewatchd running; waiting for shutdown signal (Ctrl-C)...");
    loop {
        match rx.recv_timeout(HEALTH_INTERVAL) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                log_health(&system);
                if system.status().camera_state == CameraState::Degraded {
                    match system.start() {
                        Ok(()) => log::info!("camera recovered; surveillance resumed"),
                        Err(e) => log::warn!("camera still unavailable: {:#}", e),
                    }
                }
            }
        }
    }

    log::info!("shutdown signal received, stopping...");
    system.stop();
    Ok(())
}

fn log_health(system: &Surveillance) {
    let status = system.status();
    let source = system.source_stats();
    log::info!(
        "health camera={:?} connected={} frames_captured={} frames_processed={} persons={} alerts={} alert_jobs={} reconnects={}",
        status.camera_state,
        status.camera_connected,
        source.frames_captured,
        status.frames_processed,
        status.persons_in_view,
        status.alert_count,
        system.coordinator().in_flight(),
        source.reconnects
    );
    if let Some(err) = source.last_error {
        log::debug!("last camera error: {}", err);
    }
}
