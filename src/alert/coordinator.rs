use std::path::PathBuf;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::cooldown::CooldownTable;
use super::record::AlertRecord;
use crate::frame::{FrameSlot, FrameSubscription};
use crate::notify::{Notification, NotificationDispatcher, NotificationKind, NotificationOutcome};
use crate::pipeline::IntrusionEvent;
use crate::recorder::IncidentRecorder;
use crate::status::StatusBoard;
use crate::store::AlertStore;

pub type SharedStore = Arc<Mutex<Box<dyn AlertStore>>>;

/// Completion report of a background side effect of an accepted alert.
#[derive(Clone, Debug, PartialEq)]
pub enum SideEffect {
    Notified {
        zone_name: String,
        kind: NotificationKind,
        outcomes: Vec<NotificationOutcome>,
    },
    Recorded {
        zone_name: String,
        alert_id: Option<i64>,
        clip: Result<PathBuf, String>,
    },
}

struct Recording {
    recorder: IncidentRecorder,
    frames: FrameSlot,
    duration: Duration,
}

/// Decides which intrusion events become alerts and runs their side effects.
///
/// Acceptance is a per-zone atomic cooldown check. An accepted alert is
/// persisted before `evaluate` returns; notification and recording run on
/// their own threads and never block the caller.
pub struct AlertCoordinator {
    cooldowns: CooldownTable,
    cooldown: Duration,
    store: SharedStore,
    dispatcher: Arc<NotificationDispatcher>,
    status: Arc<StatusBoard>,
    recording: Option<Recording>,
    reports: Mutex<Option<Sender<SideEffect>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl AlertCoordinator {
    pub fn new(
        store: SharedStore,
        dispatcher: Arc<NotificationDispatcher>,
        status: Arc<StatusBoard>,
        cooldown: Duration,
    ) -> Self {
        Self {
            cooldowns: CooldownTable::new(),
            cooldown,
            store,
            dispatcher,
            status,
            recording: None,
            reports: Mutex::new(None),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Record `duration` of frames from `frames` for every accepted alert.
    pub fn with_recording(
        mut self,
        recorder: IncidentRecorder,
        frames: FrameSlot,
        duration: Duration,
    ) -> Self {
        self.recording = Some(Recording {
            recorder,
            frames,
            duration,
        });
        self
    }

    /// Receive a `SideEffect` for every finished notification or recording.
    pub fn with_reports(self, reports: Sender<SideEffect>) -> Self {
        *self.reports.lock().unwrap_or_else(PoisonError::into_inner) = Some(reports);
        self
    }

    /// Turn an intrusion event into an alert unless its zone is cooling down.
    pub fn evaluate(&self, event: &IntrusionEvent) -> Option<AlertRecord> {
        let zone = event.zone.name();
        if !self
            .cooldowns
            .try_acquire(zone, event.observed_at, self.cooldown)
        {
            if log::log_enabled!(log::Level::Debug) {
                let since = self
                    .cooldowns
                    .last_alert(zone)
                    .and_then(|last| event.observed_at.duration_since(last).ok())
                    .unwrap_or_default();
                log::debug!(
                    "alert suppressed: {} alerted {}s ago, cooldown {}s",
                    zone,
                    since.as_secs(),
                    self.cooldown.as_secs()
                );
            }
            return None;
        }

        let record = AlertRecord::from_event(event);
        log::warn!("INTRUSION: {}", record.headline());

        // Subscribe before anything slow so the clip starts at acceptance.
        let clip_frames = self.recording.as_ref().map(|r| r.frames.subscribe());

        let alert_id = self.persist(&record);
        self.status.record_alert(&record);

        self.spawn_notification(Notification::alert(&record));
        if let Some(frames) = clip_frames {
            self.spawn_recording(record.clone(), alert_id, frames);
        }
        Some(record)
    }

    fn persist(&self, record: &AlertRecord) -> Option<i64> {
        let mut store = self.store.lock().unwrap_or_else(PoisonError::into_inner);
        match store.append_alert(record) {
            Ok(id) => Some(id),
            Err(err) => {
                log::error!(
                    "alert for {} not persisted: {}; notifying anyway",
                    record.zone_name,
                    err
                );
                None
            }
        }
    }

    fn spawn_notification(&self, notification: Notification) {
        let dispatcher = Arc::clone(&self.dispatcher);
        let reports = self.report_sender();
        self.spawn_worker("zonewatch-notify", move || {
            let outcomes = dispatcher.dispatch(&notification);
            report(
                &reports,
                SideEffect::Notified {
                    zone_name: notification.alert.zone_name.clone(),
                    kind: notification.kind,
                    outcomes,
                },
            );
        });
    }

    fn spawn_recording(
        &self,
        record: AlertRecord,
        alert_id: Option<i64>,
        mut frames: FrameSubscription,
    ) {
        let Some(recording) = &self.recording else {
            return;
        };
        let recorder = recording.recorder.clone();
        let duration = recording.duration;
        let store = Arc::clone(&self.store);
        let dispatcher = Arc::clone(&self.dispatcher);
        let reports = self.report_sender();

        self.spawn_worker("zonewatch-record", move || {
            let clip = match recorder.record_clip(&mut frames, duration, &record.zone_name) {
                Ok(clip) => clip,
                Err(err) => {
                    log::warn!(
                        "no clip for alert in {}: {}; alert stands without video",
                        record.zone_name,
                        err
                    );
                    report(
                        &reports,
                        SideEffect::Recorded {
                            zone_name: record.zone_name.clone(),
                            alert_id,
                            clip: Err(err.to_string()),
                        },
                    );
                    return;
                }
            };

            if let Some(id) = alert_id {
                let mut store = store.lock().unwrap_or_else(PoisonError::into_inner);
                if let Err(err) = store.attach_video(id, &clip.path) {
                    log::error!("alert {}: clip {} not attached: {}", id, clip.path.display(), err);
                }
            }
            report(
                &reports,
                SideEffect::Recorded {
                    zone_name: record.zone_name.clone(),
                    alert_id,
                    clip: Ok(clip.path.clone()),
                },
            );

            let notification = Notification::clip(&record, &clip.path);
            let outcomes = dispatcher.dispatch(&notification);
            report(
                &reports,
                SideEffect::Notified {
                    zone_name: record.zone_name.clone(),
                    kind: NotificationKind::Clip,
                    outcomes,
                },
            );
        });
    }

    fn report_sender(&self) -> Option<Sender<SideEffect>> {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn spawn_worker(&self, name: &str, work: impl FnOnce() + Send + 'static) {
        let spawned = thread::Builder::new().name(name.to_string()).spawn(work);
        let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
        workers.retain(|w| !w.is_finished());
        match spawned {
            Ok(handle) => workers.push(handle),
            Err(err) => log::error!("{}: spawn failed: {}", name, err),
        }
    }

    /// Number of notification or recording threads still running.
    pub fn in_flight(&self) -> usize {
        self.workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|w| !w.is_finished())
            .count()
    }

    /// Cut recordings short and wait for every side-effect thread.
    pub fn shutdown(&self) {
        if let Some(recording) = &self.recording {
            recording.recorder.cancel();
        }
        self.wait_idle();
        if let Some(recording) = &self.recording {
            recording.recorder.resume();
        }
    }

    /// Wait for every side-effect thread started so far.
    pub fn wait_idle(&self) {
        let workers: Vec<JoinHandle<()>> = self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for worker in workers {
            if worker.join().is_err() {
                log::error!("alert side-effect thread panicked");
            }
        }
    }
}

fn report(reports: &Option<Sender<SideEffect>>, effect: SideEffect) {
    if let Some(tx) = reports {
        let _ = tx.send(effect);
    }
}
