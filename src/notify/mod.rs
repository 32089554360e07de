//! NotificationDispatcher: fan an alert out to independent channels.
//!
//! Every configured channel is sent to on its own thread; the dispatcher
//! waits for all of them and reports one outcome per channel, in channel
//! order. A channel that is not configured is skipped and counts as a
//! success. Failures are logged and reported, never retried.

mod email;
mod form;
mod mqtt;
mod telegram;

pub use email::EmailRelayChannel;
pub use mqtt::MqttChannel;
pub use telegram::TelegramChannel;

use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use serde::Serialize;

use crate::alert::{to_epoch_ms, AlertRecord};
use crate::error::NotificationError;

/// Per-request bound for network channels.
pub const SEND_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// Sent as soon as the alert is accepted.
    Alert,
    /// Follow-up once the incident clip is on disk.
    Clip,
}

/// Content handed to every channel.
#[derive(Clone, Debug, PartialEq)]
pub struct Notification {
    pub kind: NotificationKind,
    pub alert: AlertRecord,
    pub attachment: Option<PathBuf>,
}

impl Notification {
    pub fn alert(record: &AlertRecord) -> Self {
        Self {
            kind: NotificationKind::Alert,
            alert: record.clone(),
            attachment: None,
        }
    }

    pub fn clip(record: &AlertRecord, clip: &Path) -> Self {
        let mut alert = record.clone();
        alert.video_path = Some(clip.to_path_buf());
        Self {
            kind: NotificationKind::Clip,
            alert,
            attachment: Some(clip.to_path_buf()),
        }
    }

    pub fn subject(&self) -> String {
        match self.kind {
            NotificationKind::Alert => format!(
                "SECURITY ALERT - {}",
                self.alert.alert_type.to_uppercase()
            ),
            NotificationKind::Clip => format!("Incident clip - {}", self.alert.zone_name),
        }
    }

    pub fn body(&self) -> String {
        let a = &self.alert;
        let mut body = format!(
            "{}\n\nZone: {}\nAlert type: {}\nConfidence: {:.1}%\nBox: [{:.0}, {:.0}, {:.0}, {:.0}]\nTriggered at (unix ms): {}\n",
            a.headline(),
            a.zone_name,
            a.alert_type,
            a.confidence * 100.0,
            a.coordinates.x1,
            a.coordinates.y1,
            a.coordinates.x2,
            a.coordinates.y2,
            to_epoch_ms(a.triggered_at),
        );
        if let Some(path) = &self.attachment {
            body.push_str(&format!("Clip: {}\n", path.display()));
        }
        body
    }
}

/// An outbound alert channel.
pub trait NotificationChannel: Send + Sync {
    fn name(&self) -> &str;

    /// False when credentials or endpoints are missing.
    fn is_configured(&self) -> bool;

    /// One bounded delivery attempt.
    fn send(&self, notification: &Notification) -> Result<(), NotificationError>;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct NotificationOutcome {
    pub channel: String,
    pub success: bool,
    /// Channel was not configured and nothing was sent.
    pub skipped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

impl NotificationOutcome {
    fn delivered(channel: &str) -> Self {
        Self {
            channel: channel.to_string(),
            success: true,
            skipped: false,
            error_detail: None,
        }
    }

    fn skipped(channel: &str) -> Self {
        Self {
            channel: channel.to_string(),
            success: true,
            skipped: true,
            error_detail: None,
        }
    }

    fn failed(channel: &str, err: &NotificationError) -> Self {
        Self {
            channel: channel.to_string(),
            success: false,
            skipped: false,
            error_detail: Some(err.to_string()),
        }
    }
}

#[derive(Default)]
pub struct NotificationDispatcher {
    channels: Vec<Box<dyn NotificationChannel>>,
}

enum Pending<'scope> {
    Skipped,
    Running(thread::ScopedJoinHandle<'scope, Result<(), NotificationError>>),
    NotStarted(NotificationError),
}

impl NotificationDispatcher {
    pub fn new(channels: Vec<Box<dyn NotificationChannel>>) -> Self {
        Self { channels }
    }

    pub fn channel_names(&self) -> Vec<&str> {
        self.channels.iter().map(|c| c.name()).collect()
    }

    pub fn configured_count(&self) -> usize {
        self.channels.iter().filter(|c| c.is_configured()).count()
    }

    /// Send to every channel concurrently and collect one outcome each.
    pub fn dispatch(&self, notification: &Notification) -> Vec<NotificationOutcome> {
        let outcomes: Vec<NotificationOutcome> = thread::scope(|scope| {
            let pending: Vec<Pending<'_>> = self
                .channels
                .iter()
                .map(|channel| {
                    if !channel.is_configured() {
                        return Pending::Skipped;
                    }
                    let spawned = thread::Builder::new()
                        .name(format!("zonewatch-notify-{}", channel.name()))
                        .spawn_scoped(scope, move || channel.send(notification));
                    match spawned {
                        Ok(handle) => Pending::Running(handle),
                        Err(err) => Pending::NotStarted(NotificationError::Transport {
                            channel: channel.name().to_string(),
                            detail: format!("spawn failed: {}", err),
                        }),
                    }
                })
                .collect();

            self.channels
                .iter()
                .zip(pending)
                .map(|(channel, pending)| {
                    let name = channel.name();
                    let result = match pending {
                        Pending::Skipped => return NotificationOutcome::skipped(name),
                        Pending::NotStarted(err) => Err(err),
                        Pending::Running(handle) => handle.join().unwrap_or_else(|_| {
                            Err(NotificationError::Panicked {
                                channel: name.to_string(),
                            })
                        }),
                    };
                    match result {
                        Ok(()) => NotificationOutcome::delivered(name),
                        Err(err) => NotificationOutcome::failed(name, &err),
                    }
                })
                .collect()
        });

        for outcome in &outcomes {
            if outcome.skipped {
                log::debug!("notify {}: not configured, skipped", outcome.channel);
            } else if outcome.success {
                log::info!(
                    "notify {}: {} sent for {}",
                    outcome.channel,
                    kind_label(notification.kind),
                    notification.alert.zone_name
                );
            } else {
                log::warn!(
                    "notify {}: {} failed: {}",
                    outcome.channel,
                    kind_label(notification.kind),
                    outcome.error_detail.as_deref().unwrap_or("unknown error")
                );
            }
        }
        outcomes
    }
}

fn kind_label(kind: NotificationKind) -> &'static str {
    match kind {
        NotificationKind::Alert => "alert",
        NotificationKind::Clip => "clip",
    }
}

/// Map a ureq failure onto the channel error taxonomy.
fn http_error(channel: &str, err: ureq::Error) -> NotificationError {
    match err {
        ureq::Error::Status(status, response) => NotificationError::Rejected {
            channel: channel.to_string(),
            status,
            body: response.into_string().unwrap_or_default().trim().to_string(),
        },
        other => NotificationError::Transport {
            channel: channel.to_string(),
            detail: other.to_string(),
        },
    }
}
