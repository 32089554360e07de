use std::time::Duration;

use super::form::{display_name, read_attachment, MultipartForm};
use super::{http_error, Notification, NotificationChannel, SEND_TIMEOUT};
use crate::error::NotificationError;

const NAME: &str = "email";
/// Larger clips are referenced by path only.
const MAX_ATTACHMENT_BYTES: u64 = 20 * 1024 * 1024;

/// E-mail through an HTTP mail relay.
///
/// The relay receives a `multipart/form-data` POST with the text fields
/// `from`, `to`, `subject` and `body` and owns SMTP delivery. For a clip
/// notification the clip file is sent as the `attachment` part and its
/// path as `clip_path`.
pub struct EmailRelayChannel {
    relay_url: Option<String>,
    from: String,
    to: Option<String>,
    agent: ureq::Agent,
}

impl EmailRelayChannel {
    pub fn new(relay_url: Option<String>, from: Option<String>, to: Option<String>) -> Self {
        Self::with_timeout(relay_url, from, to, SEND_TIMEOUT)
    }

    pub fn with_timeout(
        relay_url: Option<String>,
        from: Option<String>,
        to: Option<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            relay_url: relay_url.filter(|v| !v.trim().is_empty()),
            from: from
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| "zonewatch@localhost".to_string()),
            to: to.filter(|v| !v.trim().is_empty()),
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }
}

impl NotificationChannel for EmailRelayChannel {
    fn name(&self) -> &str {
        NAME
    }

    fn is_configured(&self) -> bool {
        self.relay_url.is_some() && self.to.is_some()
    }

    fn send(&self, notification: &Notification) -> Result<(), NotificationError> {
        let (Some(url), Some(to)) = (&self.relay_url, &self.to) else {
            return Ok(());
        };
        let mut form = MultipartForm::new()
            .text("from", &self.from)
            .text("to", to)
            .text("subject", &notification.subject())
            .text("body", &notification.body());
        if let Some(clip) = &notification.attachment {
            form = form.text("clip_path", &clip.display().to_string());
            if let Some(bytes) = read_attachment(NAME, clip, MAX_ATTACHMENT_BYTES) {
                form = form.file(
                    "attachment",
                    &display_name(clip),
                    "application/octet-stream",
                    &bytes,
                );
            }
        }
        let (content_type, body) = form.finish();

        self.agent
            .post(url)
            .set("Content-Type", &content_type)
            .send_bytes(&body)
            .map_err(|e| http_error(NAME, e))?;
        Ok(())
    }
}
