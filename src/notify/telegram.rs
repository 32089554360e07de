use std::path::Path;
use std::time::Duration;

use serde::Serialize;

use super::form::{display_name, read_attachment, MultipartForm};
use super::{http_error, Notification, NotificationChannel, SEND_TIMEOUT};
use crate::error::NotificationError;

const DEFAULT_API_BASE: &str = "https://api.telegram.org";
const NAME: &str = "telegram";
/// Bot API upload limit for `sendVideo`.
const MAX_VIDEO_BYTES: u64 = 50 * 1024 * 1024;
/// Bot API caption limit, in characters.
const MAX_CAPTION_CHARS: usize = 1024;

/// Telegram Bot API: `sendMessage` for alerts, `sendVideo` for clips.
///
/// A clip that cannot be uploaded (missing, unreadable, too large) is
/// announced with a text message carrying its path instead.
pub struct TelegramChannel {
    bot_token: Option<String>,
    chat_id: Option<String>,
    api_base: String,
    agent: ureq::Agent,
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: String,
    disable_web_page_preview: bool,
}

impl TelegramChannel {
    pub fn new(bot_token: Option<String>, chat_id: Option<String>) -> Self {
        Self::with_timeout(bot_token, chat_id, SEND_TIMEOUT)
    }

    pub fn with_timeout(
        bot_token: Option<String>,
        chat_id: Option<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            bot_token: non_empty(bot_token),
            chat_id: non_empty(chat_id),
            api_base: DEFAULT_API_BASE.to_string(),
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }

    /// Point at a Bot API compatible server other than api.telegram.org.
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    fn message_text(notification: &Notification) -> String {
        format!("{}\n\n{}", notification.subject(), notification.body())
    }

    fn send_message(&self, token: &str, chat_id: &str, text: String) -> Result<(), NotificationError> {
        let payload = serde_json::to_string(&SendMessage {
            chat_id,
            text,
            disable_web_page_preview: true,
        })
        .map_err(|e| NotificationError::Transport {
            channel: NAME.to_string(),
            detail: e.to_string(),
        })?;

        let url = format!("{}/bot{}/sendMessage", self.api_base, token);
        self.agent
            .post(&url)
            .set("Content-Type", "application/json")
            .send_string(&payload)
            .map_err(|e| http_error(NAME, e))?;
        Ok(())
    }

    fn send_video(
        &self,
        token: &str,
        chat_id: &str,
        caption: &str,
        clip: &Path,
        bytes: &[u8],
    ) -> Result<(), NotificationError> {
        let caption: String = caption.chars().take(MAX_CAPTION_CHARS).collect();
        let (content_type, body) = MultipartForm::new()
            .text("chat_id", chat_id)
            .text("caption", &caption)
            .text("supports_streaming", "false")
            .file("video", &display_name(clip), "video/x-motion-jpeg", bytes)
            .finish();

        let url = format!("{}/bot{}/sendVideo", self.api_base, token);
        self.agent
            .post(&url)
            .set("Content-Type", &content_type)
            .send_bytes(&body)
            .map_err(|e| http_error(NAME, e))?;
        Ok(())
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl NotificationChannel for TelegramChannel {
    fn name(&self) -> &str {
        NAME
    }

    fn is_configured(&self) -> bool {
        self.bot_token.is_some() && self.chat_id.is_some()
    }

    fn send(&self, notification: &Notification) -> Result<(), NotificationError> {
        let (Some(token), Some(chat_id)) = (&self.bot_token, &self.chat_id) else {
            return Ok(());
        };
        let text = Self::message_text(notification);
        if let Some(clip) = &notification.attachment {
            if let Some(bytes) = read_attachment(NAME, clip, MAX_VIDEO_BYTES) {
                return self.send_video(token, chat_id, &text, clip, &bytes);
            }
        }
        self.send_message(token, chat_id, text)
    }
}
