//! Telegram Bot API client — sendMessage / editMessageText.

use scrumbot_core::config::TelegramConfig;
use scrumbot_core::error::{Result, ScrumError};
use scrumbot_core::types::{MessageId, Payload};
use serde::Deserialize;

/// Bot API descriptions meaning the chat is unreachable for good.
const GONE_MARKERS: &[&str] = &[
    "chat not found",
    "bot was kicked",
    "bot is not a member",
    "chat was deleted",
    "group chat was upgraded",
    "have no rights to send",
];

#[derive(Debug, Deserialize)]
struct TelegramApiResponse<T> {
    ok: bool,
    #[serde(default)]
    error_code: Option<u16>,
    #[serde(default)]
    description: Option<String>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

pub struct TelegramClient {
    client: reqwest::Client,
    config: TelegramConfig,
}

impl TelegramClient {
    pub fn new(client: reqwest::Client, config: TelegramConfig) -> Self {
        Self { client, config }
    }

    fn api_url(&self, method: &str) -> Result<String> {
        if self.config.bot_token.is_empty() {
            return Err(ScrumError::Config(
                "telegram.bot_token is not set (or SCRUMBOT_TELEGRAM_BOT_TOKEN)".into(),
            ));
        }
        Ok(format!(
            "{}/bot{}/{}",
            self.config.api_base.trim_end_matches('/'),
            self.config.bot_token,
            method
        ))
    }

    /// Send a new message; returns its message id.
    pub async fn send_message(&self, chat_id: &str, payload: &Payload) -> Result<MessageId> {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "text": format_text(payload),
            "parse_mode": "Markdown",
        });
        let result: TelegramApiResponse<SentMessage> = self.call("sendMessage", &body).await?;
        let sent = check(chat_id, result)?
            .ok_or_else(|| ScrumError::Notify("sendMessage returned no message".into()))?;
        tracing::debug!("✅ Telegram message {} sent to {}", sent.message_id, chat_id);
        Ok(sent.message_id.to_string())
    }

    /// Replace the text of an earlier message.
    pub async fn edit_message(&self, chat_id: &str, message_id: &str, payload: &Payload) -> Result<()> {
        let message_id: i64 = message_id
            .parse()
            .map_err(|_| ScrumError::Notify(format!("not a Telegram message id: {message_id}")))?;
        let body = serde_json::json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "text": format_text(payload),
            "parse_mode": "Markdown",
        });
        let result: TelegramApiResponse<serde_json::Value> =
            self.call("editMessageText", &body).await?;
        match check(chat_id, result) {
            Ok(_) => Ok(()),
            Err(ScrumError::Notify(msg)) if msg.contains("message is not modified") => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        body: &serde_json::Value,
    ) -> Result<TelegramApiResponse<T>> {
        self.client
            .post(self.api_url(method)?)
            .json(body)
            .send()
            .await
            .map_err(|e| ScrumError::Notify(format!("Telegram {method} failed: {e}")))?
            .json()
            .await
            .map_err(|e| ScrumError::Notify(format!("Invalid Telegram {method} response: {e}")))
    }
}

/// Turn an API response into its result or a classified error.
fn check<T>(chat_id: &str, response: TelegramApiResponse<T>) -> Result<Option<T>> {
    if response.ok {
        return Ok(response.result);
    }
    let description = response.description.unwrap_or_default();
    Err(classify_error(chat_id, response.error_code, &description))
}

fn classify_error(chat_id: &str, code: Option<u16>, description: &str) -> ScrumError {
    let lower = description.to_lowercase();
    let gone = matches!(code, Some(400) | Some(403)) && GONE_MARKERS.iter().any(|m| lower.contains(m));
    if gone {
        ScrumError::ChannelNotFound(format!("telegram:{chat_id} ({description})"))
    } else {
        ScrumError::Notify(format!(
            "Telegram API error {}: {description}",
            code.map(|c| c.to_string()).unwrap_or_else(|| "?".into())
        ))
    }
}

/// Render a payload as Telegram Markdown.
pub fn format_text(payload: &Payload) -> String {
    format!("*{}*\n\n{}", escape_markdown(&payload.title), escape_markdown(&payload.body))
}

/// Escape Telegram MarkdownV1 special characters.
fn escape_markdown(s: &str) -> String {
    s.replace('_', "\\_")
        .replace('*', "\\*")
        .replace('[', "\\[")
        .replace('`', "\\`")
}
