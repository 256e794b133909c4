//! # Scrumbot Channels
//! Notification sinks for scrum messages.
//!
//! [`ChannelSink`] routes each call by [`ChannelRef`] kind:
//! - `telegram:<chat_id>` → Telegram Bot API
//! - `webhook:<url>` → JSON POST/PUT
//! - `log:<name>` → tracing only

pub mod telegram;
pub mod webhook;

use async_trait::async_trait;
use scrumbot_core::config::ScrumbotConfig;
use scrumbot_core::error::Result;
use scrumbot_core::traits::NotificationSink;
use scrumbot_core::types::{ChannelRef, MessageId, Payload};

pub use telegram::TelegramClient;
pub use webhook::WebhookClient;

/// Sink covering every channel kind.
pub struct ChannelSink {
    telegram: TelegramClient,
    webhook: WebhookClient,
}

impl ChannelSink {
    pub fn from_config(config: &ScrumbotConfig) -> Self {
        let client = reqwest::Client::new();
        Self {
            telegram: TelegramClient::new(client.clone(), config.telegram.clone()),
            webhook: WebhookClient::new(client, config.webhook.clone()),
        }
    }
}

#[async_trait]
impl NotificationSink for ChannelSink {
    fn name(&self) -> &str {
        "channels"
    }

    async fn post_new(&self, channel: &ChannelRef, payload: &Payload) -> Result<MessageId> {
        match channel {
            ChannelRef::Telegram { chat_id } => self.telegram.send_message(chat_id, payload).await,
            ChannelRef::Webhook { url } => self.webhook.post(url, payload).await,
            ChannelRef::Log { name } => {
                let id = uuid::Uuid::new_v4().to_string();
                tracing::info!("📢 [{name}] {} | {}", payload.title, payload.body.replace('\n', " / "));
                Ok(id)
            }
        }
    }

    async fn update_existing(&self, channel: &ChannelRef, message_id: &str, payload: &Payload) -> Result<()> {
        match channel {
            ChannelRef::Telegram { chat_id } => {
                self.telegram.edit_message(chat_id, message_id, payload).await
            }
            ChannelRef::Webhook { url } => self.webhook.update(url, message_id, payload).await,
            ChannelRef::Log { name } => {
                tracing::info!(
                    "📝 [{name}] update {message_id}: {} | {}",
                    payload.title,
                    payload.body.replace('\n', " / ")
                );
                Ok(())
            }
        }
    }
}
