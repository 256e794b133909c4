//! Notification trait — posting and updating channel messages.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{ChannelRef, MessageId, Payload};

/// Posts messages to chat channels.
///
/// Calls may fail transiently. A channel that no longer exists is reported
/// as [`crate::ScrumError::ChannelNotFound`].
#[async_trait]
pub trait NotificationSink: Send + Sync {
    fn name(&self) -> &str;

    /// Post a new message; returns its id for later updates.
    async fn post_new(&self, channel: &ChannelRef, payload: &Payload) -> Result<MessageId>;

    /// Replace the content of a previously posted message.
    async fn update_existing(
        &self,
        channel: &ChannelRef,
        message_id: &str,
        payload: &Payload,
    ) -> Result<()>;
}
