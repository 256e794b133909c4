//! Generic HTTP webhook — POST JSON for new messages, PUT for updates.

use scrumbot_core::config::WebhookConfig;
use scrumbot_core::error::{Result, ScrumError};
use scrumbot_core::types::{MessageId, Payload};

pub struct WebhookClient {
    client: reqwest::Client,
    config: WebhookConfig,
}

impl WebhookClient {
    pub fn new(client: reqwest::Client, config: WebhookConfig) -> Self {
        Self { client, config }
    }

    /// POST a new message. The receiver may answer `{"id": ...}`; otherwise a
    /// local id is generated and sent back with later updates.
    pub async fn post(&self, url: &str, payload: &Payload) -> Result<MessageId> {
        let local_id = uuid::Uuid::new_v4().to_string();
        let body = serde_json::json!({
            "event": "created",
            "message_id": local_id,
            "title": payload.title,
            "body": payload.body,
            "fields": payload.fields,
        });
        let resp = self.send(self.client.post(url), &body, url).await?;
        let text = resp.text().await.unwrap_or_default();
        let id = extract_message_id(&text).unwrap_or(local_id);
        tracing::debug!("✅ Webhook message {id} posted to {url}");
        Ok(id)
    }

    /// PUT the new content of an earlier message.
    pub async fn update(&self, url: &str, message_id: &str, payload: &Payload) -> Result<()> {
        let body = serde_json::json!({
            "event": "updated",
            "message_id": message_id,
            "title": payload.title,
            "body": payload.body,
            "fields": payload.fields,
        });
        self.send(self.client.put(url), &body, url).await?;
        Ok(())
    }

    async fn send(
        &self,
        req: reqwest::RequestBuilder,
        body: &serde_json::Value,
        url: &str,
    ) -> Result<reqwest::Response> {
        let mut req = req
            .json(body)
            .timeout(std::time::Duration::from_secs(self.config.timeout_secs));
        for (key, value) in &self.config.headers {
            req = req.header(key.as_str(), value.as_str());
        }
        let resp = req
            .send()
            .await
            .map_err(|e| ScrumError::Notify(format!("Webhook send failed: {e}")))?;
        match classify_status(resp.status().as_u16(), url) {
            Some(err) => Err(err),
            None => Ok(resp),
        }
    }
}

/// Map a non-success status to an error. 404 and 410 mean the endpoint is gone.
fn classify_status(status: u16, url: &str) -> Option<ScrumError> {
    match status {
        200..=299 => None,
        404 | 410 => Some(ScrumError::ChannelNotFound(format!("webhook:{url} ({status})"))),
        _ => Some(ScrumError::Notify(format!("Webhook error {status}"))),
    }
}

/// Id assigned by the receiver, from `{"id": ...}` or `{"message_id": ...}`.
fn extract_message_id(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    ["id", "message_id"].iter().find_map(|key| match &value[*key] {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_status() {
        assert!(classify_status(200, "u").is_none());
        assert!(classify_status(204, "u").is_none());
        assert!(matches!(classify_status(404, "u"), Some(ScrumError::ChannelNotFound(_))));
        assert!(matches!(classify_status(410, "u"), Some(ScrumError::ChannelNotFound(_))));
        assert!(matches!(classify_status(502, "u"), Some(ScrumError::Notify(_))));
    }

    #[test]
    fn test_extract_message_id() {
        assert_eq!(extract_message_id(r#"{"id":"abc"}"#).as_deref(), Some("abc"));
        assert_eq!(extract_message_id(r#"{"message_id":17}"#).as_deref(), Some("17"));
        assert_eq!(extract_message_id(r#"{"ok":true}"#), None);
        assert_eq!(extract_message_id(""), None);
    }
}
