//! IM v1 messaging.

use crate::error::PlatformError;

use super::FeishuClient;

impl FeishuClient {
    /// Sends a plain-text message to a user by `open_id`. The text body
    /// itself is JSON-encoded per the IM API contract.
    pub async fn send_text(&self, open_id: &str, text: &str) -> Result<(), PlatformError> {
        let content = serde_json::json!({ "text": text }).to_string();
        let url = self.api_url("/im/v1/messages");
        let request = self
            .http()
            .post(&url)
            .query(&[("receive_id_type", "open_id")])
            .json(&serde_json::json!({
                "receive_id": open_id,
                "msg_type": "text",
                "content": content,
            }));
        self.call_ok(request).await
    }
}
