//! DeepSeek chat-completions client.
//!
//! OpenAI-compatible endpoint, always called in JSON mode. Retries with
//! exponential backoff on transport errors, 429 and 5xx; other client
//! errors fail immediately.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::LlmError;
use crate::platform::build_http_client;

use super::ChatTurn;

pub(crate) const DEEPSEEK_MODEL: &str = "deepseek-chat";
const MAX_RETRIES: u32 = 2;
const DEFAULT_BACKOFF_MS: u64 = 1000;

pub struct DeepSeekClient {
    base_url: String,
    api_key: String,
    backoff_ms: u64,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatTurn],
    response_format: ResponseFormat<'a>,
}

#[derive(Serialize)]
struct ResponseFormat<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: String,
}

impl DeepSeekClient {
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self::with_base_url(&config.deepseek_base_url, &config.deepseek_api_key)
    }

    #[must_use]
    pub fn with_base_url(base_url: &str, api_key: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            backoff_ms: DEFAULT_BACKOFF_MS,
            client: build_http_client(30),
        }
    }

    #[cfg(test)]
    fn with_backoff_ms(mut self, backoff_ms: u64) -> Self {
        self.backoff_ms = backoff_ms;
        self
    }

    /// One JSON-mode completion. Returns the raw message content with any
    /// markdown code fence stripped.
    pub(crate) async fn complete_json(&self, messages: &[ChatTurn]) -> Result<String, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = ChatRequest {
            model: DEEPSEEK_MODEL,
            messages,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let mut last = String::new();
        for attempt in 0..=MAX_RETRIES {
            match self.try_complete(&url, &body).await {
                Ok(content) => return Ok(content),
                Err(e) => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        max = MAX_RETRIES + 1,
                        error = %e,
                        "deepseek call failed"
                    );
                    if !is_retryable(&e) {
                        return Err(e);
                    }
                    last = e.to_string();
                    if attempt < MAX_RETRIES {
                        let delay = self.backoff_ms.saturating_mul(1 << attempt);
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                    }
                }
            }
        }
        Err(LlmError::Exhausted {
            attempts: MAX_RETRIES + 1,
            last,
        })
    }

    async fn try_complete(&self, url: &str, body: &ChatRequest<'_>) -> Result<String, LlmError> {
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| LlmError::Request(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                status: status.as_u16(),
                body: body.chars().take(300).collect(),
            });
        }
        let reply: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Request(e.to_string()))?;
        let content = reply
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| LlmError::BadReply("no choices in completion".into()))?;
        Ok(strip_code_fence(&content).to_string())
    }

    /// Completion parsed straight into a typed reply.
    pub(crate) async fn complete_typed<T: serde::de::DeserializeOwned>(
        &self,
        messages: &[ChatTurn],
    ) -> Result<T, LlmError> {
        let content = self.complete_json(messages).await?;
        serde_json::from_str(&content).map_err(|e| LlmError::BadReply(e.to_string()))
    }
}

/// Transport errors, 429 and 5xx resolve with retries; other statuses do not.
fn is_retryable(err: &LlmError) -> bool {
    match err {
        LlmError::Request(_) => true,
        LlmError::Status { status, .. } => *status == 429 || *status >= 500,
        LlmError::BadReply(_) | LlmError::Exhausted { .. } => false,
    }
}

/// Models sometimes wrap JSON-mode output in a markdown fence anyway.
fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    if !trimmed.starts_with("```") {
        return trimmed;
    }
    let body = trimmed.split_once('\n').map_or("", |(_, rest)| rest);
    let body = body.rsplit_once("```").map_or(body, |(head, _)| head);
    body.trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn completion_body(content: &str) -> serde_json::Value {
        serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": content}}]
        })
    }

    #[tokio::test]
    async fn sends_model_and_json_mode() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(serde_json::json!({
                "model": "deepseek-chat",
                "response_format": {"type": "json_object"},
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("{\"ok\":1}")))
            .expect(1)
            .mount(&server)
            .await;

        let client = DeepSeekClient::with_base_url(&server.uri(), "sk-test");
        let content = client
            .complete_json(&[ChatTurn::user("你好")])
            .await
            .unwrap();
        assert_eq!(content, "{\"ok\":1}");
    }

    #[tokio::test]
    async fn retries_server_errors_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("{}")))
            .expect(1)
            .mount(&server)
            .await;

        let client = DeepSeekClient::with_base_url(&server.uri(), "sk-test").with_backoff_ms(1);
        assert!(client.complete_json(&[ChatTurn::user("hi")]).await.is_ok());
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
            .expect(1)
            .mount(&server)
            .await;

        let client = DeepSeekClient::with_base_url(&server.uri(), "sk-test").with_backoff_ms(1);
        let err = client
            .complete_json(&[ChatTurn::user("hi")])
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Status { status: 400, .. }));
    }

    #[tokio::test]
    async fn exhausts_after_three_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let client = DeepSeekClient::with_base_url(&server.uri(), "sk-test").with_backoff_ms(1);
        let err = client
            .complete_json(&[ChatTurn::user("hi")])
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Exhausted { attempts: 3, .. }));
    }

    #[test]
    fn code_fences_are_stripped() {
        assert_eq!(
            strip_code_fence("```json\n{\"a\": 1}\n```"),
            "{\"a\": 1}"
        );
        assert_eq!(strip_code_fence("{\"a\": 1}"), "{\"a\": 1}");
        assert_eq!(strip_code_fence("```\n{}\n```"), "{}");
    }

    #[test]
    fn rate_limits_are_retryable() {
        assert!(is_retryable(&LlmError::Status {
            status: 429,
            body: String::new()
        }));
        assert!(is_retryable(&LlmError::Request("timeout".into())));
        assert!(!is_retryable(&LlmError::Status {
            status: 404,
            body: String::new()
        }));
    }
}
