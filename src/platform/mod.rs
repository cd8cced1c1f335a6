//! Feishu Open API client: tenant token lifecycle plus the approval,
//! messaging and drive surfaces the assistant relies on.

mod approval;
mod drive;
mod messaging;
pub mod types;

pub use approval::{FREE_PROCESS_CODE, TaskRef, approval_create_link};

use std::time::{Duration, Instant};

use reqwest::Client;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;

use crate::config::Config;
use crate::error::PlatformError;

use types::{Envelope, TokenResponse};

/// Refresh the tenant token this long before Feishu would expire it.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(300);

/// Per-request ceiling for ordinary API calls; downloads get their own.
const API_TIMEOUT_SECS: u64 = 30;

pub(crate) fn build_http_client(timeout_secs: u64) -> Client {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .connect_timeout(Duration::from_secs(10))
        .pool_max_idle_per_host(10)
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_keepalive(Duration::from_secs(60))
        .build()
        .unwrap_or_else(|_| Client::new())
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// Authenticated Feishu API client.
///
/// The tenant access token is fetched lazily and cached until shortly
/// before expiry; refresh is serialized so concurrent callers share one
/// fetch instead of racing the auth endpoint.
pub struct FeishuClient {
    base_url: String,
    app_id: String,
    app_secret: String,
    client: Client,
    download_client: Client,
    token: Mutex<Option<CachedToken>>,
}

impl FeishuClient {
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self::with_base_url(
            &config.feishu_base_url,
            &config.feishu_app_id,
            &config.feishu_app_secret,
        )
    }

    /// Builds a client against an explicit base URL. Tests point this at
    /// a local mock server.
    #[must_use]
    pub fn with_base_url(base_url: &str, app_id: &str, app_secret: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            app_id: app_id.to_string(),
            app_secret: app_secret.to_string(),
            client: build_http_client(API_TIMEOUT_SECS),
            download_client: build_http_client(60),
            token: Mutex::new(None),
        }
    }

    pub(crate) fn api_url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    pub(crate) fn http(&self) -> &Client {
        &self.client
    }

    pub(crate) fn download_client(&self) -> &Client {
        &self.download_client
    }

    /// Returns a valid tenant access token, fetching a fresh one when the
    /// cached token is absent or near expiry.
    pub(crate) async fn tenant_token(&self) -> Result<String, PlatformError> {
        let mut guard = self.token.lock().await;
        if let Some(cached) = guard.as_ref()
            && cached.expires_at > Instant::now()
        {
            return Ok(cached.value.clone());
        }

        let url = self.api_url("/auth/v3/tenant_access_token/internal");
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "app_id": self.app_id,
                "app_secret": self.app_secret,
            }))
            .send()
            .await
            .map_err(|e| PlatformError::Request(e.to_string()))?;
        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| PlatformError::Decode(e.to_string()))?;
        if body.code != 0 {
            return Err(PlatformError::Api {
                code: body.code,
                msg: body.msg,
            });
        }
        let value = body
            .tenant_access_token
            .ok_or_else(|| PlatformError::Decode("token reply without tenant_access_token".into()))?;

        let ttl = Duration::from_secs(body.expire.unwrap_or(0))
            .saturating_sub(TOKEN_REFRESH_MARGIN);
        *guard = Some(CachedToken {
            value: value.clone(),
            expires_at: Instant::now() + ttl,
        });
        tracing::debug!(ttl_secs = ttl.as_secs(), "tenant token refreshed");
        Ok(value)
    }

    /// Sends an authenticated request and unwraps the `{code, msg, data}`
    /// envelope into its payload.
    pub(crate) async fn call<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, PlatformError> {
        let envelope = self.call_envelope::<T>(request).await?;
        envelope
            .data
            .ok_or_else(|| PlatformError::Decode("response envelope without data".into()))
    }

    /// Like [`Self::call`] but for endpoints whose success payload is
    /// empty or irrelevant.
    pub(crate) async fn call_ok(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<(), PlatformError> {
        self.call_envelope::<serde_json::Value>(request).await?;
        Ok(())
    }

    async fn call_envelope<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<Envelope<T>, PlatformError> {
        let token = self.tenant_token().await?;
        let response = request
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| PlatformError::Request(e.to_string()))?;
        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| PlatformError::Request(e.to_string()))?;

        // Feishu reports business errors inside the envelope even on
        // non-2xx statuses, so decode before checking the status line.
        let envelope: Envelope<T> = match serde_json::from_slice(&bytes) {
            Ok(env) => env,
            Err(e) if status.is_success() => return Err(PlatformError::Decode(e.to_string())),
            Err(_) => return Err(PlatformError::Request(format!("HTTP {status}"))),
        };
        if envelope.code != 0 {
            return Err(PlatformError::Api {
                code: envelope.code,
                msg: envelope.msg,
            });
        }
        Ok(envelope)
    }
}
