//! Attachment downloads.
//!
//! Approval attachment tokens double as drive file tokens. The download
//! endpoint may answer three ways: raw bytes, a JSON body pointing at a
//! `download_link`, or a redirect (followed by the client). Tokens the
//! drive endpoint refuses get one more chance through the media
//! temporary-URL endpoint.

use crate::error::PlatformError;

use super::FeishuClient;
use super::types::{DownloadIndirection, Envelope, TmpDownloadUrls};

impl FeishuClient {
    /// Downloads an approval attachment by file token.
    pub async fn download_file(&self, file_token: &str) -> Result<Vec<u8>, PlatformError> {
        if file_token.is_empty() {
            return Err(download_error(file_token, "empty file token"));
        }
        match self.download_via_drive(file_token).await {
            Ok(bytes) => Ok(bytes),
            Err(drive_err) => {
                tracing::debug!(
                    token = %short_token(file_token),
                    error = %drive_err,
                    "drive download failed, trying media tmp url"
                );
                match self.download_via_tmp_url(file_token).await {
                    Ok(bytes) => Ok(bytes),
                    // The drive error names the root cause better.
                    Err(_) => Err(drive_err),
                }
            }
        }
    }

    /// Downloads a file or image the user sent to the bot in chat.
    /// `resource_type` is the platform's `file` / `image` discriminator.
    pub async fn download_message_resource(
        &self,
        message_id: &str,
        file_key: &str,
        resource_type: &str,
    ) -> Result<Vec<u8>, PlatformError> {
        let token = self.tenant_token().await?;
        let url = self.api_url(&format!("/im/v1/messages/{message_id}/resources/{file_key}"));
        let response = self
            .download_client()
            .get(&url)
            .query(&[("type", resource_type)])
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| download_error(file_key, &e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(download_error(file_key, &format!("HTTP {status}")));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| download_error(file_key, &e.to_string()))?;
        if bytes.is_empty() {
            return Err(download_error(file_key, "empty response body"));
        }
        Ok(bytes.to_vec())
    }

    async fn download_via_drive(&self, file_token: &str) -> Result<Vec<u8>, PlatformError> {
        let token = self.tenant_token().await?;
        let url = self.api_url(&format!("/drive/v1/files/{file_token}/download"));
        let response = self
            .download_client()
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| download_error(file_token, &e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(download_error(file_token, &format!("HTTP {status}")));
        }

        let is_json = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("application/json"));
        let bytes = response
            .bytes()
            .await
            .map_err(|e| download_error(file_token, &e.to_string()))?;

        if is_json {
            let envelope: Envelope<DownloadIndirection> = serde_json::from_slice(&bytes)
                .map_err(|e| download_error(file_token, &e.to_string()))?;
            if envelope.code != 0 {
                return Err(download_error(file_token, &envelope.msg));
            }
            let link = envelope
                .data
                .and_then(|d| d.download_link.or(d.download_url))
                .filter(|u| u.starts_with("http"))
                .ok_or_else(|| download_error(file_token, "json reply without download link"))?;
            return self.fetch_plain(&link, file_token).await;
        }

        if bytes.is_empty() {
            return Err(download_error(file_token, "empty response body"));
        }
        Ok(bytes.to_vec())
    }

    async fn download_via_tmp_url(&self, file_token: &str) -> Result<Vec<u8>, PlatformError> {
        let url = self.api_url("/drive/v1/medias/batch_get_tmp_download_url");
        let request = self
            .http()
            .post(&url)
            .json(&serde_json::json!({ "file_tokens": [file_token] }));
        let urls: TmpDownloadUrls = self.call(request).await?;
        let link = urls
            .tmp_download_urls
            .into_iter()
            .find_map(|u| u.url)
            .ok_or_else(|| download_error(file_token, "no temporary download url"))?;
        self.fetch_plain(&link, file_token).await
    }

    /// Plain unauthenticated fetch of a pre-signed link.
    async fn fetch_plain(&self, url: &str, file_token: &str) -> Result<Vec<u8>, PlatformError> {
        let response = self
            .download_client()
            .get(url)
            .send()
            .await
            .map_err(|e| download_error(file_token, &e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(download_error(file_token, &format!("HTTP {status}")));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| download_error(file_token, &e.to_string()))?;
        if bytes.is_empty() {
            return Err(download_error(file_token, "empty file at download link"));
        }
        Ok(bytes.to_vec())
    }
}

fn download_error(file_token: &str, message: &str) -> PlatformError {
    PlatformError::Download {
        token: short_token(file_token),
        message: message.to_string(),
    }
}

/// Tokens are long and opaque; logs and errors carry only a prefix.
fn short_token(file_token: &str) -> String {
    file_token.chars().take(20).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn authed_server() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v3/tenant_access_token/internal"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "code": 0, "tenant_access_token": "t-abc", "expire": 7200,
            })))
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn direct_bytes_are_returned() {
        let server = authed_server().await;
        Mock::given(method("GET"))
            .and(path("/drive/v1/files/tok1/download"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/pdf")
                    .set_body_bytes(b"%PDF-1.4 fake".to_vec()),
            )
            .mount(&server)
            .await;

        let client = FeishuClient::with_base_url(&server.uri(), "a", "b");
        let bytes = client.download_file("tok1").await.unwrap();
        assert_eq!(bytes, b"%PDF-1.4 fake");
    }

    #[tokio::test]
    async fn json_reply_is_chased_to_the_download_link() {
        let server = authed_server().await;
        let target = format!("{}/signed/tok2", server.uri());
        Mock::given(method("GET"))
            .and(path("/drive/v1/files/tok2/download"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "code": 0,
                "data": { "download_link": target },
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/signed/tok2"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"real bytes".to_vec()))
            .mount(&server)
            .await;

        let client = FeishuClient::with_base_url(&server.uri(), "a", "b");
        let bytes = client.download_file("tok2").await.unwrap();
        assert_eq!(bytes, b"real bytes");
    }

    #[tokio::test]
    async fn tmp_url_fallback_kicks_in_after_drive_failure() {
        let server = authed_server().await;
        let target = format!("{}/tmp/tok3", server.uri());
        Mock::given(method("GET"))
            .and(path("/drive/v1/files/tok3/download"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/drive/v1/medias/batch_get_tmp_download_url"))
            .and(body_partial_json(serde_json::json!({ "file_tokens": ["tok3"] })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "code": 0,
                "data": { "tmp_download_urls": [{ "file_token": "tok3", "url": target }] },
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/tmp/tok3"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"media bytes".to_vec()))
            .mount(&server)
            .await;

        let client = FeishuClient::with_base_url(&server.uri(), "a", "b");
        let bytes = client.download_file("tok3").await.unwrap();
        assert_eq!(bytes, b"media bytes");
    }

    #[tokio::test]
    async fn both_paths_failing_reports_the_drive_error() {
        let server = authed_server().await;
        Mock::given(method("GET"))
            .and(path("/drive/v1/files/tok4/download"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/drive/v1/medias/batch_get_tmp_download_url"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "code": 0, "data": { "tmp_download_urls": [] },
            })))
            .mount(&server)
            .await;

        let client = FeishuClient::with_base_url(&server.uri(), "a", "b");
        let err = client.download_file("tok4").await.unwrap_err();
        assert!(err.to_string().contains("HTTP 404"));
    }

    #[tokio::test]
    async fn message_resource_download_targets_im_endpoint() {
        let server = authed_server().await;
        Mock::given(method("GET"))
            .and(path("/im/v1/messages/om_1/resources/key_1"))
            .and(wiremock::matchers::query_param("type", "file"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"chat file".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let client = FeishuClient::with_base_url(&server.uri(), "a", "b");
        let bytes = client
            .download_message_resource("om_1", "key_1", "file")
            .await
            .unwrap();
        assert_eq!(bytes, b"chat file");
    }

    #[test]
    fn long_tokens_are_shortened_in_errors() {
        let err = download_error(&"x".repeat(64), "boom");
        match err {
            PlatformError::Download { token, .. } => assert_eq!(token.len(), 20),
            other => panic!("unexpected error: {other}"),
        }
    }
}
