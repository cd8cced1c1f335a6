//! Attachment text extraction.
//!
//! Plain-text attachments are read directly. PDFs, office documents and
//! images go to an external OCR sidecar when one is configured; without
//! one their content is skipped and downstream judgments reason from
//! file names alone. Extraction failures are soft for the same reason —
//! only an over-limit attachment is a hard error, because that one is
//! surfaced to the user.

use serde::Deserialize;

use crate::config::Config;
use crate::error::ExtractError;
use crate::platform::build_http_client;

/// Cap on text handed to judgment prompts.
const MAX_TEXT_CHARS: usize = 8000;

pub struct Extractor {
    max_bytes: u64,
    ocr_url: Option<String>,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct OcrReply {
    text: Option<String>,
}

impl Extractor {
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self::with_limits(config.max_file_bytes(), config.ocr_url.clone())
    }

    #[must_use]
    pub fn with_limits(max_bytes: u64, ocr_url: Option<String>) -> Self {
        Self {
            max_bytes,
            ocr_url,
            client: build_http_client(60),
        }
    }

    /// Extracts text from one attachment, truncated to the prompt cap.
    ///
    /// Returns an empty string whenever content cannot be extracted; the
    /// only error is an attachment over the size ceiling.
    pub async fn extract_text(&self, bytes: &[u8], name: &str) -> Result<String, ExtractError> {
        if bytes.is_empty() {
            return Ok(String::new());
        }
        if bytes.len() as u64 > self.max_bytes {
            return Err(ExtractError::TooLarge {
                name: name.to_string(),
                size_mb: bytes.len() as f64 / (1024.0 * 1024.0),
                limit_mb: self.max_bytes / (1024 * 1024),
            });
        }

        let mime = sniff_mime(bytes, name);
        if mime.type_() == mime::TEXT {
            return Ok(truncate(&String::from_utf8_lossy(bytes)));
        }

        let Some(url) = &self.ocr_url else {
            tracing::warn!(name, mime = %mime, "no ocr sidecar configured, content skipped");
            return Ok(String::new());
        };
        match self.ocr(url, bytes, name, mime.as_ref()).await {
            Ok(text) => Ok(truncate(&text)),
            Err(e) => {
                tracing::warn!(name, error = %e, "ocr extraction failed, content skipped");
                Ok(String::new())
            }
        }
    }

    async fn ocr(
        &self,
        url: &str,
        bytes: &[u8],
        name: &str,
        mime: &str,
    ) -> Result<String, ExtractError> {
        let part = reqwest::multipart::Part::bytes(bytes.to_vec())
            .file_name(name.to_string())
            .mime_str(mime)
            .map_err(|e| ExtractError::Ocr(e.to_string()))?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .client
            .post(url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| ExtractError::Ocr(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ExtractError::Ocr(format!("HTTP {status}")));
        }
        let reply: OcrReply = response
            .json()
            .await
            .map_err(|e| ExtractError::Ocr(e.to_string()))?;
        Ok(reply.text.unwrap_or_default())
    }
}

/// Magic bytes first, file extension second.
fn sniff_mime(bytes: &[u8], name: &str) -> mime::Mime {
    if let Some(info) = infer::get(bytes)
        && let Ok(parsed) = info.mime_type().parse()
    {
        return parsed;
    }
    let ext = name
        .rsplit('.')
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();
    match ext.as_str() {
        "pdf" => mime::APPLICATION_PDF,
        "png" => mime::IMAGE_PNG,
        "jpg" | "jpeg" => mime::IMAGE_JPEG,
        "bmp" => mime::IMAGE_BMP,
        "gif" => mime::IMAGE_GIF,
        "webp" => parse_or_octet("image/webp"),
        "doc" => parse_or_octet("application/msword"),
        "docx" => {
            parse_or_octet("application/vnd.openxmlformats-officedocument.wordprocessingml.document")
        }
        "xls" => parse_or_octet("application/vnd.ms-excel"),
        "xlsx" => {
            parse_or_octet("application/vnd.openxmlformats-officedocument.spreadsheetml.sheet")
        }
        "csv" => mime::TEXT_CSV,
        "txt" | "md" | "log" => mime::TEXT_PLAIN_UTF_8,
        _ => mime::APPLICATION_OCTET_STREAM,
    }
}

fn parse_or_octet(raw: &str) -> mime::Mime {
    raw.parse().unwrap_or(mime::APPLICATION_OCTET_STREAM)
}

fn truncate(text: &str) -> String {
    if text.chars().count() <= MAX_TEXT_CHARS {
        text.to_string()
    } else {
        text.chars().take(MAX_TEXT_CHARS).collect()
    }
}
