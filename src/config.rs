//! Environment-driven runtime configuration.
//!
//! Everything the process needs is read once at startup; a malformed or
//! missing required variable aborts before any network activity.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Lower bound for the poller interval, seconds.
pub const MIN_POLL_SECS: u64 = 5;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_RULES_FILE: &str = "approval_rules.yaml";
const DEFAULT_POLL_SECS: u64 = 60;
const DEFAULT_LOOKBACK_DAYS: i64 = 7;
const DEFAULT_MAX_FILE_MB: u64 = 15;
const DEFAULT_FEISHU_BASE: &str = "https://open.feishu.cn/open-apis";
const DEFAULT_DEEPSEEK_BASE: &str = "https://api.deepseek.com";

/// Immutable runtime configuration, shared by handle.
#[derive(Debug, Clone)]
pub struct Config {
    pub feishu_app_id: String,
    pub feishu_app_secret: String,
    pub deepseek_api_key: String,
    pub host: String,
    pub port: u16,
    pub rules_path: PathBuf,
    pub poll_interval: Duration,
    pub lookback_days: i64,
    pub max_file_mb: u64,
    /// Feishu event-subscription verification token. Unset skips the check.
    pub verify_token: Option<String>,
    /// Shared secret for `/debug-form`. Unset leaves the endpoint open.
    pub debug_token: Option<String>,
    /// External OCR sidecar for PDFs, office documents and images.
    pub ocr_url: Option<String>,
    pub feishu_base_url: String,
    pub deepseek_base_url: String,
}

impl Config {
    /// Loads configuration from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let poll_secs = parsed_var("LARKDESK_POLL_SECS", DEFAULT_POLL_SECS)?;

        Ok(Self {
            feishu_app_id: required_var("FEISHU_APP_ID")?,
            feishu_app_secret: required_var("FEISHU_APP_SECRET")?,
            deepseek_api_key: required_var("DEEPSEEK_API_KEY")?,
            host: string_var("LARKDESK_HOST", DEFAULT_HOST),
            port: parsed_var("LARKDESK_PORT", DEFAULT_PORT)?,
            rules_path: rules_path_from_env(),
            poll_interval: Duration::from_secs(poll_secs.max(MIN_POLL_SECS)),
            lookback_days: parsed_var("LARKDESK_LOOKBACK_DAYS", DEFAULT_LOOKBACK_DAYS)?,
            max_file_mb: parsed_var("LARKDESK_MAX_FILE_MB", DEFAULT_MAX_FILE_MB)?,
            verify_token: optional_var("LARKDESK_VERIFY_TOKEN"),
            debug_token: optional_var("LARKDESK_DEBUG_TOKEN"),
            ocr_url: optional_var("LARKDESK_OCR_URL"),
            feishu_base_url: string_var("FEISHU_BASE_URL", DEFAULT_FEISHU_BASE),
            deepseek_base_url: string_var("DEEPSEEK_BASE_URL", DEFAULT_DEEPSEEK_BASE),
        })
    }

    /// Attachment ceiling in bytes.
    #[must_use]
    pub fn max_file_bytes(&self) -> u64 {
        self.max_file_mb * 1024 * 1024
    }

    /// Rules file path from the environment alone. Lets `check-rules` run
    /// without the full credential set.
    #[must_use]
    pub fn default_rules_path() -> PathBuf {
        rules_path_from_env()
    }
}

fn required_var(var: &'static str) -> Result<String, ConfigError> {
    match std::env::var(var) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::MissingVar(var)),
    }
}

fn optional_var(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.trim().is_empty())
}

fn string_var(var: &str, default: &str) -> String {
    optional_var(var).unwrap_or_else(|| default.to_string())
}

fn parsed_var<T: std::str::FromStr>(var: &'static str, default: T) -> Result<T, ConfigError> {
    match optional_var(var) {
        Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
            var,
            message: format!("cannot parse {raw:?}"),
        }),
        None => Ok(default),
    }
}

fn rules_path_from_env() -> PathBuf {
    let raw = string_var("LARKDESK_RULES_FILE", DEFAULT_RULES_FILE);
    PathBuf::from(shellexpand::tilde(&raw).into_owned())
}
