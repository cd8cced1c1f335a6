use thiserror::Error;

// ─── Top-level error hierarchy ───────────────────────────────────────────────

/// Structured error hierarchy for `larkdesk`.
///
/// Each subsystem defines its own error variant. Library callers can match on
/// these to decide recovery strategy; internal code continues to use
/// `anyhow::Result` for ad-hoc context chains.
#[derive(Debug, Error)]
pub enum DeskError {
    // ── Config ───────────────────────────────────────────────────────────
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    // ── Approval rules ──────────────────────────────────────────────────
    #[error("rules: {0}")]
    Rules(#[from] RulesError),

    // ── Feishu platform ─────────────────────────────────────────────────
    #[error("platform: {0}")]
    Platform(#[from] PlatformError),

    // ── LLM ─────────────────────────────────────────────────────────────
    #[error("llm: {0}")]
    Llm(#[from] LlmError),

    // ── Form fields ─────────────────────────────────────────────────────
    #[error("field: {0}")]
    Field(#[from] FieldError),

    // ── Attachment extraction ───────────────────────────────────────────
    #[error("extract: {0}")]
    Extract(#[from] ExtractError),

    // ── Conversation flow ───────────────────────────────────────────────
    #[error("chat: {0}")]
    Chat(#[from] ChatError),

    // ── Generic fallthrough (wraps anyhow for interop) ──────────────────
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// ─── Config errors ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    MissingVar(&'static str),

    #[error("invalid value for {var}: {message}")]
    Invalid { var: &'static str, message: String },

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

// ─── Rule file errors ───────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum RulesError {
    #[error("failed to read rules file {path}: {message}")]
    Read { path: String, message: String },

    #[error("failed to parse rules file: {0}")]
    Parse(String),

    #[error("unknown ticket type in rules file: {0}")]
    UnknownType(String),
}

// ─── Feishu platform errors ─────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("feishu api error {code}: {msg}")]
    Api { code: i64, msg: String },

    #[error("request failed: {0}")]
    Request(String),

    #[error("unexpected response shape: {0}")]
    Decode(String),

    #[error("file download failed for token {token}: {message}")]
    Download { token: String, message: String },
}

// ─── LLM errors ─────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("deepseek request failed: {0}")]
    Request(String),

    #[error("deepseek returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("model reply was not valid JSON: {0}")]
    BadReply(String),

    #[error("retries exhausted after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },
}

// ─── Form field errors ──────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum FieldError {
    #[error("no field matching \"{label}\" on the {kind} form")]
    Unresolved { kind: String, label: String },

    #[error("form definition for {kind} could not be parsed: {message}")]
    BadDefinition { kind: String, message: String },
}

// ─── Attachment extraction errors ───────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("attachment {name} is {size_mb:.1} MB, over the {limit_mb} MB limit")]
    TooLarge {
        name: String,
        size_mb: f64,
        limit_mb: u64,
    },

    #[error("ocr service: {0}")]
    Ocr(String),
}

// ─── Conversation errors ────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("unsupported message type: {0}")]
    UnsupportedMessage(String),

    #[error("submission failed: {0}")]
    Submit(String),
}

// ─── Convenience re-exports ─────────────────────────────────────────────────

/// Shorthand result type for the crate.
pub type Result<T> = std::result::Result<T, DeskError>;
