//! DeepSeek-backed conversation analysis and document judgment.
//!
//! All model access goes through the [`IntentClassifier`] trait so the chat
//! and engine flows can run against a scripted classifier in tests. The one
//! production implementation is [`DeepSeekClient`].

mod analysis;
mod deepseek;

pub use deepseek::DeepSeekClient;

use std::future::Future;
use std::pin::Pin;

use chrono::NaiveDate;
use serde::Serialize;

use crate::error::LlmError;
use crate::tickets::{FieldMap, TicketKind};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One turn of a chat-completions conversation.
#[derive(Debug, Clone, Serialize)]
pub struct ChatTurn {
    pub role: TurnRole,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    System,
    User,
    Assistant,
}

impl ChatTurn {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Assistant,
            content: content.into(),
        }
    }
}

/// What the model made of a conversation.
#[derive(Debug, Clone, Default)]
pub struct IntentAnalysis {
    /// Recognized ticket kind, `None` when the intent is still unclear.
    pub kind: Option<TicketKind>,
    /// Field values extracted so far, keyed by logical field name.
    pub fields: FieldMap,
    /// Logical names of required fields the model could not infer.
    pub missing: Vec<String>,
    /// Chinese follow-up question when the kind cannot be determined.
    pub unclear: Option<String>,
}

/// Outcome of the seal-document judgment.
#[derive(Debug, Clone)]
pub struct SealJudgment {
    /// Document is lawful, risk-free and the seal type fits the document.
    pub compliant: bool,
    pub risk_points: Vec<String>,
    pub comment: String,
}

/// Outcome of the invoice attachment review.
#[derive(Debug, Clone)]
pub struct InvoiceReview {
    /// All attachments are contracts or agreements, nothing else.
    pub only_contract: bool,
    pub attachment_types: Vec<String>,
    pub comment: String,
}

/// Extracted text of one attachment; `text` is empty when extraction failed.
#[derive(Debug, Clone)]
pub struct AttachmentText {
    pub name: String,
    pub text: String,
}

pub trait IntentClassifier: Send + Sync {
    /// Analyzes a conversation: which ticket kind, which fields, what is missing.
    fn classify<'a>(
        &'a self,
        history: &'a [ChatTurn],
        today: NaiveDate,
    ) -> BoxFuture<'a, Result<IntentAnalysis, LlmError>>;

    /// Judges a seal-use document for legality, risk and seal-type fit.
    fn judge_seal<'a>(
        &'a self,
        file_name: &'a str,
        text: &'a str,
        seal_type: &'a str,
        doc_type: &'a str,
    ) -> BoxFuture<'a, Result<SealJudgment, LlmError>>;

    /// Classifies invoice attachments, flagging contract-only submissions.
    fn review_invoice<'a>(
        &'a self,
        parts: &'a [AttachmentText],
    ) -> BoxFuture<'a, Result<InvoiceReview, LlmError>>;

    /// Pulls invoice form fields out of a settlement sheet or contract.
    fn extract_invoice_fields<'a>(
        &'a self,
        file_name: &'a str,
        text: &'a str,
    ) -> BoxFuture<'a, Result<FieldMap, LlmError>>;
}
