//! Shared harness: a scripted classifier standing in for DeepSeek, plus
//! canned Feishu API mocks.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::NaiveDate;
use serde_json::Value;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use larkdesk::Config;
use larkdesk::error::LlmError;
use larkdesk::llm::{
    AttachmentText, BoxFuture, ChatTurn, IntentAnalysis, IntentClassifier, InvoiceReview,
    SealJudgment,
};
use larkdesk::tickets::{FieldMap, TicketKind};

/// Configuration pointing every outbound Feishu call at `feishu_base`.
pub fn test_config(feishu_base: &str) -> Config {
    Config {
        feishu_app_id: "cli_test".to_string(),
        feishu_app_secret: "s3cret".to_string(),
        deepseek_api_key: "sk-test".to_string(),
        host: "127.0.0.1".to_string(),
        port: 0,
        rules_path: PathBuf::from("approval_rules.yaml"),
        poll_interval: Duration::from_secs(5),
        lookback_days: 7,
        max_file_mb: 15,
        verify_token: None,
        debug_token: None,
        ocr_url: None,
        feishu_base_url: feishu_base.to_string(),
        deepseek_base_url: "http://127.0.0.1:9".to_string(),
    }
}

/// Builds an [`IntentAnalysis`] from string fields and missing names.
pub fn analysis(
    kind: Option<TicketKind>,
    fields: &[(&str, &str)],
    missing: &[&str],
) -> IntentAnalysis {
    IntentAnalysis {
        kind,
        fields: fields
            .iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
            .collect(),
        missing: missing.iter().map(ToString::to_string).collect(),
        unclear: None,
    }
}

/// [`IntentClassifier`] replaying queued responses. An exhausted queue
/// answers with an error, so a missing script shows up in assertions.
#[derive(Default)]
pub struct ScriptedClassifier {
    analyses: Mutex<VecDeque<IntentAnalysis>>,
    seal_judgments: Mutex<VecDeque<SealJudgment>>,
    invoice_reviews: Mutex<VecDeque<InvoiceReview>>,
    extractions: Mutex<VecDeque<FieldMap>>,
    classify_calls: AtomicUsize,
    review_calls: AtomicUsize,
}

impl ScriptedClassifier {
    pub fn push_analysis(&self, item: IntentAnalysis) {
        self.analyses.lock().unwrap().push_back(item);
    }

    pub fn push_seal(&self, item: SealJudgment) {
        self.seal_judgments.lock().unwrap().push_back(item);
    }

    pub fn push_invoice(&self, item: InvoiceReview) {
        self.invoice_reviews.lock().unwrap().push_back(item);
    }

    pub fn push_extraction(&self, item: FieldMap) {
        self.extractions.lock().unwrap().push_back(item);
    }

    pub fn classify_calls(&self) -> usize {
        self.classify_calls.load(Ordering::SeqCst)
    }

    pub fn review_calls(&self) -> usize {
        self.review_calls.load(Ordering::SeqCst)
    }
}

impl IntentClassifier for ScriptedClassifier {
    fn classify<'a>(
        &'a self,
        _history: &'a [ChatTurn],
        _today: NaiveDate,
    ) -> BoxFuture<'a, Result<IntentAnalysis, LlmError>> {
        self.classify_calls.fetch_add(1, Ordering::SeqCst);
        let next = self.analyses.lock().unwrap().pop_front();
        Box::pin(async move {
            next.ok_or_else(|| LlmError::Request("no scripted analysis left".into()))
        })
    }

    fn judge_seal<'a>(
        &'a self,
        _file_name: &'a str,
        _text: &'a str,
        _seal_type: &'a str,
        _doc_type: &'a str,
    ) -> BoxFuture<'a, Result<SealJudgment, LlmError>> {
        let next = self.seal_judgments.lock().unwrap().pop_front();
        Box::pin(async move {
            next.ok_or_else(|| LlmError::Request("no scripted seal judgment left".into()))
        })
    }

    fn review_invoice<'a>(
        &'a self,
        _parts: &'a [AttachmentText],
    ) -> BoxFuture<'a, Result<InvoiceReview, LlmError>> {
        self.review_calls.fetch_add(1, Ordering::SeqCst);
        let next = self.invoice_reviews.lock().unwrap().pop_front();
        Box::pin(async move {
            next.ok_or_else(|| LlmError::Request("no scripted invoice review left".into()))
        })
    }

    fn extract_invoice_fields<'a>(
        &'a self,
        _file_name: &'a str,
        _text: &'a str,
    ) -> BoxFuture<'a, Result<FieldMap, LlmError>> {
        let next = self.extractions.lock().unwrap().pop_front();
        Box::pin(async move {
            next.ok_or_else(|| LlmError::Request("no scripted extraction left".into()))
        })
    }
}

/// Token endpoint; every authenticated call fetches it first.
pub async fn mount_token(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/auth/v3/tenant_access_token/internal"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "code": 0, "tenant_access_token": "t-test", "expire": 7200,
        })))
        .mount(server)
        .await;
}

/// Accepts every outbound text message.
pub async fn mount_send_text(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/im/v1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "code": 0, "data": {},
        })))
        .mount(server)
        .await;
}

/// Text bodies the assistant sent through `/im/v1/messages`, in order.
pub async fn texts_sent(server: &MockServer) -> Vec<String> {
    let requests = server
        .received_requests()
        .await
        .expect("request recording should be enabled");
    requests
        .iter()
        .filter(|r| r.url.path() == "/im/v1/messages")
        .map(|r| {
            let body: Value = serde_json::from_slice(&r.body).expect("send body should be json");
            let content = body["content"]
                .as_str()
                .expect("content should be a string");
            let inner: Value =
                serde_json::from_str(content).expect("content should be double-encoded json");
            inner["text"].as_str().unwrap_or_default().to_string()
        })
        .collect()
}
