//! Chat-driven ticket intake.
//!
//! The [`ChatHandler`] owns every conversation with the bot: switch commands
//! from reviewers, free-text intake classified by the model, invoice
//! attachments, and the confirm-then-submit handshake. Messages for one
//! sender are processed strictly in order; different senders run in parallel.

mod session;

pub use session::{ConfirmReading, ConvState, Session, read_confirmation};

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use serde_json::Value;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{ChatError, DeskError, ExtractError, PlatformError};
use crate::extract::Extractor;
use crate::fields::{FieldCache, build_form};
use crate::llm::{IntentAnalysis, IntentClassifier};
use crate::platform::{FREE_PROCESS_CODE, FeishuClient};
use crate::rules::{RuleStore, SwitchCommand, ToggleOutcome};
use crate::tickets::{FieldMap, TicketKind};

use session::{overlay_fields, unresolved_missing};

/// Event ids remembered for webhook redelivery dedupe.
const SEEN_EVENTS_CAP: usize = 1024;

/// One decoded `im.message.receive_v1` event.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub event_id: String,
    pub message_id: String,
    /// Reply address.
    pub open_id: String,
    /// Submission identity for `create_instance` and the reviewer allowlist.
    pub user_id: String,
    pub content: MessageContent,
}

#[derive(Debug, Clone)]
pub enum MessageContent {
    Text(String),
    File {
        file_key: String,
        file_name: String,
        /// The platform's `file` / `image` resource discriminator.
        resource_type: String,
    },
    Unsupported(String),
}

pub struct ChatHandler {
    platform: Arc<FeishuClient>,
    rules: Arc<RuleStore>,
    fields: Arc<FieldCache>,
    classifier: Arc<dyn IntentClassifier>,
    extractor: Extractor,
    /// Wakes the poll loop for the `poll` chat command.
    poke: Arc<Notify>,
    sessions: StdMutex<HashMap<String, Arc<Mutex<Session>>>>,
    seen_events: StdMutex<SeenEvents>,
    /// Kinds the platform refused to create over the API (free-process
    /// definitions). Remembered for the process lifetime.
    link_only: StdMutex<HashSet<TicketKind>>,
}

impl ChatHandler {
    pub fn new(
        config: &Config,
        platform: Arc<FeishuClient>,
        rules: Arc<RuleStore>,
        fields: Arc<FieldCache>,
        classifier: Arc<dyn IntentClassifier>,
        poke: Arc<Notify>,
    ) -> Self {
        Self {
            platform,
            rules,
            fields,
            classifier,
            extractor: Extractor::new(config),
            poke,
            sessions: StdMutex::new(HashMap::new()),
            seen_events: StdMutex::new(SeenEvents::default()),
            link_only: StdMutex::new(HashSet::new()),
        }
    }

    /// Handles one inbound message end to end, including the reply. Never
    /// propagates an error to the gateway; failures turn into an apology to
    /// the sender.
    pub async fn handle(&self, msg: IncomingMessage) {
        if !self.mark_event_seen(&msg.event_id) {
            debug!(event_id = %msg.event_id, "duplicate event dropped");
            return;
        }

        let session = self.session_for(&msg.open_id);
        let mut session = session.lock().await;

        if let Err(e) = self.dispatch(&msg, &mut session).await {
            warn!(open_id = %msg.open_id, error = %e, "message handling failed");
            let reply = match &e {
                DeskError::Chat(ChatError::Submit(detail)) => {
                    format!("提交失败，错误信息：{detail}")
                }
                _ => "系统出现异常，请稍后再试。".to_string(),
            };
            if let Err(send_err) = self.platform.send_text(&msg.open_id, &reply).await {
                warn!(open_id = %msg.open_id, error = %send_err, "error reply failed");
            }
        }
    }

    async fn dispatch(&self, msg: &IncomingMessage, session: &mut Session) -> Result<(), DeskError> {
        match &msg.content {
            MessageContent::Text(text) => self.handle_text(msg, session, text.trim()).await,
            MessageContent::File {
                file_key,
                file_name,
                resource_type,
            } => {
                self.handle_file(msg, session, file_key, file_name, resource_type)
                    .await
            }
            MessageContent::Unsupported(message_type) => {
                debug!(message_type, "unsupported message type");
                self.reply(&msg.open_id, "暂时无法处理这类消息，请用文字告诉我你的需求。")
                    .await
            }
        }
    }

    async fn handle_text(
        &self,
        msg: &IncomingMessage,
        session: &mut Session,
        text: &str,
    ) -> Result<(), DeskError> {
        if text.is_empty() {
            return Ok(());
        }

        // Reviewer switch commands bypass the classifier entirely.
        if let Some(command) = self.rules.parse_command(text) {
            return self.handle_command(msg, command).await;
        }

        if matches!(session.state(), ConvState::Confirming { .. }) {
            match read_confirmation(text) {
                ConfirmReading::Affirm => {
                    if let Some((kind, fields)) = session.take_confirming() {
                        return self.submit(msg, session, kind, fields).await;
                    }
                }
                ConfirmReading::Cancel => {
                    session.reset();
                    return self
                        .reply(&msg.open_id, "已取消本次申请。如需重新办理，请告诉我。")
                        .await;
                }
                // A revision: fall back to collecting and re-classify with
                // the new message in history.
                ConfirmReading::Other => {
                    let _ = session.take_confirming();
                }
            }
        }

        session.push_user(text);
        let today = chrono::Local::now().date_naive();
        let analysis = match self.classifier.classify(session.history(), today).await {
            Ok(analysis) => analysis,
            Err(e) => {
                warn!(error = %e, "intent analysis failed");
                IntentAnalysis {
                    unclear: Some("AI助手暂时无法响应，请稍后再试。".to_string()),
                    ..IntentAnalysis::default()
                }
            }
        };

        let Some(kind) = analysis.kind else {
            let reply = analysis.unclear.unwrap_or_else(menu_text);
            self.reply(&msg.open_id, &reply).await?;
            session.push_assistant(reply);
            return Ok(());
        };
        session.note_kind(kind);

        // Free-process definitions cannot be created over the API; hand the
        // sender the approval-center link instead of collecting fields.
        if self.is_link_only(kind) {
            let code = self.rules.snapshot().approval_code(kind).to_string();
            let reply = link_reply(kind, &code);
            self.reply(&msg.open_id, &reply).await?;
            session.reset();
            return Ok(());
        }

        let merged = overlay_fields(session.extracted(), &analysis.fields);
        let missing = unresolved_missing(&analysis.missing, &merged);
        if !missing.is_empty() {
            let labels = missing
                .iter()
                .map(|name| kind.label_for(name).unwrap_or(name.as_str()))
                .collect::<Vec<_>>()
                .join("、");
            let reply = format!(
                "还需要以下信息才能提交{}申请：\n{labels}",
                kind.display_name()
            );
            self.reply(&msg.open_id, &reply).await?;
            session.push_assistant(reply);
            return Ok(());
        }

        let summary = confirm_summary(kind, &merged);
        session.begin_confirming(kind, merged);
        self.reply(&msg.open_id, &summary).await?;
        session.push_assistant(summary);
        Ok(())
    }

    /// Invoice attachments: download, extract text, pull form fields out of
    /// it and remember them for the running conversation.
    async fn handle_file(
        &self,
        msg: &IncomingMessage,
        session: &mut Session,
        file_key: &str,
        file_name: &str,
        resource_type: &str,
    ) -> Result<(), DeskError> {
        let Some(kind) = session.kind_hint().filter(|k| k.supports_extraction()) else {
            return self
                .reply(
                    &msg.open_id,
                    "我目前只能识别开票申请的结算单和合同附件，请先告诉我你要办理的审批类型。",
                )
                .await;
        };

        session.push_user(format!("[文件] {file_name}"));

        let bytes = match self
            .platform
            .download_message_resource(&msg.message_id, file_key, resource_type)
            .await
        {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(file_name, error = %e, "message resource download failed");
                return self
                    .reply(&msg.open_id, &format!("文件「{file_name}」下载失败，请重新发送。"))
                    .await;
            }
        };

        let text = match self.extractor.extract_text(&bytes, file_name).await {
            Ok(text) => text,
            Err(ExtractError::TooLarge {
                size_mb, limit_mb, ..
            }) => {
                let reply = format!(
                    "文件「{file_name}」大小 {size_mb:.1} MB 超过 {limit_mb} MB 限制，请压缩后重新发送。"
                );
                return self.reply(&msg.open_id, &reply).await;
            }
            Err(e) => {
                warn!(file_name, error = %e, "attachment extraction failed");
                String::new()
            }
        };

        let extracted = match self.classifier.extract_invoice_fields(file_name, &text).await {
            Ok(fields) => fields,
            Err(e) => {
                warn!(file_name, error = %e, "invoice field extraction failed");
                FieldMap::new()
            }
        };

        if extracted.is_empty() {
            let reply = format!("未能从「{file_name}」识别到开票信息，请确认文件内容或补充说明。");
            self.reply(&msg.open_id, &reply).await?;
            session.push_assistant(reply);
            return Ok(());
        }

        let lines = field_lines(kind, &extracted).join("\n");
        let reply = format!("已从「{file_name}」识别到以下信息：\n{lines}\n\n可以继续补充其他开票信息，或发送更多附件。");
        session.merge_extracted(extracted);
        self.reply(&msg.open_id, &reply).await?;
        session.push_assistant(reply);
        Ok(())
    }

    async fn handle_command(
        &self,
        msg: &IncomingMessage,
        command: SwitchCommand,
    ) -> Result<(), DeskError> {
        let reply = match command {
            SwitchCommand::Enable | SwitchCommand::Disable => {
                let enabled = command == SwitchCommand::Enable;
                match self.rules.set_enabled(&msg.user_id, enabled) {
                    ToggleOutcome::Updated { enabled: true } => "✅ 自动审批已开启".to_string(),
                    ToggleOutcome::Updated { enabled: false } => "✅ 自动审批已关闭".to_string(),
                    ToggleOutcome::Unauthorized => refusal_text(),
                }
            }
            SwitchCommand::Status => {
                if self.rules.is_operator(&msg.user_id) {
                    self.rules.status_text(&msg.user_id)
                } else {
                    refusal_text()
                }
            }
            SwitchCommand::PollNow => {
                if self.rules.is_operator(&msg.user_id) {
                    info!(user_id = %msg.user_id, "manual poll requested");
                    self.poke.notify_one();
                    "已触发一次审批轮询。".to_string()
                } else {
                    refusal_text()
                }
            }
        };
        self.reply(&msg.open_id, &reply).await
    }

    async fn submit(
        &self,
        msg: &IncomingMessage,
        session: &mut Session,
        kind: TicketKind,
        fields: FieldMap,
    ) -> Result<(), DeskError> {
        let code = self.rules.snapshot().approval_code(kind).to_string();
        let admin_comment = kind.admin_comment(&fields);

        let schema = self
            .fields
            .schema(kind, &code)
            .await
            .map_err(|e| ChatError::Submit(e.to_string()))?;
        let form = match build_form(kind, &schema, &fields) {
            Ok(form) => form,
            Err(e) => {
                // A stale schema is the usual cause; refetch next time.
                self.fields.invalidate(kind).await;
                return Err(ChatError::Submit(e.to_string()).into());
            }
        };

        match self.platform.create_instance(&code, &msg.user_id, &form).await {
            Ok(()) => {
                info!(kind = %kind, user_id = %msg.user_id, "approval instance created");
                let reply = success_reply(kind, &fields, &admin_comment);
                self.reply(&msg.open_id, &reply).await?;
                session.reset();
                Ok(())
            }
            Err(PlatformError::Api { code: api_code, .. }) if api_code == FREE_PROCESS_CODE => {
                info!(kind = %kind, "definition is submit-only, switching to link flow");
                self.remember_link_only(kind);
                let reply = link_reply(kind, &code);
                self.reply(&msg.open_id, &reply).await?;
                session.reset();
                Ok(())
            }
            Err(PlatformError::Api { msg: api_msg, .. }) => {
                self.fields.invalidate(kind).await;
                Err(ChatError::Submit(api_msg).into())
            }
            Err(e) => {
                self.fields.invalidate(kind).await;
                Err(ChatError::Submit(e.to_string()).into())
            }
        }
    }

    async fn reply(&self, open_id: &str, text: &str) -> Result<(), DeskError> {
        self.platform.send_text(open_id, text).await?;
        Ok(())
    }

    fn session_for(&self, open_id: &str) -> Arc<Mutex<Session>> {
        let mut sessions = self
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        sessions.entry(open_id.to_string()).or_default().clone()
    }

    fn mark_event_seen(&self, event_id: &str) -> bool {
        let mut seen = self
            .seen_events
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        seen.insert(event_id)
    }

    fn is_link_only(&self, kind: TicketKind) -> bool {
        self.link_only
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&kind)
    }

    fn remember_link_only(&self, kind: TicketKind) {
        self.link_only
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(kind);
    }
}

/// Recently seen event ids, oldest evicted first.
#[derive(Default)]
struct SeenEvents {
    ids: HashSet<String>,
    order: VecDeque<String>,
}

impl SeenEvents {
    /// Records `id`; returns false when it was already present.
    fn insert(&mut self, id: &str) -> bool {
        if self.ids.contains(id) {
            return false;
        }
        self.ids.insert(id.to_string());
        self.order.push_back(id.to_string());
        while self.order.len() > SEEN_EVENTS_CAP {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
        true
    }
}

fn menu_text() -> String {
    let types = TicketKind::all()
        .map(TicketKind::display_name)
        .collect::<Vec<_>>()
        .join("、");
    format!("你好！我可以帮你提交以下审批：\n{types}\n\n请告诉我你需要办理哪种？")
}

fn refusal_text() -> String {
    "你不在审批人名单中，无法操作自动审批。".to_string()
}

fn link_reply(kind: TicketKind, approval_code: &str) -> String {
    let link = crate::platform::approval_create_link(approval_code);
    format!("请点击以下链接提交{}申请：\n{link}", kind.display_name())
}

fn confirm_summary(kind: TicketKind, fields: &FieldMap) -> String {
    let mut lines = vec![format!("请确认以下{}申请信息：", kind.display_name())];
    lines.extend(field_lines(kind, fields));
    lines.push(String::new());
    lines.push("确认无误请回复「确认」，需要修改直接告诉我，回复「取消」放弃。".to_string());
    lines.join("\n")
}

fn success_reply(kind: TicketKind, fields: &FieldMap, admin_comment: &str) -> String {
    let mut lines = vec![format!("✅ 已为你提交{}申请！", kind.display_name())];
    lines.extend(field_lines(kind, fields));
    lines.push(format!("\n💡 行政意见: {admin_comment}"));
    lines.push("等待主管审批即可。".to_string());
    lines.join("\n")
}

/// One `· 标签: 值` line per populated field, declared fields first in form
/// order, any extras after.
fn field_lines(kind: TicketKind, fields: &FieldMap) -> Vec<String> {
    let mut lines = Vec::new();
    for spec in kind.field_specs() {
        if let Some(value) = fields.get(spec.name)
            && !value.is_null()
        {
            lines.push(format!("· {}: {}", spec.label, render_value(value)));
        }
    }
    for (name, value) in fields {
        if kind.field(name).is_none() && !value.is_null() {
            let label = kind.label_for(name).unwrap_or(name.as_str());
            lines.push(format!("· {label}: {}", render_value(value)));
        }
    }
    lines
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(pairs: &[(&str, &str)]) -> FieldMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), json!(v)))
            .collect()
    }

    #[test]
    fn menu_lists_every_kind() {
        let menu = menu_text();
        for kind in TicketKind::all() {
            assert!(menu.contains(kind.display_name()), "{menu}");
        }
        assert!(menu.starts_with("你好！"));
    }

    #[test]
    fn seen_events_dedupe_and_eviction() {
        let mut seen = SeenEvents::default();
        assert!(seen.insert("e1"));
        assert!(!seen.insert("e1"));
        for i in 0..SEEN_EVENTS_CAP {
            seen.insert(&format!("fill-{i}"));
        }
        // e1 was the oldest entry and fell out, so it reads as new again.
        assert!(seen.insert("e1"));
    }

    #[test]
    fn success_reply_echoes_fields_and_comment() {
        let fields = map(&[("purchase_reason", "办公椅"), ("purchase_type", "办公用品")]);
        let reply = success_reply(TicketKind::Purchase, &fields, "常规采购，请审批");
        assert!(reply.starts_with("✅ 已为你提交采购申请！"));
        assert!(reply.contains("· 采购事由: 办公椅"));
        assert!(reply.contains("💡 行政意见: 常规采购，请审批"));
        assert!(reply.ends_with("等待主管审批即可。"));
    }

    #[test]
    fn field_lines_follow_declaration_order() {
        let fields = map(&[
            ("cost_detail", "3000元"),
            ("purchase_reason", "办公椅"),
            ("memo", "急"),
        ]);
        let lines = field_lines(TicketKind::Purchase, &fields);
        assert_eq!(lines[0], "· 采购事由: 办公椅");
        assert_eq!(lines[1], "· 费用明细: 3000元");
        // Unknown fields trail with their raw name.
        assert_eq!(lines[2], "· memo: 急");
    }

    #[test]
    fn confirm_summary_asks_for_a_decision() {
        let summary = confirm_summary(TicketKind::SealUse, &map(&[("seal_type", "公章")]));
        assert!(summary.starts_with("请确认以下用印申请信息："));
        assert!(summary.contains("· 印章类型: 公章"));
        assert!(summary.contains("「确认」"));
        assert!(summary.contains("「取消」"));
    }

    #[test]
    fn link_reply_carries_the_deep_link() {
        let reply = link_reply(TicketKind::Purchase, "ABC-123");
        assert!(reply.contains("采购申请"));
        assert!(reply.contains("https://applink.feishu.cn/client/approval/create?approvalCode=ABC-123"));
    }
}
