//! Scheduled auto-approval of pending tickets.
//!
//! The poll loop runs at a fixed interval, queries PENDING instances for
//! every pollable kind, and decides the allowlisted reviewers' tasks
//! according to the rule set. Cycles never overlap; a chat `poll` command
//! nudges the loop instead of spawning a second pass. Per-task failures
//! are logged and retried on the next cycle, relying on the platform to
//! reject a second decision on an already-decided task.

mod cache;

pub use cache::{Judgment, JudgmentCache};

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;

use crate::config::Config;
use crate::error::{DeskError, ExtractError};
use crate::extract::Extractor;
use crate::fields::{self, FieldCache};
use crate::llm::{AttachmentText, IntentClassifier};
use crate::platform::{FeishuClient, TaskRef};
use crate::rules::{ApprovalRule, RuleStore};
use crate::tickets::{FieldMap, TicketKind};

/// Invoice reviews read at most this many attachments.
const INVOICE_MAX_ATTACHMENTS: usize = 10;

pub struct AutoApprovalEngine {
    platform: Arc<FeishuClient>,
    rules: Arc<RuleStore>,
    fields: Arc<FieldCache>,
    classifier: Arc<dyn IntentClassifier>,
    extractor: Extractor,
    judgments: JudgmentCache,
    lookback_days: i64,
    poll_interval: std::time::Duration,
    poke: Arc<Notify>,
}

impl AutoApprovalEngine {
    #[must_use]
    pub fn new(
        config: &Config,
        platform: Arc<FeishuClient>,
        rules: Arc<RuleStore>,
        fields: Arc<FieldCache>,
        classifier: Arc<dyn IntentClassifier>,
    ) -> Self {
        Self {
            platform,
            rules,
            fields,
            classifier,
            extractor: Extractor::new(config),
            judgments: JudgmentCache::default(),
            lookback_days: config.lookback_days,
            poll_interval: config.poll_interval,
            poke: Arc::new(Notify::new()),
        }
    }

    /// Handle for nudging the loop from outside (chat `poll` command).
    #[must_use]
    pub fn poke_handle(&self) -> Arc<Notify> {
        self.poke.clone()
    }

    /// Polls forever. The first pass runs immediately.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.poke.notified() => {
                    tracing::info!("poll requested through chat");
                }
            }
            self.rules.maybe_reload();
            self.poll_once().await;
        }
    }

    /// One full poll pass over every pollable kind.
    pub async fn poll_once(&self) {
        let snapshot = self.rules.snapshot();
        let active: Vec<&str> = snapshot
            .operators
            .iter()
            .filter(|op| self.rules.is_enabled(op))
            .map(String::as_str)
            .collect();
        if active.is_empty() {
            tracing::debug!("no enabled reviewers, skipping poll");
            return;
        }

        for (kind, approval_code) in snapshot.kinds_to_poll() {
            let rule = snapshot.rule(kind);
            if !rule.auto_approve {
                continue;
            }
            let instances = match self
                .platform
                .pending_instances(&approval_code, self.lookback_days)
                .await
            {
                Ok(list) => list,
                Err(e) => {
                    tracing::warn!(kind = %kind, error = %e, "pending instance query failed");
                    continue;
                }
            };
            for instance_code in instances {
                if let Err(e) = self
                    .visit_instance(kind, &rule, &approval_code, &instance_code, &active)
                    .await
                {
                    tracing::warn!(
                        kind = %kind,
                        instance = %instance_code,
                        error = %e,
                        "instance processing failed"
                    );
                }
            }
        }
    }

    /// Decides the first enabled reviewer's pending task on one instance.
    async fn visit_instance(
        &self,
        kind: TicketKind,
        rule: &ApprovalRule,
        approval_code: &str,
        instance_code: &str,
        active: &[&str],
    ) -> Result<(), DeskError> {
        let detail = self.platform.instance_detail(instance_code).await?;
        let Some((operator, task)) = active
            .iter()
            .find_map(|op| detail.pending_task_for(op).map(|task| (*op, task)))
        else {
            return Ok(());
        };
        let task = TaskRef {
            approval_code: approval_code.to_string(),
            instance_code: instance_code.to_string(),
            user_id: operator.to_string(),
            task_id: task.id.clone(),
        };
        tracing::info!(
            kind = %kind,
            instance = %instance_code,
            operator,
            "pending task found"
        );
        self.process_task(kind, rule, &detail, &task).await
    }

    async fn process_task(
        &self,
        kind: TicketKind,
        rule: &ApprovalRule,
        detail: &crate::platform::types::InstanceDetail,
        task: &TaskRef,
    ) -> Result<(), DeskError> {
        if !rule.ai_review {
            let comment = pass_comment(kind, rule);
            self.platform.approve_task(task, &comment).await?;
            tracing::info!(kind = %kind, instance = %task.instance_code, "task auto-approved");
            return Ok(());
        }

        if let Some(judgment) = self.judgments.get(&task.instance_code) {
            tracing::debug!(instance = %task.instance_code, "using cached judgment");
            return self.apply(task, &judgment, true).await;
        }

        let judgment = match kind {
            TicketKind::SealUse => self.judge_seal_ticket(rule, detail, task).await?,
            TicketKind::Invoice => self.judge_invoice_ticket(rule, detail).await?,
            // Review-gated kinds without a judgment flow always go to a human.
            _ => Judgment::Pend {
                comment: "【自动审批】需人工审核。".to_string(),
            },
        };
        self.judgments.put(&task.instance_code, judgment.clone());
        self.apply(task, &judgment, false).await
    }

    /// Carries a judgment out against the platform. Cached `Pend` outcomes
    /// are silent so the instance is not commented on every cycle.
    async fn apply(
        &self,
        task: &TaskRef,
        judgment: &Judgment,
        from_cache: bool,
    ) -> Result<(), DeskError> {
        match judgment {
            Judgment::Approve { comment } => {
                self.platform.approve_task(task, comment).await?;
                tracing::info!(instance = %task.instance_code, "task approved");
            }
            Judgment::Reject { comment } => {
                self.platform.reject_task(task, comment).await?;
                tracing::info!(instance = %task.instance_code, "task rejected");
            }
            Judgment::Pend { comment } => {
                if from_cache {
                    tracing::debug!(instance = %task.instance_code, "already commented, awaiting human review");
                } else {
                    self.platform.add_comment(&task.instance_code, comment).await?;
                    tracing::info!(instance = %task.instance_code, "left for human review");
                }
            }
        }
        Ok(())
    }

    /// Seal flow: every attachment must pass the compliance judgment.
    async fn judge_seal_ticket(
        &self,
        rule: &ApprovalRule,
        detail: &crate::platform::types::InstanceDetail,
        task: &TaskRef,
    ) -> Result<Judgment, DeskError> {
        let kind = TicketKind::SealUse;
        let items = detail.form_items();
        let schema = self.fields.schema(kind, &task.approval_code).await?;
        let fields_map = fields::parse_form(kind, &schema, &items);
        let (seal_type, doc_name, doc_type) = seal_context(&fields_map);

        let attachments = fields::collect_attachments(&items);
        if attachments.is_empty() {
            return Ok(Judgment::Pend {
                comment: "【自动审批】用印申请单缺少附件，无法进行 AI 分析，请人工审批。"
                    .to_string(),
            });
        }
        if seal_type.is_empty() {
            return Ok(Judgment::Pend {
                comment: "【自动审批】用印申请单缺少印章类型，请人工审批。".to_string(),
            });
        }

        let base_name = if doc_name.is_empty() { "未知" } else { doc_name.as_str() };
        let default_name = if doc_type.is_empty() {
            base_name.to_string()
        } else {
            format!("{base_name}.{doc_type}")
        };
        let declared_doc = if doc_type.is_empty() {
            base_name.to_string()
        } else {
            format!("{base_name}（{doc_type}）")
        };

        for (i, attachment) in attachments.iter().enumerate() {
            let ordinal = i + 1;
            let bytes = match self.platform.download_file(&attachment.token).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!(
                        instance = %task.instance_code,
                        attachment = ordinal,
                        error = %e,
                        "seal attachment download failed"
                    );
                    return Ok(Judgment::Pend {
                        comment: format!(
                            "【自动审批】附件{ordinal}下载失败（{e}），无法进行 AI 分析，请人工审批。"
                        ),
                    });
                }
            };
            let name = if attachment.name.is_empty() {
                if i == 0 {
                    default_name.clone()
                } else {
                    format!("附件{ordinal}")
                }
            } else {
                attachment.name.clone()
            };
            let text = match self.extractor.extract_text(&bytes, &name).await {
                Ok(text) => text,
                Err(ExtractError::TooLarge { size_mb, limit_mb, .. }) => {
                    return Ok(Judgment::Pend {
                        comment: format!(
                            "【自动审批】附件{ordinal}大小 {size_mb:.1} MB 超过 {limit_mb} MB 限制，无法进行 AI 分析，请人工审批。"
                        ),
                    });
                }
                Err(e) => {
                    return Ok(Judgment::Pend {
                        comment: format!("【自动审批】附件{ordinal}处理失败（{e}），请人工审批。"),
                    });
                }
            };
            match self
                .classifier
                .judge_seal(&name, &text, &seal_type, &declared_doc)
                .await
            {
                Ok(judgment) if !judgment.compliant => {
                    return Ok(Judgment::Reject {
                        comment: rejection_comment(&judgment.comment, &judgment.risk_points),
                    });
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(
                        instance = %task.instance_code,
                        attachment = ordinal,
                        error = %e,
                        "seal judgment failed"
                    );
                    return Ok(Judgment::Pend {
                        comment: format!(
                            "【自动审批】AI 分析异常（附件{ordinal}），请人工审批。{e}"
                        ),
                    });
                }
            }
        }
        Ok(Judgment::Approve {
            comment: pass_comment(kind, rule),
        })
    }

    /// Invoice flow: attachments judged as a set; contract-only stays with
    /// a human, everything else is approved.
    async fn judge_invoice_ticket(
        &self,
        rule: &ApprovalRule,
        detail: &crate::platform::types::InstanceDetail,
    ) -> Result<Judgment, DeskError> {
        let items = detail.form_items();
        let attachments = fields::collect_attachments(&items);
        if attachments.is_empty() {
            return Ok(Judgment::Pend {
                comment: "【自动审批】开票申请单缺少附件，无法进行 AI 分析，请人工审批。"
                    .to_string(),
            });
        }

        let mut parts = Vec::new();
        for (i, attachment) in attachments.iter().take(INVOICE_MAX_ATTACHMENTS).enumerate() {
            let name = if attachment.name.is_empty() {
                format!("附件{}", i + 1)
            } else {
                attachment.name.clone()
            };
            // Unreadable invoice attachments degrade to file-name reasoning
            // instead of blocking the whole review.
            let text = match self.platform.download_file(&attachment.token).await {
                Ok(bytes) => match self.extractor.extract_text(&bytes, &name).await {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!(name, error = %e, "invoice attachment unreadable");
                        String::new()
                    }
                },
                Err(e) => {
                    tracing::warn!(name, error = %e, "invoice attachment download failed");
                    String::new()
                }
            };
            parts.push(AttachmentText { name, text });
        }

        match self.classifier.review_invoice(&parts).await {
            Ok(review) if review.only_contract => Ok(Judgment::Pend {
                comment: review.comment,
            }),
            Ok(review) => {
                let comment = if review.comment.trim().is_empty() {
                    pass_comment(TicketKind::Invoice, rule)
                } else {
                    review.comment
                };
                Ok(Judgment::Approve { comment })
            }
            Err(e) => Ok(Judgment::Pend {
                comment: format!("【自动审批】AI 分析异常，请人工审批。{e}"),
            }),
        }
    }
}

/// Decision comment for an approval, rule override first.
fn pass_comment(kind: TicketKind, rule: &ApprovalRule) -> String {
    rule.pass_comment
        .clone()
        .unwrap_or_else(|| default_pass_comment(kind))
}

fn default_pass_comment(kind: TicketKind) -> String {
    match kind {
        TicketKind::SealUse | TicketKind::Invoice => {
            format!("{}已核实，已自动审批通过。", kind.display_name())
        }
        _ => "已核实，已自动审批通过。".to_string(),
    }
}

/// Rejection comment naming the concrete findings.
fn rejection_comment(comment: &str, risks: &[String]) -> String {
    let mut out = format!("【不符合自动审批规则】\n{comment}\n");
    if !risks.is_empty() {
        let joined = risks
            .iter()
            .take(5)
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("；");
        out.push_str(&format!("风险点：{joined}\n"));
    }
    out.push_str("请人工审批。");
    out
}

/// Seal judgment context from the parsed form. Scalar fields first; forms
/// that keep the detail in a row list carry it in the first row instead.
fn seal_context(fields: &FieldMap) -> (String, String, String) {
    let mut seal_type = text_of(fields.get("seal_type"));
    let mut doc_name = text_of(fields.get("document_name"));
    let mut doc_type = text_of(fields.get("document_type"));
    if doc_type.is_empty() {
        doc_type = text_of(fields.get("文件类型"));
    }

    for value in fields.values() {
        let Some(rows) = value.as_array() else { continue };
        let Some(first) = rows.first().and_then(Value::as_object) else {
            continue;
        };
        if seal_type.is_empty() {
            seal_type = text_of(first.get("印章类型"));
        }
        if doc_name.is_empty() {
            doc_name = text_of(first.get("文件名称"));
        }
        if doc_type.is_empty() {
            doc_type = text_of(first.get("文件类型"));
        }
    }
    (seal_type, doc_name, doc_type)
}

fn text_of(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}
