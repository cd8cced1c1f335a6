//! Prompt construction and reply parsing for the DeepSeek classifier.
//!
//! The prompts are Chinese because they face a Chinese-language workplace;
//! every reply is requested as a bare JSON object and parsed defensively,
//! since models occasionally return strings where lists were asked for.

use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::Value;

use crate::error::LlmError;
use crate::tickets::{AUTO_FIELDS, FieldMap, TicketKind};

use super::{
    AttachmentText, BoxFuture, ChatTurn, DeepSeekClient, IntentAnalysis, IntentClassifier,
    InvoiceReview, SealJudgment,
};

/// Char cap for seal document summaries in the judgment prompt.
const SEAL_TEXT_CAP: usize = 6000;
/// Char cap per attachment in the invoice review prompt.
const INVOICE_TEXT_CAP: usize = 4000;
/// Below this many non-space chars a summary counts as unextractable.
const MIN_CONTENT_CHARS: usize = 10;

impl IntentClassifier for DeepSeekClient {
    fn classify<'a>(
        &'a self,
        history: &'a [ChatTurn],
        today: NaiveDate,
    ) -> BoxFuture<'a, Result<IntentAnalysis, LlmError>> {
        Box::pin(async move {
            let mut messages = Vec::with_capacity(history.len() + 1);
            messages.push(ChatTurn::system(classify_system_prompt(today)));
            messages.extend_from_slice(history);
            let raw: RawAnalysis = self.complete_typed(&messages).await?;
            Ok(analysis_from(raw))
        })
    }

    fn judge_seal<'a>(
        &'a self,
        file_name: &'a str,
        text: &'a str,
        seal_type: &'a str,
        doc_type: &'a str,
    ) -> BoxFuture<'a, Result<SealJudgment, LlmError>> {
        Box::pin(async move {
            let prompt = seal_prompt(file_name, text, seal_type, doc_type);
            let raw: RawSealReply = self.complete_typed(&[ChatTurn::user(prompt)]).await?;
            Ok(seal_judgment_from(raw))
        })
    }

    fn review_invoice<'a>(
        &'a self,
        parts: &'a [AttachmentText],
    ) -> BoxFuture<'a, Result<InvoiceReview, LlmError>> {
        Box::pin(async move {
            let prompt = invoice_review_prompt(parts);
            let raw: RawInvoiceReply = self.complete_typed(&[ChatTurn::user(prompt)]).await?;
            Ok(invoice_review_from(raw))
        })
    }

    fn extract_invoice_fields<'a>(
        &'a self,
        file_name: &'a str,
        text: &'a str,
    ) -> BoxFuture<'a, Result<FieldMap, LlmError>> {
        Box::pin(async move {
            let prompt = invoice_extract_prompt(file_name, text);
            let raw: Value = self.complete_typed(&[ChatTurn::user(prompt)]).await?;
            Ok(invoice_fields_from(raw))
        })
    }
}

// ─── Prompts ────────────────────────────────────────────────────────────────

fn classify_system_prompt(today: NaiveDate) -> String {
    let approval_list = TicketKind::all()
        .map(|kind| format!("- {}", kind.display_name()))
        .collect::<Vec<_>>()
        .join("\n");
    let field_hints = TicketKind::all()
        .map(|kind| format!("{}: {}", kind.display_name(), kind.field_hints()))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "你是一个行政助理，帮员工提交审批申请。今天是{today}。\n\
         可处理的审批类型：\n{approval_list}\n\n\
         各类型需要的字段：\n{field_hints}\n\n\
         重要规则：\n\
         1. 尽量从用户消息中推算字段，不要轻易列为missing\n\
         2. '明天'、'后天'、'下周一'等要换算成具体日期(YYYY-MM-DD)\n\
         3. 只有真的无法推断的字段才放入missing\n\
         4. reason如果用户没说可以根据上下文推断，实在没有才列为missing\n\n\
         分析对话历史，返回JSON：\n\
         - approval_type: 审批类型（从列表选，无法判断填null）\n\
         - fields: 综合对话历史已提取的字段键值对\n\
         - missing: 真正缺少且无法推断的字段名列表\n\
         - unclear: 无法判断类型时用中文说明需要补充什么\n\
         只返回JSON。"
    )
}

fn seal_prompt(file_name: &str, text: &str, seal_type: &str, doc_type: &str) -> String {
    let summary = if has_content(text) {
        format!("文件内容摘要：\n{}", cap_chars(text, SEAL_TEXT_CAP))
    } else {
        "（文件内容无法提取，仅根据文件名和类型推断）".to_string()
    };
    format!(
        "你是一个用印合规审核助手。请对以下文件进行三点分析：\n\n\
         文件名：{file_name}\n\n\
         {summary}\n\n\
         申请用印的印章类型：{seal_type}\n\
         表单填写的文件名称：{doc_type}\n\n\
         请严格按以下三点分析，并返回 JSON：\n\
         1. legal_compliant: 文件内容是否合法合规（true/false）\n\
         2. risk_points: 具体不合规项/风险点列表，每项简短（如「缺少关键条款」「金额异常」「律师未审核」），如无则 []\n\
         3. seal_type_matches: 印章类型与文件类型是否相符（true/false）\n\
         4. comment: 合规时为「文件合法合规」；不合规时必须列出具体问题（与 risk_points 一致，用；分隔），不要笼统表述\n\n\
         返回格式示例：\n\
         {{\"legal_compliant\": true, \"seal_type_matches\": true, \"risk_points\": [], \"comment\": \"文件合法合规。\"}}\n\
         不合规示例：{{\"legal_compliant\": false, \"seal_type_matches\": true, \"risk_points\": [\"缺少关键条款\", \"金额异常\"], \"comment\": \"缺少关键条款；金额异常\"}}\n\n\
         只返回 JSON，不要其他内容。"
    )
}

fn invoice_review_prompt(parts: &[AttachmentText]) -> String {
    let mut sections = Vec::with_capacity(parts.len());
    let mut all_no_content = true;
    for (i, part) in parts.iter().enumerate() {
        let body = if has_content(&part.text) {
            all_no_content = false;
            format!("文件内容摘要：\n{}", cap_chars(&part.text, INVOICE_TEXT_CAP))
        } else {
            "（内容无法提取，请根据文件名推断类型）".to_string()
        };
        sections.push(format!("--- 附件{}: {} ---\n{}", i + 1, part.name, body));
    }
    let combined = if sections.is_empty() {
        "（无附件内容）".to_string()
    } else {
        sections.join("\n\n")
    };
    let filename_hint = if all_no_content && !parts.is_empty() {
        let names: Vec<&str> = parts.iter().map(|p| p.name.as_str()).collect();
        format!(
            "\n\n【重要】以上附件内容均无法提取，请根据文件名推断：{names:?}\n\
             文件名含「凭证」「截图」「结算」「对账」「水单」「流水」「订单」等通常非仅合同；\
             含「合同」「协议」可能为合同类。"
        )
    } else {
        String::new()
    };
    format!(
        "你是开票审批助手。请分析以下开票申请的附件内容，判断附件类型。\
         {filename_hint}\n\n\
         {combined}\n\n\
         附件类型包括：合同/协议、对账单/结算单、付款证明（客户付款凭证/银行流水/转账截图等）、\
         收款证明（我司收款凭证/到账截图等）、订单、其他。\n\n\
         请返回 JSON：\n\
         1. only_contract: 若所有附件都仅是合同/协议类（无付款证明、收款证明、对账单、结算单等），则为 true；否则为 false\n\
         2. attachment_types: 识别到的附件类型列表，如 [\"合同\", \"对账单\"]，无法确定时可写 [\"根据文件名推断\"]\n\
         3. comment: 简短说明，仅合同时写「附件中仅有合同」；其他可自动通过时可不写或简短说明\n\n\
         返回格式示例：\n\
         {{\"only_contract\": false, \"attachment_types\": [\"合同\", \"对账单\"], \"comment\": \"\"}}\n\
         {{\"only_contract\": true, \"attachment_types\": [\"合同\"], \"comment\": \"附件中仅有合同。\"}}\n\n\
         只返回 JSON，不要其他内容。"
    )
}

fn invoice_extract_prompt(file_name: &str, text: &str) -> String {
    let base_name = file_name
        .rsplit_once('.')
        .map_or(file_name, |(base, _)| base);
    let doc_type = if base_name.contains("结算") {
        "结算单"
    } else if base_name.contains("合同") || base_name.contains("协议") {
        "合同"
    } else {
        "未知"
    };
    let summary = if has_content(text) {
        format!("文件内容摘要：\n{text}")
    } else {
        "（内容无法提取）".to_string()
    };
    format!(
        "从以下{doc_type}文件中提取开票申请相关字段。\n\n\
         文件名：{base_name}\n\n\
         {summary}\n\n\
         请返回JSON，包含能识别的字段：\n\
         - amount: 金额（数字，如 10000 或 10000.00）\n\
         - buyer_name: 购方名称/开票抬头（合同中的甲方、乙方或购买方）\n\
         - tax_id: 购方税号/纳税人识别号\n\
         - contract_no: 合同编号\n\
         - settlement_no: 结算单编号\n\
         只返回能明确识别的字段，不要猜测。只返回JSON，不要其他内容。"
    )
}

fn has_content(text: &str) -> bool {
    text.trim().chars().count() > MIN_CONTENT_CHARS
}

fn cap_chars(text: &str, cap: usize) -> String {
    text.chars().take(cap).collect()
}

// ─── Reply parsing ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RawAnalysis {
    #[serde(default)]
    approval_type: Option<String>,
    #[serde(default)]
    fields: Option<FieldMap>,
    #[serde(default)]
    missing: Value,
    #[serde(default)]
    unclear: Option<String>,
}

fn analysis_from(raw: RawAnalysis) -> IntentAnalysis {
    IntentAnalysis {
        kind: raw
            .approval_type
            .as_deref()
            .and_then(TicketKind::from_display_name),
        fields: raw.fields.unwrap_or_default(),
        missing: normalize_string_list(raw.missing),
        unclear: raw.unclear.filter(|s| !s.trim().is_empty()),
    }
}

#[derive(Debug, Deserialize)]
struct RawSealReply {
    #[serde(default)]
    legal_compliant: bool,
    #[serde(default = "default_true")]
    seal_type_matches: bool,
    #[serde(default)]
    risk_points: Value,
    #[serde(default)]
    comment: String,
}

fn default_true() -> bool {
    true
}

fn seal_judgment_from(raw: RawSealReply) -> SealJudgment {
    let risk_points = normalize_string_list(raw.risk_points);
    let compliant = raw.legal_compliant && raw.seal_type_matches && risk_points.is_empty();
    let comment = if compliant {
        if raw.comment.trim().is_empty() {
            "文件合法合规。".to_string()
        } else {
            raw.comment
        }
    } else if risk_points.is_empty() {
        if raw.comment.trim().is_empty() {
            "存在合规问题".to_string()
        } else {
            raw.comment
        }
    } else {
        risk_points
            .iter()
            .take(5)
            .cloned()
            .collect::<Vec<_>>()
            .join("；")
    };
    SealJudgment {
        compliant,
        risk_points,
        comment,
    }
}

#[derive(Debug, Deserialize)]
struct RawInvoiceReply {
    #[serde(default)]
    only_contract: bool,
    #[serde(default)]
    attachment_types: Value,
    #[serde(default)]
    comment: String,
}

fn invoice_review_from(raw: RawInvoiceReply) -> InvoiceReview {
    // The warning comment is fixed wording so reviewers always see the
    // same phrase, whatever the model wrote.
    let comment = if raw.only_contract {
        "附件中仅有合同。".to_string()
    } else {
        raw.comment
    };
    InvoiceReview {
        only_contract: raw.only_contract,
        attachment_types: normalize_string_list(raw.attachment_types),
        comment,
    }
}

fn invoice_fields_from(value: Value) -> FieldMap {
    let Value::Object(map) = value else {
        return FieldMap::new();
    };
    let mut out = FieldMap::new();
    for key in AUTO_FIELDS {
        let Some(v) = map.get(*key) else { continue };
        let text = match v {
            Value::String(s) => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            _ => continue,
        };
        if !text.is_empty() {
            out.insert((*key).to_string(), Value::String(text));
        }
    }
    out
}

fn normalize_string_list(value: Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(s) => {
                    let t = s.trim().to_string();
                    (!t.is_empty()).then_some(t)
                }
                Value::Null => None,
                other => Some(other.to_string()),
            })
            .collect(),
        Value::String(s) => {
            let t = s.trim().to_string();
            if t.is_empty() { vec![] } else { vec![t] }
        }
        _ => Vec::new(),
    }
}
