//! 开票申请 — invoicing requests.
//!
//! The invoice form mixes fields the requester must state (invoice type,
//! items) with fields read out of the settlement sheet and contract
//! attachments. Attachment-driven extraction lives in the llm module; the
//! tables here declare which labels those values land on.

use super::{FieldMap, FieldSpec};

pub(super) const DISPLAY_NAME: &str = "开票申请";
pub(super) const APPROVAL_CODE: &str = "692F47D-F6CF-4342-8DAC-32CE84F39E6F";

pub(super) const FIELD_HINTS: &str = "invoice_type(发票类型,用户必须明确说明), invoice_items(开票项目,用户必须明确说明), \
     amount(金额,从结算单识别), buyer_name(购方名称/开票抬头,从合同识别), tax_id(购方税号,从合同识别), \
     settlement_file(结算单附件), contract_file(合同附件)";

/// Logical fields populated from attachments rather than conversation.
pub const AUTO_FIELDS: &[&str] = &["amount", "buyer_name", "tax_id", "contract_no", "settlement_no"];

// 表单字段名可能为「购方名称」「开票抬头」等，均映射到 buyer_name；税号、金额同理
pub(super) const FIELDS: &[FieldSpec] = &[
    FieldSpec::text("invoice_type", "发票类型"),
    FieldSpec::text("invoice_items", "开票项目"),
    FieldSpec::text("amount", "金额").aliased(&["开票金额", "发票金额"]),
    FieldSpec::text("buyer_name", "购方名称/开票抬头").aliased(&[
        "购方名称",
        "开票抬头",
        "客户/开票名称",
    ]),
    FieldSpec::text("tax_id", "购方税号").aliased(&[
        "税务登记证号",
        "社会统一信用代码",
        "税务登记证号/社会统一信用代码",
    ]),
    FieldSpec::text("contract_no", "合同编号"),
    FieldSpec::text("settlement_no", "结算单编号"),
    FieldSpec::text("remarks", "备注"),
];

pub(super) fn admin_comment(_fields: &FieldMap) -> String {
    "请核实以上填报信息无误后提交".to_string()
}
