//! 采购申请 — purchase requests.

use serde_json::Value;

use super::{FieldMap, FieldSpec};

pub(super) const DISPLAY_NAME: &str = "采购申请";
pub(super) const APPROVAL_CODE: &str = "6CF86C28-26AA-4E8B-ABF4-82DFAE86028C";

pub(super) const FIELD_HINTS: &str = "purchase_reason(采购事由), purchase_type(采购类别,可根据物品推断), \
     expected_date(期望交付时间YYYY-MM-DD), \
     cost_detail(费用明细列表,必填,每项包含:名称/规格/数量/金额。是否有库存由审批人填写,发起人不填。\
     格式如[{\"名称\":\"笔记本\",\"规格\":\"ThinkPad X1\",\"数量\":\"1\",\"金额\":\"8000\"}])";

// 表单字段名可能为「物资明细」或「费用明细」，均映射到 cost_detail
pub(super) const FIELDS: &[FieldSpec] = &[
    FieldSpec::text("purchase_reason", "采购事由").fallback("widget16510608596030001"),
    FieldSpec::text("purchase_type", "采购类别").fallback("widget16510608666360001"),
    FieldSpec::date("expected_date", "期望交付时间").fallback("widget16510608918180001"),
    FieldSpec::text("cost_detail", "费用明细")
        .aliased(&["物资明细"])
        .fallback("widget16510609006710001"),
];

pub(super) fn admin_comment(fields: &FieldMap) -> String {
    match total_amount(fields.get("cost_detail")) {
        Some(amount) if amount <= 1000.0 => "行政审核：金额1000元以内，同意。".to_string(),
        Some(amount) if amount <= 5000.0 => {
            "行政审核：金额在5000元以内，同意，请附报价单。".to_string()
        }
        Some(_) => "行政审核：金额超过5000元，需总经理审批确认。".to_string(),
        None => "行政审核：采购申请已收到，请确认费用明细。".to_string(),
    }
}

/// Sums the 金额 column of the detail rows. Falls back to reading the whole
/// value as one number for plain-text details.
fn total_amount(detail: Option<&Value>) -> Option<f64> {
    match detail? {
        Value::Array(rows) => {
            let mut total = 0.0;
            let mut seen = false;
            for row in rows {
                if let Some(amount) = row.get("金额").and_then(parse_number) {
                    total += amount;
                    seen = true;
                }
            }
            seen.then_some(total)
        }
        other => parse_number(other),
    }
}

fn parse_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let cleaned: String = s
                .chars()
                .filter(|c| c.is_ascii_digit() || *c == '.')
                .collect();
            cleaned.parse().ok()
        }
        _ => None,
    }
}
