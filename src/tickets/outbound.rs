//! 外出报备 — outbound reports.
//!
//! Report-style definitions without approval nodes make the create API
//! return 1390013; the chat flow then falls back to a deep link.

use super::{FieldMap, FieldSpec};

pub(super) const DISPLAY_NAME: &str = "外出报备";
pub(super) const APPROVAL_CODE: &str = "FDBE8929-CDD4-42E4-8174-9B7724D0A69E";

pub(super) const FIELD_HINTS: &str =
    "destination(外出地点), start_date(YYYY-MM-DD), end_date(YYYY-MM-DD), reason(事由)";

pub(super) const FIELDS: &[FieldSpec] = &[
    FieldSpec::text("destination", "外出地点"),
    FieldSpec::date("start_date", "开始日期"),
    FieldSpec::date("end_date", "结束日期"),
    FieldSpec::text("reason", "原因"),
];

pub(super) fn admin_comment(_fields: &FieldMap) -> String {
    "请核实以上填报信息无误后提交".to_string()
}
