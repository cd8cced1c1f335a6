//! 用印申请 — seal-use requests.
//!
//! Seal tickets carry the document to be stamped as an attachment; the
//! poller runs a compliance judgment over it before deciding.

use super::{FieldMap, FieldSpec};

pub(super) const DISPLAY_NAME: &str = "用印申请";
pub(super) const APPROVAL_CODE: &str = "FB855CD4-CA15-4A1B-8B7A-51A56171CE60";

pub(super) const FIELD_HINTS: &str =
    "company(所属公司如风船/微驰等), seal_type(印章类型), usage_date(YYYY-MM-DD), document_name(文件名称), reason";

pub(super) const FIELDS: &[FieldSpec] = &[
    FieldSpec::text("company", "所属公司"),
    FieldSpec::text("seal_type", "印章类型").fallback("widget17375347703620001"),
    FieldSpec::date("usage_date", "用印日期").fallback("widget17375347703620002"),
    FieldSpec::text("document_name", "文件名称").fallback("widget3"),
    FieldSpec::text("reason", "原因").fallback("widget0"),
];

pub(super) fn admin_comment(_fields: &FieldMap) -> String {
    "行政审核：用印申请已核实，同意。".to_string()
}
