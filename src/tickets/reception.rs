//! 招待/团建物资领用 — reception and team-building supplies.

use super::{FieldMap, FieldSpec, SubFieldSpec};

pub(super) const DISPLAY_NAME: &str = "招待/团建物资领用";
pub(super) const APPROVAL_CODE: &str = "D3FA56ED-091E-486F-BF3D-9135C73C4905";

pub(super) const FIELD_HINTS: &str = "usage_purpose(物品用途), receive_date(领用日期YYYY-MM-DD), \
     item_detail(物品明细列表,必填,每项含名称、数量。格式如[{\"名称\":\"笔记本\",\"数量\":\"2\"}])";

// 物品明细 fieldList 子字段：名称(widget3)、数量(widget4)
const ITEM_SUB_FIELDS: &[SubFieldSpec] = &[
    SubFieldSpec {
        id: "widget3",
        widget: "input",
        label: "名称",
    },
    SubFieldSpec {
        id: "widget4",
        widget: "number",
        label: "数量",
    },
];

pub(super) const FIELDS: &[FieldSpec] = &[
    FieldSpec::text("usage_purpose", "物品用途").fallback("widget0"),
    FieldSpec::date("receive_date", "领用日期").fallback("widget1"),
    FieldSpec::text("item_detail", "物品明细")
        .fallback("widget2")
        .rows(ITEM_SUB_FIELDS),
];

pub(super) fn admin_comment(_fields: &FieldMap) -> String {
    "请核实以上填报信息无误后提交".to_string()
}
