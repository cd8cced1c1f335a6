//! Form field resolution.
//!
//! Approval definitions are fetched once per kind and cached in memory.
//! The cached schema drives both directions: building a form payload from
//! a logical field map on submission, and reverse-parsing a submitted
//! form back into logical fields for the poller.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::RwLock;

use crate::error::{DeskError, FieldError};
use crate::platform::FeishuClient;
use crate::tickets::{FieldMap, TicketKind};

/// Widget types that carry attachments.
const ATTACH_WIDGETS: &[&str] = &["attach", "attachV2", "attachment", "attachmentV2", "file"];

/// One column of a `fieldList` widget as the definition exposes it.
#[derive(Debug, Clone)]
pub struct SubField {
    pub id: String,
    pub widget: String,
    pub name: String,
}

/// One widget from an approval form definition.
#[derive(Debug, Clone)]
pub struct FormField {
    pub id: String,
    pub name: String,
    pub widget: String,
    pub sub_fields: Vec<SubField>,
    pub options: Vec<Value>,
}

/// Parsed form layout of one approval definition.
#[derive(Debug, Default)]
pub struct FormSchema {
    fields: Vec<FormField>,
}

/// A logical field mapped onto its concrete widget.
#[derive(Debug, Clone)]
pub struct ResolvedField {
    pub id: String,
    pub widget: String,
    pub sub_fields: Vec<SubField>,
}

/// One attachment reference collected from a submitted form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub token: String,
    pub name: String,
}

impl FormSchema {
    /// Builds a schema from the definition's widget array.
    ///
    /// `fieldList` sub-structures hide in different places depending on
    /// the tenant: `children`, `ext` (sometimes a JSON string), the
    /// first `value` row, or `option`.
    #[must_use]
    pub fn from_widgets(widgets: &[Value]) -> Self {
        let mut fields = Vec::new();
        for item in widgets {
            let Some(map) = item.as_object() else { continue };
            let Some(id) = map.get("id").and_then(Value::as_str) else {
                continue;
            };
            let name = map
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or(id)
                .to_string();
            let widget = map
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or("input")
                .to_string();

            let mut field = FormField {
                id: id.to_string(),
                name,
                widget,
                sub_fields: Vec::new(),
                options: Vec::new(),
            };
            if field.widget == "fieldList" {
                field.sub_fields = parse_sub_fields(map);
            }
            if is_choice_widget(&field.widget) {
                field.options = parse_options(map.get("option"));
            }
            fields.push(field);
        }
        Self { fields }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    #[must_use]
    pub fn field(&self, id: &str) -> Option<&FormField> {
        self.fields.iter().find(|f| f.id == id)
    }

    #[must_use]
    pub fn field_ids(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.id.as_str()).collect()
    }

    /// Maps a logical field onto this form. Declared label (or alias)
    /// first; the kind's static widget-id fallback second.
    pub fn resolve(&self, kind: TicketKind, logical: &str) -> Result<ResolvedField, FieldError> {
        let spec = kind.field(logical).ok_or_else(|| FieldError::Unresolved {
            kind: kind.to_string(),
            label: logical.to_string(),
        })?;

        if let Some(field) = self.fields.iter().find(|f| spec.matches_label(&f.name)) {
            let sub_fields = if field.sub_fields.is_empty() {
                static_sub_fields(spec.sub_fields)
            } else {
                field.sub_fields.clone()
            };
            return Ok(ResolvedField {
                id: field.id.clone(),
                widget: field.widget.clone(),
                sub_fields,
            });
        }

        if let Some(fallback_id) = spec.fallback_id {
            let widget = if let Some(field) = self.field(fallback_id) {
                field.widget.clone()
            } else if !spec.sub_fields.is_empty() {
                "fieldList".to_string()
            } else if spec.date {
                "date".to_string()
            } else {
                "input".to_string()
            };
            return Ok(ResolvedField {
                id: fallback_id.to_string(),
                widget,
                sub_fields: static_sub_fields(spec.sub_fields),
            });
        }

        Err(FieldError::Unresolved {
            kind: kind.to_string(),
            label: spec.label.to_string(),
        })
    }
}

fn static_sub_fields(specs: &[crate::tickets::SubFieldSpec]) -> Vec<SubField> {
    specs
        .iter()
        .map(|s| SubField {
            id: s.id.to_string(),
            widget: s.widget.to_string(),
            name: s.label.to_string(),
        })
        .collect()
}

fn is_choice_widget(widget: &str) -> bool {
    matches!(widget, "radioV2" | "radio" | "checkboxV2" | "checkbox")
}

fn parse_options(raw: Option<&Value>) -> Vec<Value> {
    match raw {
        Some(Value::Array(list)) => list.clone(),
        Some(Value::String(s)) if !s.is_empty() => {
            serde_json::from_str::<Vec<Value>>(s).unwrap_or_default()
        }
        _ => Vec::new(),
    }
}

fn parse_sub_fields(item: &Map<String, Value>) -> Vec<SubField> {
    let sub_items = raw_sub_items(item);
    let mut sub_fields: Vec<SubField> = sub_items.iter().filter_map(sub_field_from).collect();

    // Rows instead of column definitions: take the first row's cells.
    if sub_fields.is_empty()
        && let Some(Value::Array(first_row)) = sub_items.first()
    {
        sub_fields = first_row.iter().filter_map(sub_field_from).collect();
    }

    // `ext` may list only part of the columns; a populated first value
    // row carries the full set.
    if let Some(Value::Array(rows)) = item.get("value")
        && let Some(Value::Array(first_row)) = rows.first()
        && first_row.len() > sub_fields.len()
    {
        let from_row: Vec<SubField> = first_row.iter().filter_map(sub_field_from).collect();
        if from_row.len() > sub_fields.len() {
            sub_fields = from_row;
        }
    }

    sub_fields
}

/// First non-empty of `children`/`ext`/`value`/`option`, JSON-decoding
/// string payloads and unwrapping known object containers.
fn raw_sub_items(item: &Map<String, Value>) -> Vec<Value> {
    for key in ["children", "ext", "value", "option"] {
        let Some(raw) = item.get(key) else { continue };
        match raw {
            Value::Array(list) if !list.is_empty() => return list.clone(),
            Value::String(s) if !s.is_empty() => {
                return match serde_json::from_str::<Value>(s) {
                    Ok(Value::Array(list)) => list,
                    Ok(Value::Object(map)) => sub_items_from_object(&map),
                    _ => Vec::new(),
                };
            }
            _ => {}
        }
    }
    Vec::new()
}

fn sub_items_from_object(map: &Map<String, Value>) -> Vec<Value> {
    for key in ["children", "ext", "list", "fields", "value"] {
        if let Some(Value::Array(list)) = map.get(key)
            && !list.is_empty()
        {
            return list.clone();
        }
    }
    // Paged shape: value1-1, value2-1, ... — the first page carries the
    // column structure.
    let mut keys: Vec<&String> = map.keys().filter(|k| k.starts_with("value")).collect();
    keys.sort();
    for key in keys {
        if let Some(Value::Array(list)) = map.get(key)
            && !list.is_empty()
        {
            return list.clone();
        }
    }
    Vec::new()
}

fn sub_field_from(value: &Value) -> Option<SubField> {
    let map = value.as_object()?;
    let id = ["id", "widget_id", "field_id"]
        .iter()
        .find_map(|k| map.get(*k).and_then(Value::as_str))
        .filter(|s| !s.is_empty())?;
    let widget = map.get("type").and_then(Value::as_str).unwrap_or("input");
    let name = ["name", "title", "label"]
        .iter()
        .find_map(|k| map.get(*k).and_then(Value::as_str))
        .unwrap_or("");
    Some(SubField {
        id: id.to_string(),
        widget: widget.to_string(),
        name: name.to_string(),
    })
}

// ─── Schema cache ────────────────────────────────────────────────────────────

/// Per-kind schema cache over the definition endpoint.
///
/// Each kind is fetched at most once per process unless invalidated
/// after a failed submission.
pub struct FieldCache {
    client: Arc<FeishuClient>,
    schemas: RwLock<HashMap<TicketKind, Arc<FormSchema>>>,
}

impl FieldCache {
    #[must_use]
    pub fn new(client: Arc<FeishuClient>) -> Self {
        Self {
            client,
            schemas: RwLock::new(HashMap::new()),
        }
    }

    /// Cached schema for `kind`, fetching the definition on first use.
    pub async fn schema(
        &self,
        kind: TicketKind,
        approval_code: &str,
    ) -> Result<Arc<FormSchema>, DeskError> {
        if let Some(schema) = self.schemas.read().await.get(&kind) {
            return Ok(schema.clone());
        }

        // Write lock held across the fetch so concurrent first calls
        // share one request.
        let mut guard = self.schemas.write().await;
        if let Some(schema) = guard.get(&kind) {
            return Ok(schema.clone());
        }
        let definition = self.client.approval_definition(approval_code).await?;
        let schema = FormSchema::from_widgets(&definition.form_widgets());
        if schema.is_empty() {
            return Err(FieldError::BadDefinition {
                kind: kind.to_string(),
                message: "definition exposes no form widgets".to_string(),
            }
            .into());
        }
        tracing::info!(kind = %kind, fields = schema.fields.len(), "form schema cached");
        let schema = Arc::new(schema);
        guard.insert(kind, schema.clone());
        Ok(schema)
    }

    /// Drops the cached schema so the next access refetches it. Called
    /// after a submission the platform rejected.
    pub async fn invalidate(&self, kind: TicketKind) {
        if self.schemas.write().await.remove(&kind).is_some() {
            tracing::info!(kind = %kind, "form schema invalidated");
        }
    }
}

// ─── Form building (submission direction) ────────────────────────────────────

/// Serializes a logical field map into the platform's form payload.
///
/// Fields are emitted in declaration order; absent logical fields are
/// skipped, unresolvable ones abort the build.
pub fn build_form(
    kind: TicketKind,
    schema: &FormSchema,
    fields: &FieldMap,
) -> Result<String, FieldError> {
    let mut widgets = Vec::new();
    for spec in kind.field_specs() {
        let Some(value) = fields.get(spec.name) else {
            continue;
        };
        if value.is_null() {
            continue;
        }
        let resolved = schema.resolve(kind, spec.name)?;
        let entry = match resolved.widget.as_str() {
            "fieldList" => build_field_list(kind, &resolved, value)?,
            "date" => serde_json::json!({
                "id": resolved.id,
                "type": "date",
                "value": date_value(&scalar_text(value)),
            }),
            widget => serde_json::json!({
                "id": resolved.id,
                "type": widget,
                "value": scalar_text(value),
            }),
        };
        widgets.push(entry);
    }
    Ok(Value::Array(widgets).to_string())
}

fn build_field_list(
    kind: TicketKind,
    resolved: &ResolvedField,
    value: &Value,
) -> Result<Value, FieldError> {
    let Some(rows) = value.as_array() else {
        return Err(FieldError::BadDefinition {
            kind: kind.to_string(),
            message: format!("fieldList value for {} is not a list of rows", resolved.id),
        });
    };
    let mut out_rows = Vec::new();
    for row in rows {
        let Some(row_map) = row.as_object() else { continue };
        let mut cells = Vec::new();
        for sub in &resolved.sub_fields {
            let canonical = field_list_alias(&sub.name);
            let cell_value = row_map
                .get(canonical)
                .or_else(|| row_map.get(sub.name.as_str()));
            if let Some(v) = cell_value
                && !v.is_null()
            {
                cells.push(serde_json::json!({
                    "id": sub.id,
                    "type": sub.widget,
                    "value": scalar_text(v),
                }));
            }
        }
        if !cells.is_empty() {
            out_rows.push(Value::Array(cells));
        }
    }
    Ok(serde_json::json!({
        "id": resolved.id,
        "type": "fieldList",
        "value": out_rows,
    }))
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// The date widget wants a full timestamp; plain dates get midnight CST.
fn date_value(text: &str) -> String {
    if text.contains('T') {
        text.to_string()
    } else {
        format!("{text}T00:00:00+08:00")
    }
}

// ─── Form reverse-parsing (poller direction) ─────────────────────────────────

/// Canonical column names for `fieldList` rows.
fn field_list_alias(name: &str) -> &str {
    match name {
        "" => "名称",
        "name" | "item_name" => "名称",
        "spec" => "规格",
        "quantity" => "数量",
        "amount" => "金额",
        other => other,
    }
}

/// Decodes a submitted form array into a logical field map.
pub fn parse_form(kind: TicketKind, schema: &FormSchema, items: &[Value]) -> FieldMap {
    let mut fields = FieldMap::new();
    for item in items {
        let Some(map) = item.as_object() else { continue };
        let Some(id) = map.get("id").and_then(Value::as_str) else {
            continue;
        };
        let info = schema.field(id);
        let name = info.map_or("", |f| f.name.as_str());
        let widget = map
            .get("type")
            .and_then(Value::as_str)
            .or(info.map(|f| f.widget.as_str()))
            .unwrap_or("input");
        let raw = map.get("value");
        let logical = logical_key(kind, id, name);

        match (widget, raw) {
            ("fieldList", Some(Value::Array(rows))) => {
                let parsed = parse_rows(rows, info.map_or(&[], |f| f.sub_fields.as_slice()));
                if !parsed.is_empty() {
                    let key = if name.contains("费用") || name.contains("物资") {
                        "cost_detail".to_string()
                    } else {
                        logical
                    };
                    fields.insert(key, Value::Array(parsed));
                }
            }
            ("dateInterval", Some(Value::Object(span))) => {
                for (source, target) in [("start", "start_date"), ("end", "end_date")] {
                    if let Some(raw_date) = span.get(source).and_then(Value::as_str)
                        && !raw_date.is_empty()
                    {
                        let date = raw_date.split('T').next().unwrap_or(raw_date);
                        fields.insert(target.to_string(), Value::String(date.to_string()));
                    }
                }
            }
            (_, Some(value)) => {
                if value.is_array() || value.is_object() {
                    continue;
                }
                let text = scalar_text(value);
                if !text.is_empty() {
                    fields.insert(logical, Value::String(text));
                }
            }
            _ => {}
        }
    }
    fields
}

fn logical_key(kind: TicketKind, id: &str, name: &str) -> String {
    kind.logical_for_label(name)
        .or_else(|| kind.logical_for_widget(id))
        .map(str::to_string)
        .unwrap_or_else(|| {
            if name.is_empty() {
                id.to_string()
            } else {
                name.to_string()
            }
        })
}

fn parse_rows(rows: &[Value], sub_fields: &[SubField]) -> Vec<Value> {
    let mut parsed = Vec::new();
    for row in rows {
        let Some(cells) = row.as_array() else { continue };
        let mut row_map = Map::new();
        for cell in cells {
            let Some(cell_map) = cell.as_object() else {
                continue;
            };
            let cell_id = cell_map.get("id").and_then(Value::as_str).unwrap_or("");
            let Some(sub) = sub_fields.iter().find(|s| s.id == cell_id) else {
                continue;
            };
            let key = field_list_alias(&sub.name);
            let value = cell_map.get("value").cloned().unwrap_or(Value::Null);
            row_map.insert(key.to_string(), value);
        }
        if !row_map.is_empty() {
            parsed.push(Value::Object(row_map));
        }
    }
    parsed
}

/// Collects attachment tokens (with display names when the form carries
/// them) from top-level attach widgets and from `fieldList` cells.
#[must_use]
pub fn collect_attachments(items: &[Value]) -> Vec<Attachment> {
    let mut found = Vec::new();
    for item in items {
        let Some(map) = item.as_object() else { continue };
        let widget = map.get("type").and_then(Value::as_str).unwrap_or("");
        if ATTACH_WIDGETS.contains(&widget) {
            push_attachment_values(map.get("value"), &mut found);
        } else if widget == "fieldList"
            && let Some(Value::Array(rows)) = map.get("value")
        {
            for row in rows {
                let Some(cells) = row.as_array() else { continue };
                for cell in cells {
                    let Some(cell_map) = cell.as_object() else {
                        continue;
                    };
                    let cell_widget = cell_map.get("type").and_then(Value::as_str).unwrap_or("");
                    if ATTACH_WIDGETS.contains(&cell_widget) {
                        push_attachment_values(cell_map.get("value"), &mut found);
                    }
                }
            }
        }
    }
    found
}

fn push_attachment_values(raw: Option<&Value>, found: &mut Vec<Attachment>) {
    match raw {
        Some(Value::Array(list)) => {
            for entry in list {
                match entry {
                    Value::Object(map) => {
                        let token = ["file_token", "code", "file_code", "url"]
                            .iter()
                            .find_map(|k| map.get(*k).and_then(Value::as_str))
                            .filter(|s| !s.is_empty());
                        if let Some(token) = token {
                            let name = ["name", "file_name"]
                                .iter()
                                .find_map(|k| map.get(*k).and_then(Value::as_str))
                                .unwrap_or("")
                                .trim()
                                .to_string();
                            found.push(Attachment {
                                token: token.to_string(),
                                name,
                            });
                        }
                    }
                    Value::String(s) if !s.trim().is_empty() => {
                        found.push(Attachment {
                            token: s.trim().to_string(),
                            name: String::new(),
                        });
                    }
                    _ => {}
                }
            }
        }
        Some(Value::String(s)) if !s.is_empty() => {
            found.push(Attachment {
                token: s.clone(),
                name: String::new(),
            });
        }
        _ => {}
    }
}
