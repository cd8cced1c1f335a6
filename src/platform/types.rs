//! Wire types for the Feishu Open API.
//!
//! Every business endpoint wraps its payload in `{code, msg, data}`; the
//! token endpoint is the exception and carries its fields at the top level.

use serde::Deserialize;
use serde_json::Value;

/// Standard `{code, msg, data}` response wrapper.
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope<T> {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub msg: String,
    pub data: Option<T>,
}

/// `auth/v3/tenant_access_token/internal` reply. Token and expiry sit
/// beside `code`/`msg` rather than inside `data`.
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub msg: String,
    pub tenant_access_token: Option<String>,
    pub expire: Option<u64>,
}

/// One page of `approval/v4/instances/query` results.
#[derive(Debug, Default, Deserialize)]
pub struct InstancePage {
    #[serde(default)]
    pub instance_code_list: Vec<String>,
    #[serde(default)]
    pub page_token: Option<String>,
    #[serde(default)]
    pub has_more: Option<bool>,
}

impl InstancePage {
    /// Token for the next page. Feishu signals the last page with an
    /// empty string rather than omitting the field.
    #[must_use]
    pub fn next_page_token(&self) -> Option<&str> {
        self.page_token.as_deref().filter(|t| !t.is_empty())
    }
}

/// `approval/v4/instances/{code}` detail payload.
#[derive(Debug, Default, Deserialize)]
pub struct InstanceDetail {
    #[serde(default)]
    pub approval_code: String,
    #[serde(default)]
    pub instance_code: String,
    #[serde(default)]
    pub status: String,
    /// Submitted form, JSON-encoded as a string by the API.
    #[serde(default)]
    pub form: String,
    #[serde(default)]
    pub task_list: Vec<ApprovalTask>,
}

impl InstanceDetail {
    /// Decodes the embedded form string into its widget array. A missing
    /// or malformed form yields an empty list.
    #[must_use]
    pub fn form_items(&self) -> Vec<Value> {
        serde_json::from_str(&self.form).unwrap_or_default()
    }

    /// First task pending on `user_id`, if any.
    #[must_use]
    pub fn pending_task_for(&self, user_id: &str) -> Option<&ApprovalTask> {
        self.task_list
            .iter()
            .find(|t| t.user_id == user_id && t.status == "PENDING")
    }
}

/// One approval node task from an instance detail.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApprovalTask {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub status: String,
}

/// `approval/v4/approvals/{code}` definition payload. Some tenants nest
/// the body under an `approval` key; both shapes decode here.
#[derive(Debug, Default, Deserialize)]
pub struct ApprovalDefinition {
    #[serde(default)]
    pub approval_name: String,
    /// Widget definitions, JSON-encoded as a string by the API.
    #[serde(default)]
    pub form: String,
    /// Process nodes. A definition without any is submit-only and
    /// rejects instance creation with code 1390013.
    #[serde(default)]
    pub node_list: Option<Value>,
}

impl ApprovalDefinition {
    /// Decodes the embedded widget definition string.
    #[must_use]
    pub fn form_widgets(&self) -> Vec<Value> {
        match serde_json::from_str::<Value>(&self.form) {
            Ok(Value::Array(items)) => items,
            Ok(Value::Object(map)) => ["widgets", "children", "items"]
                .iter()
                .find_map(|key| map.get(*key).and_then(Value::as_array).cloned())
                .unwrap_or_default(),
            _ => Vec::new(),
        }
    }

    /// Whether the definition carries zero approval nodes.
    #[must_use]
    pub fn is_submit_only(&self) -> bool {
        match &self.node_list {
            None => false,
            Some(Value::Array(nodes)) => nodes.is_empty(),
            Some(Value::String(raw)) => serde_json::from_str::<Vec<Value>>(raw)
                .map(|nodes| nodes.is_empty())
                .unwrap_or(false),
            Some(_) => false,
        }
    }
}

/// Raw definition envelope; unwraps the optional `approval` nesting.
#[derive(Debug, Deserialize)]
pub(crate) struct DefinitionData {
    approval: Option<ApprovalDefinition>,
    #[serde(flatten)]
    flat: ApprovalDefinition,
}

impl DefinitionData {
    pub(crate) fn into_definition(self) -> ApprovalDefinition {
        self.approval.unwrap_or(self.flat)
    }
}

/// `drive/v1/files/{token}/download` can answer with JSON instead of
/// bytes, pointing at the real file.
#[derive(Debug, Deserialize)]
pub(crate) struct DownloadIndirection {
    pub download_link: Option<String>,
    pub download_url: Option<String>,
}

/// `drive/v1/medias/batch_get_tmp_download_url` payload.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct TmpDownloadUrls {
    #[serde(default)]
    pub tmp_download_urls: Vec<TmpDownloadUrl>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TmpDownloadUrl {
    pub url: Option<String>,
}
