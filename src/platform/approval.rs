//! Approval v4 endpoints: instance query/detail, task decisions,
//! comments, creation and form definitions.

use chrono::{Duration, Utc};

use crate::error::PlatformError;

use super::FeishuClient;
use super::types::{ApprovalDefinition, DefinitionData, InstanceDetail, InstancePage};

/// Business code Feishu returns when a definition has no approval nodes
/// and therefore cannot be created through the API.
pub const FREE_PROCESS_CODE: i64 = 1390013;

/// Identifies one approval task for approve/reject calls.
#[derive(Debug, Clone)]
pub struct TaskRef {
    pub approval_code: String,
    pub instance_code: String,
    pub user_id: String,
    pub task_id: String,
}

/// Deep link that opens the create-instance form inside the Feishu client.
#[must_use]
pub fn approval_create_link(approval_code: &str) -> String {
    format!("https://applink.feishu.cn/client/approval/create?approvalCode={approval_code}")
}

impl FeishuClient {
    /// Collects every PENDING instance code for `approval_code` submitted
    /// within the lookback window, following pagination to the end.
    ///
    /// The query filter matches submitters, not assignees, so callers
    /// still have to check each instance's `task_list` for their user.
    pub async fn pending_instances(
        &self,
        approval_code: &str,
        lookback_days: i64,
    ) -> Result<Vec<String>, PlatformError> {
        let now = Utc::now();
        let from = now - Duration::days(lookback_days);
        let body = serde_json::json!({
            "approval_code": approval_code,
            "instance_start_time_from": from.timestamp_millis().to_string(),
            "instance_start_time_to": now.timestamp_millis().to_string(),
            "instance_status": "PENDING",
        });

        let url = self.api_url("/approval/v4/instances/query");
        let mut codes = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut request = self
                .http()
                .post(&url)
                .query(&[("user_id_type", "user_id")])
                .json(&body);
            if let Some(token) = &page_token {
                request = request.query(&[("page_token", token.as_str())]);
            }
            let page: InstancePage = self.call(request).await?;
            let next = page.next_page_token().map(str::to_string);
            codes.extend(page.instance_code_list);
            match next {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }
        Ok(codes)
    }

    /// Fetches the full detail of one approval instance.
    pub async fn instance_detail(
        &self,
        instance_code: &str,
    ) -> Result<InstanceDetail, PlatformError> {
        let url = self.api_url(&format!("/approval/v4/instances/{instance_code}"));
        let request = self.http().get(&url).query(&[("user_id_type", "user_id")]);
        self.call(request).await
    }

    /// Approves one pending task with a comment.
    pub async fn approve_task(&self, task: &TaskRef, comment: &str) -> Result<(), PlatformError> {
        self.decide_task("approve", task, comment).await
    }

    /// Rejects one pending task with a comment.
    pub async fn reject_task(&self, task: &TaskRef, comment: &str) -> Result<(), PlatformError> {
        self.decide_task("reject", task, comment).await
    }

    async fn decide_task(
        &self,
        action: &str,
        task: &TaskRef,
        comment: &str,
    ) -> Result<(), PlatformError> {
        let url = self.api_url(&format!("/approval/v4/tasks/{action}"));
        let request = self
            .http()
            .post(&url)
            .query(&[("user_id_type", "user_id")])
            .json(&serde_json::json!({
                "approval_code": task.approval_code,
                "instance_code": task.instance_code,
                "user_id": task.user_id,
                "task_id": task.task_id,
                "comment": comment,
            }));
        self.call_ok(request).await
    }

    /// Leaves a comment on an approval instance.
    pub async fn add_comment(
        &self,
        instance_code: &str,
        content: &str,
    ) -> Result<(), PlatformError> {
        let url = self.api_url(&format!("/approval/v4/instances/{instance_code}/comments"));
        let request = self
            .http()
            .post(&url)
            .query(&[("user_id_type", "user_id")])
            .json(&serde_json::json!({ "content": content }));
        self.call_ok(request).await
    }

    /// Creates a new approval instance on behalf of `user_id`. `form` is
    /// the JSON-encoded widget value array. The `uuid` field lets the
    /// platform drop an accidental duplicate submission.
    pub async fn create_instance(
        &self,
        approval_code: &str,
        user_id: &str,
        form: &str,
    ) -> Result<(), PlatformError> {
        let url = self.api_url("/approval/v4/instances");
        let request = self.http().post(&url).json(&serde_json::json!({
            "approval_code": approval_code,
            "user_id": user_id,
            "form": form,
            "uuid": uuid::Uuid::new_v4().to_string(),
        }));
        self.call_ok(request).await
    }

    /// Fetches the approval definition, including its form widget layout.
    pub async fn approval_definition(
        &self,
        approval_code: &str,
    ) -> Result<ApprovalDefinition, PlatformError> {
        let url = self.api_url(&format!("/approval/v4/approvals/{approval_code}"));
        let data: DefinitionData = self.call(self.http().get(&url)).await?;
        Ok(data.into_definition())
    }
}
