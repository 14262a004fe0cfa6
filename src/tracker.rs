//! GraphQL issue-tracker client (Linear-compatible API).

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use feedback_insights_core::scoring::Priority;

use crate::config::TicketsConfig;
use crate::tickets::{Issue, IssuePage, IssueTracker};

const PAGE_SIZE: u32 = 100;
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Tracker priority numbers: 1 urgent, 2 high, 3 medium, 4 low.
pub fn tracker_priority(priority: Priority) -> u8 {
    (priority.level() + 1).min(4)
}

pub struct GraphQlTracker {
    http: reqwest::Client,
    url: String,
    api_key: String,
}

impl GraphQlTracker {
    /// # Errors
    ///
    /// Fails when `ISSUE_TRACKER_API_KEY` is not set.
    pub fn new(config: &TicketsConfig) -> Result<Self> {
        let api_key = std::env::var("ISSUE_TRACKER_API_KEY")
            .map_err(|_| anyhow!("ISSUE_TRACKER_API_KEY environment variable not set"))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            http,
            url: config.url.clone(),
            api_key,
        })
    }

    async fn execute<T: DeserializeOwned>(&self, query: &str, variables: Value) -> Result<T> {
        let response = self
            .http
            .post(&self.url)
            .header("Authorization", &self.api_key)
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await
            .context("issue tracker request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Issue tracker API error {}: {}", status, body);
        }

        let envelope: GraphQlResponse<T> = response
            .json()
            .await
            .context("Invalid issue tracker response")?;
        into_data(envelope)
    }
}

#[derive(Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Deserialize)]
struct GraphQlError {
    message: String,
}

fn into_data<T>(envelope: GraphQlResponse<T>) -> Result<T> {
    if let Some(first) = envelope.errors.first() {
        bail!("GraphQL error: {}", first.message);
    }
    envelope
        .data
        .ok_or_else(|| anyhow!("GraphQL response carried no data"))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IssueCreateData {
    issue_create: IssuePayload,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IssueUpdateData {
    issue_update: MutationPayload,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommentCreateData {
    comment_create: MutationPayload,
}

#[derive(Deserialize)]
struct IssuePayload {
    success: bool,
    issue: Option<Issue>,
}

#[derive(Deserialize)]
struct MutationPayload {
    success: bool,
}

#[derive(Deserialize)]
struct IssuesData {
    issues: IssueConnection,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IssueConnection {
    nodes: Vec<Issue>,
    page_info: PageInfo,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    has_next_page: bool,
    end_cursor: Option<String>,
}

const CREATE_ISSUE: &str = r#"
mutation CreateIssue($title: String!, $description: String!, $teamId: String!, $priority: Int!) {
  issueCreate(input: { title: $title, description: $description, teamId: $teamId, priority: $priority }) {
    success
    issue { id title description url }
  }
}"#;

const UPDATE_ISSUE: &str = r#"
mutation UpdateIssue($id: String!, $priority: Int!, $description: String!) {
  issueUpdate(id: $id, input: { priority: $priority, description: $description }) {
    success
  }
}"#;

const CREATE_COMMENT: &str = r#"
mutation CreateComment($issueId: String!, $body: String!) {
  commentCreate(input: { issueId: $issueId, body: $body }) {
    success
  }
}"#;

const LIST_ISSUES: &str = r#"
query Issues($first: Int!, $after: String) {
  issues(first: $first, after: $after) {
    nodes { id title description url }
    pageInfo { hasNextPage endCursor }
  }
}"#;

#[async_trait]
impl IssueTracker for GraphQlTracker {
    async fn create_issue(
        &self,
        team_id: &str,
        title: &str,
        description: &str,
        priority: Priority,
    ) -> Result<Issue> {
        let data: IssueCreateData = self
            .execute(
                CREATE_ISSUE,
                json!({
                    "title": title,
                    "description": description,
                    "teamId": team_id,
                    "priority": tracker_priority(priority),
                }),
            )
            .await?;
        match data.issue_create {
            IssuePayload {
                success: true,
                issue: Some(issue),
            } => Ok(issue),
            _ => bail!("failed to create issue"),
        }
    }

    async fn update_issue(&self, issue_id: &str, priority: Priority, description: &str) -> Result<()> {
        let data: IssueUpdateData = self
            .execute(
                UPDATE_ISSUE,
                json!({
                    "id": issue_id,
                    "priority": tracker_priority(priority),
                    "description": description,
                }),
            )
            .await?;
        if !data.issue_update.success {
            bail!("failed to update issue {}", issue_id);
        }
        Ok(())
    }

    async fn add_comment(&self, issue_id: &str, body: &str) -> Result<()> {
        let data: CommentCreateData = self
            .execute(CREATE_COMMENT, json!({ "issueId": issue_id, "body": body }))
            .await?;
        if !data.comment_create.success {
            bail!("failed to add comment to issue {}", issue_id);
        }
        Ok(())
    }

    async fn list_issues(&self, cursor: Option<&str>) -> Result<IssuePage> {
        let data: IssuesData = self
            .execute(LIST_ISSUES, json!({ "first": PAGE_SIZE, "after": cursor }))
            .await?;
        let next_cursor = if data.issues.page_info.has_next_page {
            data.issues.page_info.end_cursor
        } else {
            None
        };
        Ok(IssuePage {
            issues: data.issues.nodes,
            next_cursor,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_priority() {
        assert_eq!(tracker_priority(Priority::P0), 1);
        assert_eq!(tracker_priority(Priority::P2), 3);
        assert_eq!(tracker_priority(Priority::P3), 4);
        assert_eq!(tracker_priority(Priority::P4), 4);
    }

    #[test]
    fn test_graphql_errors_surface_first_message() {
        let envelope: GraphQlResponse<IssuesData> = serde_json::from_value(json!({
            "data": null,
            "errors": [{ "message": "Authentication required" }, { "message": "other" }]
        }))
        .unwrap();
        let err = into_data(envelope).err().unwrap().to_string();
        assert_eq!(err, "GraphQL error: Authentication required");
    }

    #[test]
    fn test_issue_page_decodes() {
        let envelope: GraphQlResponse<IssuesData> = serde_json::from_value(json!({
            "data": { "issues": {
                "nodes": [{ "id": "A-1", "title": "Complaints: Payments (LOB)", "description": null }],
                "pageInfo": { "hasNextPage": true, "endCursor": "c1" }
            }}
        }))
        .unwrap();
        let data = into_data(envelope).unwrap();
        assert_eq!(data.issues.nodes[0].id, "A-1");
        assert_eq!(data.issues.page_info.end_cursor.as_deref(), Some("c1"));
    }
}
