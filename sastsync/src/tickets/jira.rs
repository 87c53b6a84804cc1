use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument};

use super::tracker::IssueTracker;

pub const JIRA_USER_ENV: &str = "JIRA_USER";
pub const JIRA_TOKEN_ENV: &str = "JIRA_API_TOKEN";

#[derive(Clone)]
pub struct JiraCredentials {
    pub user: String,
    pub token: String,
}

impl JiraCredentials {
    pub fn from_env() -> Result<Self> {
        let user = std::env::var(JIRA_USER_ENV)
            .with_context(|| format!("{JIRA_USER_ENV} is not set"))?;
        let token = std::env::var(JIRA_TOKEN_ENV)
            .with_context(|| format!("{JIRA_TOKEN_ENV} is not set"))?;
        Ok(Self { user, token })
    }
}

#[derive(Deserialize)]
struct CreatedIssue {
    key: String,
}

#[derive(Deserialize)]
struct TransitionList {
    #[serde(default)]
    transitions: Vec<Transition>,
}

#[derive(Deserialize)]
struct Transition {
    id: String,
    name: String,
}

/// JIRA over its REST v2 API with basic auth.
pub struct JiraTracker {
    client: reqwest::Client,
    base_url: String,
    credentials: JiraCredentials,
}

impl JiraTracker {
    pub fn new(base_url: &str, credentials: JiraCredentials) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("sastsync")
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/rest/api/2/{path}", self.base_url)
    }

    async fn send(&self, request: reqwest::RequestBuilder, what: &str) -> Result<reqwest::Response> {
        let response = request
            .basic_auth(&self.credentials.user, Some(&self.credentials.token))
            .header("Accept", "application/json")
            .send()
            .await
            .with_context(|| format!("{what} request failed"))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("{what} returned HTTP {status}: {body}");
        }
        Ok(response)
    }
}

#[async_trait]
impl IssueTracker for JiraTracker {
    #[instrument(skip(self, description))]
    async fn create_issue(
        &self,
        project: &str,
        issue_type: &str,
        summary: &str,
        description: &str,
    ) -> Result<String> {
        let body = json!({
            "fields": {
                "project": { "key": project },
                "summary": summary,
                "description": description,
                "issuetype": { "name": issue_type },
            }
        });
        let response = self
            .send(self.client.post(self.url("issue")).json(&body), "create issue")
            .await?;
        let created: CreatedIssue = response
            .json()
            .await
            .context("failed to parse created issue")?;
        debug!(key = %created.key, "created issue");
        Ok(created.key)
    }

    #[instrument(skip(self, description))]
    async fn update_issue(&self, key: &str, summary: &str, description: &str) -> Result<()> {
        let body = json!({ "fields": { "summary": summary, "description": description } });
        self.send(
            self.client.put(self.url(&format!("issue/{key}"))).json(&body),
            "update issue",
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn close_issue(&self, key: &str, transition: &str) -> Result<()> {
        let transitions_url = self.url(&format!("issue/{key}/transitions"));
        let list: TransitionList = self
            .send(self.client.get(&transitions_url), "list transitions")
            .await?
            .json()
            .await
            .context("failed to parse transitions")?;

        let Some(found) = list
            .transitions
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(transition))
        else {
            let available: Vec<&str> = list.transitions.iter().map(|t| t.name.as_str()).collect();
            bail!(
                "issue {key} has no transition '{transition}' (available: {})",
                available.join(", ")
            );
        };

        let body = json!({ "transition": { "id": found.id } });
        self.send(
            self.client.post(&transitions_url).json(&body),
            "apply transition",
        )
        .await?;
        Ok(())
    }

    fn tracker_type(&self) -> &'static str {
        "JIRA"
    }
}
