pub mod auth;

use std::path::Path;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use reqwest::Url;
use reqwest::multipart::{Form, Part};
use tracing::{debug, instrument};

use crate::report::{IssueId, RawNode};
use crate::service::ScanService;

pub use auth::Credentials;

pub const DEFAULT_API_BASE: &str = "https://analysiscenter.veracode.com/api";
/// Overrides [`DEFAULT_API_BASE`]; used to point the client at a proxy or a
/// mock server.
pub const API_BASE_ENV: &str = "SASTSYNC_API_BASE_URL";

/// Client for the Veracode XML API.
#[derive(Clone)]
pub struct VeracodeClient {
    client: reqwest::Client,
    base_url: String,
    credentials: Credentials,
}

impl VeracodeClient {
    pub fn new(credentials: Credentials) -> Result<Self> {
        let base_url = std::env::var(API_BASE_ENV).unwrap_or_else(|_| DEFAULT_API_BASE.to_string());
        Self::with_base_url(credentials, &base_url)
    }

    pub fn with_base_url(credentials: Credentials, base_url: &str) -> Result<Self> {
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

    fn url(&self, endpoint: &str, params: &[(&str, &str)]) -> Result<Url> {
        let raw = format!("{}{endpoint}", self.base_url);
        Url::parse_with_params(&raw, params).with_context(|| format!("invalid API URL {raw}"))
    }

    async fn send(&self, request: reqwest::RequestBuilder, url: &Url, method: &str) -> Result<String> {
        let auth = self.credentials.authorization_header(url, method)?;
        let response = request
            .header(reqwest::header::AUTHORIZATION, auth)
            .send()
            .await
            .with_context(|| format!("request to {} failed", url.path()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .with_context(|| format!("failed to read response from {}", url.path()))?;
        if !status.is_success() {
            bail!("{} returned HTTP {status}", url.path());
        }
        if body.trim().is_empty() {
            bail!("{} returned an empty body", url.path());
        }
        if let Some(message) = service_error(&body) {
            bail!("{} failed: {message}", url.path());
        }
        Ok(body)
    }

    async fn get_text(&self, endpoint: &str, params: &[(&str, &str)]) -> Result<String> {
        let url = self.url(endpoint, params)?;
        debug!(endpoint, "GET");
        self.send(self.client.get(url.clone()), &url, "GET").await
    }

    async fn get_xml(&self, endpoint: &str, params: &[(&str, &str)]) -> Result<RawNode> {
        let body = self.get_text(endpoint, params).await?;
        RawNode::parse_xml(&body).with_context(|| format!("malformed XML from {endpoint}"))
    }
}

/// The message of an `<error>` document, if `body` is one.
fn service_error(body: &str) -> Option<String> {
    let mut rest = body.trim_start();
    if rest.starts_with("<?") {
        rest = rest.split_once("?>").map(|(_, r)| r.trim_start()).unwrap_or(rest);
    }
    if !rest.starts_with("<error") {
        return None;
    }
    let message = RawNode::parse_xml(body)
        .map(|node| node.text)
        .unwrap_or_else(|_| rest.to_string());
    Some(message)
}

fn with_sandbox<'a>(mut params: Vec<(&'a str, &'a str)>, sandbox_id: Option<&'a str>) -> Vec<(&'a str, &'a str)> {
    if let Some(id) = sandbox_id {
        params.push(("sandbox_id", id));
    }
    params
}

#[async_trait]
impl ScanService for VeracodeClient {
    #[instrument(skip(self))]
    async fn find_sandbox(&self, app_id: &str, name: &str) -> Result<Option<String>> {
        let doc = self
            .get_xml("/5.0/getsandboxlist.do", &[("app_id", app_id)])
            .await?;
        Ok(doc
            .find_all("sandbox")
            .into_iter()
            .find(|s| s.attr("sandbox_name") == Some(name))
            .and_then(|s| s.attr("sandbox_id"))
            .map(String::from))
    }

    #[instrument(skip(self))]
    async fn create_sandbox(&self, app_id: &str, name: &str) -> Result<Option<String>> {
        let doc = self
            .get_xml(
                "/5.0/createsandbox.do",
                &[("app_id", app_id), ("sandbox_name", name)],
            )
            .await?;
        Ok(doc.find_attr("sandbox_id").map(String::from))
    }

    #[instrument(skip(self))]
    async fn create_build(
        &self,
        app_id: &str,
        sandbox_id: Option<&str>,
        scan_name: &str,
    ) -> Result<Option<String>> {
        let params = with_sandbox(vec![("app_id", app_id), ("version", scan_name)], sandbox_id);
        let doc = self.get_xml("/5.0/createbuild.do", &params).await?;
        Ok(doc.find_attr("build_id").map(String::from))
    }

    #[instrument(skip(self), fields(file = %file.display()))]
    async fn upload_file(&self, app_id: &str, sandbox_id: Option<&str>, file: &Path) -> Result<()> {
        let bytes = tokio::fs::read(file)
            .await
            .with_context(|| format!("failed to read {}", file.display()))?;
        let file_name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        let form = Form::new().part("file", Part::bytes(bytes).file_name(file_name));

        let params = with_sandbox(vec![("app_id", app_id)], sandbox_id);
        let url = self.url("/5.0/uploadfile.do", &params)?;
        self.send(self.client.post(url.clone()).multipart(form), &url, "POST")
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn begin_prescan(&self, app_id: &str, sandbox_id: Option<&str>, auto_scan: bool) -> Result<()> {
        let auto_scan = if auto_scan { "true" } else { "false" };
        let params = with_sandbox(vec![("app_id", app_id), ("auto_scan", auto_scan)], sandbox_id);
        self.get_text("/5.0/beginprescan.do", &params).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn results_ready(&self, app_id: &str, build_id: &str, sandbox_id: Option<&str>) -> Result<bool> {
        let params = with_sandbox(vec![("app_id", app_id), ("build_id", build_id)], sandbox_id);
        let doc = self.get_xml("/5.0/getbuildinfo.do", &params).await?;
        Ok(doc.find_attr("results_ready") == Some("true"))
    }

    #[instrument(skip(self))]
    async fn latest_build_id(&self, app_id: &str, sandbox_id: Option<&str>) -> Result<Option<String>> {
        let params = with_sandbox(vec![("app_id", app_id)], sandbox_id);
        let doc = self.get_xml("/5.0/getbuildlist.do", &params).await?;
        let build_ids: Vec<String> = doc
            .find_all("build")
            .into_iter()
            .filter_map(|b| b.attr("build_id"))
            .map(String::from)
            .collect();

        // The list is oldest first.
        for build_id in build_ids.iter().rev() {
            if self.results_ready(app_id, build_id, sandbox_id).await? {
                return Ok(Some(build_id.clone()));
            }
        }
        Ok(None)
    }

    #[instrument(skip(self))]
    async fn detailed_report(&self, build_id: &str) -> Result<String> {
        self.get_text("/5.0/detailedreport.do", &[("build_id", build_id)])
            .await
    }

    #[instrument(skip(self))]
    async fn add_comment(&self, build_id: &str, issue_ids: &[IssueId], comment: &str) -> Result<()> {
        let flaw_ids = issue_ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",");
        self.get_text(
            "/updatemitigationinfo.do",
            &[
                ("build_id", build_id),
                ("action", "comment"),
                ("comment", comment),
                ("flaw_id_list", flaw_ids.as_str()),
            ],
        )
        .await?;
        Ok(())
    }
}
