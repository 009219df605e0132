use crate::error::FetchError;
use crate::providers::HostingApi;
use crate::stats::{RunConclusion, RunRecord, RunStatus};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

const WORKFLOW_DIR: &str = ".github/workflows";
const PER_PAGE: usize = 100;

/// GitHub REST client for repository, run-history and workflow-file lookups.
pub struct GitHubClient {
    client: reqwest::Client,
    base_url: String,
}

/// Workflow run as returned by `GET /repos/{repo}/actions/runs`.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowRun {
    pub id: u64,
    pub name: Option<String>,
    pub path: Option<String>,
    pub status: Option<RunStatus>,
    pub conclusion: Option<RunConclusion>,
    pub created_at: DateTime<Utc>,
    pub event: String,
}

impl WorkflowRun {
    pub fn into_record(self, repository: &str) -> RunRecord {
        let workflow = self
            .name
            .filter(|n| !n.is_empty())
            .or(self.path)
            .unwrap_or_else(|| "unknown".to_string());

        RunRecord {
            repository: repository.to_string(),
            workflow,
            created_at: self.created_at,
            status: self.status.unwrap_or(RunStatus::Other),
            conclusion: self.conclusion,
            trigger_event: self.event,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WorkflowRunsResponse {
    workflow_runs: Vec<WorkflowRun>,
}

#[derive(Debug, Deserialize)]
struct RepositoryEntry {
    full_name: String,
    #[serde(default)]
    archived: bool,
}

#[derive(Debug, Deserialize)]
struct ContentEntry {
    name: String,
    #[serde(rename = "type")]
    kind: String,
}

impl GitHubClient {
    /// Create a new GitHub API client
    pub fn new(token: Option<String>) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("ciaudit/", env!("CARGO_PKG_VERSION"))),
        );
        headers.insert("X-GitHub-Api-Version", HeaderValue::from_static("2022-11-28"));

        if let Some(ref t) = token {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", t)).context("Invalid GitHub token")?,
            );
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: "https://api.github.com".to_string(),
        })
    }

    /// Point the client at a GitHub Enterprise or test server.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// GET a JSON document; `Ok(None)` on 404.
    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<Option<T>, FetchError> {
        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|source| FetchError::Http {
                url: url.to_string(),
                source,
            })?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        response
            .json::<T>()
            .await
            .map(Some)
            .map_err(|e| FetchError::Decode {
                url: url.to_string(),
                reason: e.to_string(),
            })
    }

    /// Page through a listing endpoint until it runs dry or `limit` is reached.
    async fn get_paged<T: DeserializeOwned>(&self, url: &str, limit: usize) -> Result<Option<Vec<T>>, FetchError> {
        let mut all = Vec::new();
        let mut page = 1;

        while all.len() < limit {
            let query = [("per_page", PER_PAGE.to_string()), ("page", page.to_string())];
            let Some(batch) = self.get_json::<Vec<T>>(url, &query).await? else {
                return Ok(if page == 1 { None } else { Some(all) });
            };
            let done = batch.len() < PER_PAGE;
            all.extend(batch);
            if done {
                break;
            }
            page += 1;
        }

        all.truncate(limit);
        Ok(Some(all))
    }
}

#[async_trait]
impl HostingApi for GitHubClient {
    async fn list_repositories(&self, owner: &str) -> Result<Vec<String>, FetchError> {
        let org_url = format!("{}/orgs/{}/repos", self.base_url, owner);
        let repos: Vec<RepositoryEntry> = match self.get_paged(&org_url, usize::MAX).await? {
            Some(repos) => repos,
            None => {
                let user_url = format!("{}/users/{}/repos", self.base_url, owner);
                self.get_paged(&user_url, usize::MAX)
                    .await?
                    .ok_or_else(|| FetchError::Other(format!("owner '{owner}' not found")))?
            }
        };

        Ok(repos
            .into_iter()
            .filter(|r| !r.archived)
            .map(|r| r.full_name)
            .collect())
    }

    async fn list_run_records(&self, repository: &str, limit: usize) -> Result<Vec<RunRecord>, FetchError> {
        let url = format!("{}/repos/{}/actions/runs", self.base_url, repository);
        let mut runs = Vec::new();
        let mut page = 1;

        while runs.len() < limit {
            let per_page = PER_PAGE.min(limit);
            let query = [("per_page", per_page.to_string()), ("page", page.to_string())];
            let response: WorkflowRunsResponse = self
                .get_json(&url, &query)
                .await?
                .ok_or_else(|| FetchError::Status {
                    url: url.clone(),
                    status: StatusCode::NOT_FOUND.as_u16(),
                })?;

            let fetched = response.workflow_runs.len();
            runs.extend(response.workflow_runs);
            if fetched < per_page {
                break;
            }
            page += 1;
        }

        runs.truncate(limit);
        log::debug!("Fetched {} runs for {}", runs.len(), repository);

        Ok(runs.into_iter().map(|run| run.into_record(repository)).collect())
    }

    async fn list_definition_files(&self, repository: &str) -> Result<Vec<String>, FetchError> {
        let url = format!("{}/repos/{}/contents/{}", self.base_url, repository, WORKFLOW_DIR);
        let entries: Option<Vec<ContentEntry>> = self.get_json(&url, &[]).await?;

        Ok(entries
            .unwrap_or_default()
            .into_iter()
            .filter(|e| e.kind == "file")
            .map(|e| e.name)
            .collect())
    }

    async fn fetch_definition(&self, repository: &str, file: &str) -> Result<Option<String>, FetchError> {
        let url = format!(
            "{}/repos/{}/contents/{}/{}",
            self.base_url, repository, WORKFLOW_DIR, file
        );

        let response = self
            .client
            .get(&url)
            .header(ACCEPT, "application/vnd.github.raw")
            .send()
            .await
            .map_err(|source| FetchError::Http {
                url: url.clone(),
                source,
            })?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(FetchError::Status {
                url,
                status: response.status().as_u16(),
            });
        }

        response
            .text()
            .await
            .map(Some)
            .map_err(|source| FetchError::Http { url, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workflow_run_into_record() {
        let json = r#"{
            "id": 42,
            "name": "CI",
            "path": ".github/workflows/ci.yml",
            "status": "completed",
            "conclusion": "failure",
            "created_at": "2024-05-01T10:00:00Z",
            "event": "push"
        }"#;
        let run: WorkflowRun = serde_json::from_str(json).unwrap();
        let record = run.into_record("acme/web");
        assert_eq!(record.repository, "acme/web");
        assert_eq!(record.workflow, "CI");
        assert_eq!(record.status, RunStatus::Completed);
        assert_eq!(record.conclusion, Some(RunConclusion::Failure));
        assert_eq!(record.trigger_event, "push");
    }

    #[test]
    fn test_in_progress_run_without_name() {
        let json = r#"{
            "id": 7,
            "name": null,
            "path": ".github/workflows/nightly.yml",
            "status": "in_progress",
            "conclusion": null,
            "created_at": "2024-05-01T10:00:00Z",
            "event": "schedule"
        }"#;
        let record = serde_json::from_str::<WorkflowRun>(json)
            .unwrap()
            .into_record("acme/web");
        assert_eq!(record.workflow, ".github/workflows/nightly.yml");
        assert_eq!(record.status, RunStatus::InProgress);
        assert!(record.conclusion.is_none());
    }

    #[test]
    fn test_base_url_override() {
        let client = GitHubClient::new(None)
            .unwrap()
            .with_base_url("http://localhost:8080/api/v3/");
        assert_eq!(client.base_url, "http://localhost:8080/api/v3");
    }
}
