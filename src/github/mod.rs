pub mod types;

#[cfg(test)]
pub mod mock;

pub use types::{
    BranchProtection, CheckRun, CheckSummary, Label, MergeMethod, MergeStatus, PullRequest,
    StatusItem,
};

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{
    HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE, LINK, USER_AGENT,
};
use reqwest::{Method, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, warn};

const GITHUB_API: &str = "https://api.github.com";

/// JSON API v3 plus the check-runs preview flag.
const ACCEPT_HEADER: &str =
    "application/vnd.github.v3+json, application/vnd.github.antiope-preview+json";

/// Largest page size the host serves.
const PER_PAGE: &str = "100";

/// Upper bound on pages followed for one listing.
const MAX_PAGES: usize = 50;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("GitHub API request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("GitHub API returned {status} for {url}")]
    Status {
        status: reqwest::StatusCode,
        url: String,
    },

    #[error("Failed to decode response from {url}: {source}")]
    Decode {
        url: String,
        source: serde_json::Error,
    },

    #[error("Invalid repository URL: {0}")]
    InvalidUrl(String),

    #[error("Credential is not a valid header value")]
    InvalidCredential,

    #[error("Merge of #{number} was rejected: {message}")]
    MergeRejected { number: u64, message: String },
}

/// Everything the decision loop needs from a hosted repository.
/// Implemented by `RepoClient` against the REST API and by the test mock.
#[async_trait]
pub trait RepoApi: Send + Sync {
    /// "owner/repo", used for logging
    fn name(&self) -> &str;

    /// Open pull requests in the host's default order (newest first).
    async fn list_open_pulls(&self) -> Result<Vec<PullRequest>, ApiError>;

    async fn merge_status(&self, number: u64) -> Result<MergeStatus, ApiError>;

    async fn branch_protection(&self, branch: &str) -> Result<BranchProtection, ApiError>;

    async fn check_runs(&self, sha: &str) -> Result<CheckSummary, ApiError>;

    async fn statuses(&self, sha: &str) -> Result<CheckSummary, ApiError>;

    async fn merge(&self, pr: &PullRequest, method: MergeMethod) -> Result<(), ApiError>;

    /// Bring the source branch up to date with the target branch.
    async fn update_branch(&self, pr: &PullRequest) -> Result<(), ApiError>;

    async fn delete_branch(&self, branch: &str) -> Result<(), ApiError>;

    async fn issue_labels(&self, number: u64) -> Result<Vec<Label>, ApiError>;

    async fn remove_label(&self, number: u64, label: &str) -> Result<(), ApiError>;

    async fn post_comment(&self, number: u64, body: &str) -> Result<(), ApiError>;
}

/// Normalize a configured repository into its REST API base URL.
///
/// Accepted forms:
/// - `owner/repo`
/// - `https://github.com/owner/repo` (optionally ending in `.git`)
/// - `https://api.github.com/repos/owner/repo`
/// - `https://ghe.example.com/api/v3/repos/owner/repo`
pub fn parse_repo_url(input: &str) -> Result<Url, ApiError> {
    let invalid = || ApiError::InvalidUrl(input.to_string());
    let trimmed = input.trim().trim_end_matches('/');

    if !trimmed.contains("://") {
        let parts: Vec<_> = trimmed.split('/').collect();
        if parts.len() != 2 || parts.iter().any(|p| p.is_empty()) {
            return Err(invalid());
        }
        return api_base(GITHUB_API, parts[0], parts[1].trim_end_matches(".git"))
            .ok_or_else(invalid);
    }

    let parsed = Url::parse(trimmed).map_err(|_| invalid())?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(invalid());
    }

    let segments: Vec<_> = parsed
        .path_segments()
        .ok_or_else(invalid)?
        .filter(|segment| !segment.is_empty())
        .collect();

    if matches!(parsed.host_str(), Some("github.com") | Some("www.github.com")) {
        if segments.len() != 2 {
            return Err(invalid());
        }
        return api_base(GITHUB_API, segments[0], segments[1].trim_end_matches(".git"))
            .ok_or_else(invalid);
    }

    match segments.iter().position(|s| *s == "repos") {
        Some(i) if segments.len() == i + 3 => Ok(parsed),
        _ => Err(invalid()),
    }
}

fn api_base(root: &str, owner: &str, repo: &str) -> Option<Url> {
    let mut url = Url::parse(root).ok()?;
    url.path_segments_mut()
        .ok()?
        .pop_if_empty()
        .extend(["repos", owner, repo]);
    Some(url)
}

/// "owner/repo" from an API base URL.
fn repo_name(base: &Url) -> String {
    let segments: Vec<_> = base
        .path_segments()
        .map(|s| s.filter(|p| !p.is_empty()).collect())
        .unwrap_or_default();
    match segments.as_slice() {
        [.., owner, repo] => format!("{owner}/{repo}"),
        _ => base.to_string(),
    }
}

/// Extract the `rel="next"` target from a `Link` response header.
pub fn next_page(link: &str) -> Option<Url> {
    link.split(',').find_map(|entry| {
        let mut parts = entry.split(';');
        let target = parts.next()?.trim().strip_prefix('<')?.strip_suffix('>')?;
        if parts.any(|param| param.trim() == r#"rel="next""#) {
            Url::parse(target).ok()
        } else {
            None
        }
    })
}

/// Split a branch name into path segments so `feature/x` stays two segments.
fn branch_segments<'a>(prefix: &[&'a str], branch: &'a str) -> Vec<&'a str> {
    prefix.iter().copied().chain(branch.split('/')).collect()
}

/// Signed HTTP access to one repository's API base.
pub struct Transport {
    client: reqwest::Client,
    base: Url,
}

impl Transport {
    pub fn new(base: Url, token: &str, timeout: Duration) -> Result<Self, ApiError> {
        let mut auth = HeaderValue::from_str(&format!("token {token}"))
            .map_err(|_| ApiError::InvalidCredential)?;
        auth.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);
        headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_HEADER));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(USER_AGENT, HeaderValue::from_static("automerge-bot"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;

        Ok(Self { client, base })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Append percent-encoded path segments to the base URL.
    pub fn url(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidUrl(self.base.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Send a request; returns the body and the `rel="next"` page, if any.
    async fn execute(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<(String, Option<Url>), ApiError> {
        let response = request.send().await?;
        let status = response.status();
        let url = response.url().to_string();
        if !status.is_success() {
            return Err(ApiError::Status { status, url });
        }
        let next = response
            .headers()
            .get(LINK)
            .and_then(|value| value.to_str().ok())
            .and_then(next_page);
        Ok((response.text().await?, next))
    }

    fn decode<T: DeserializeOwned>(url: &Url, body: &str) -> Result<T, ApiError> {
        serde_json::from_str(body).map_err(|source| ApiError::Decode {
            url: url.to_string(),
            source,
        })
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        segments: &[&str],
        query: &[(&str, &str)],
    ) -> Result<T, ApiError> {
        let url = self.url(segments)?;
        debug!(%url, "GET");
        let (body, _) = self.execute(self.client.get(url.clone()).query(query)).await?;
        Self::decode(&url, &body)
    }

    /// GET a paginated listing, following `Link` headers until the last page.
    /// Each decoded page is returned in order.
    pub async fn get_pages<T: DeserializeOwned>(
        &self,
        segments: &[&str],
        query: &[(&str, &str)],
    ) -> Result<Vec<T>, ApiError> {
        let mut url = self.url(segments)?;
        let mut request = self
            .client
            .get(url.clone())
            .query(query)
            .query(&[("per_page", PER_PAGE)]);
        let mut pages = Vec::new();
        loop {
            debug!(%url, page = pages.len() + 1, "GET");
            let (body, next) = self.execute(request).await?;
            pages.push(Self::decode(&url, &body)?);
            match next {
                Some(next) if pages.len() < MAX_PAGES => {
                    request = self.client.get(next.clone());
                    url = next;
                }
                Some(_) => {
                    warn!(%url, pages = pages.len(), "page limit reached, listing truncated");
                    return Ok(pages);
                }
                None => return Ok(pages),
            }
        }
    }

    /// Send a JSON body and return the raw response text (may be empty).
    pub async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        segments: &[&str],
        body: &B,
    ) -> Result<String, ApiError> {
        let url = self.url(segments)?;
        debug!(%url, %method, "sending");
        let (text, _) = self.execute(self.client.request(method, url).json(body)).await?;
        Ok(text)
    }

    pub async fn delete(&self, segments: &[&str]) -> Result<(), ApiError> {
        let url = self.url(segments)?;
        debug!(%url, "DELETE");
        self.execute(self.client.delete(url)).await.map(|_| ())
    }
}

#[derive(Deserialize)]
struct WireLabel {
    name: String,
}

#[derive(Deserialize)]
struct WireRepo {
    full_name: String,
}

#[derive(Deserialize)]
struct WireBranchRef {
    #[serde(rename = "ref")]
    ref_name: String,
    sha: String,
    repo: Option<WireRepo>,
}

#[derive(Deserialize)]
struct WirePull {
    id: u64,
    number: u64,
    title: String,
    html_url: String,
    #[serde(default)]
    draft: bool,
    #[serde(default)]
    labels: Vec<WireLabel>,
    head: WireBranchRef,
    base: WireBranchRef,
    #[serde(default)]
    mergeable: Option<bool>,
    #[serde(default)]
    mergeable_state: Option<String>,
}

impl From<WirePull> for PullRequest {
    fn from(pull: WirePull) -> Self {
        // A deleted fork reports no head repo; treat it as foreign.
        let is_cross_repository = match (&pull.head.repo, &pull.base.repo) {
            (Some(head), Some(base)) => head.full_name != base.full_name,
            _ => true,
        };
        PullRequest {
            id: pull.id,
            number: pull.number,
            title: pull.title,
            url: pull.html_url,
            labels: pull.labels.into_iter().map(|l| l.name).collect(),
            head_ref: pull.head.ref_name,
            head_sha: pull.head.sha,
            base_ref: pull.base.ref_name,
            is_cross_repository,
            draft: pull.draft,
        }
    }
}

impl From<&WirePull> for MergeStatus {
    fn from(pull: &WirePull) -> Self {
        MergeStatus {
            mergeable: pull.mergeable,
            mergeable_state: pull
                .mergeable_state
                .clone()
                .unwrap_or_else(|| "unknown".to_string()),
        }
    }
}

#[derive(Deserialize)]
struct WireBranch {
    #[serde(default)]
    protected: bool,
}

#[derive(Deserialize)]
struct WireCheckRuns {
    #[serde(default)]
    check_runs: Vec<WireCheckRun>,
}

#[derive(Deserialize)]
struct WireCheckRun {
    name: String,
    status: String,
    conclusion: Option<String>,
}

#[derive(Deserialize)]
struct WireCombinedStatus {
    #[serde(default)]
    statuses: Vec<WireStatus>,
}

#[derive(Deserialize)]
struct WireStatus {
    context: String,
    state: String,
}

/// Concatenate listing pages in the order the host served them.
fn pulls_from_pages(pages: Vec<Vec<WirePull>>) -> Vec<PullRequest> {
    pages.into_iter().flatten().map(PullRequest::from).collect()
}

impl From<Vec<WireCheckRuns>> for CheckSummary {
    fn from(pages: Vec<WireCheckRuns>) -> Self {
        CheckSummary::CheckRuns(
            pages
                .into_iter()
                .flat_map(|page| page.check_runs)
                .map(|run| CheckRun {
                    name: run.name,
                    status: run.status,
                    conclusion: run.conclusion,
                })
                .collect(),
        )
    }
}

impl From<Vec<WireCombinedStatus>> for CheckSummary {
    fn from(pages: Vec<WireCombinedStatus>) -> Self {
        CheckSummary::Statuses(
            pages
                .into_iter()
                .flat_map(|page| page.statuses)
                .map(|s| StatusItem {
                    context: s.context,
                    state: s.state,
                })
                .collect(),
        )
    }
}

#[derive(Deserialize)]
struct WireMergeResult {
    #[serde(default)]
    merged: bool,
    #[serde(default)]
    message: String,
}

#[derive(Serialize)]
struct MergeRequest<'a> {
    merge_method: &'a str,
    sha: &'a str,
}

#[derive(Serialize)]
struct MergeBranchesRequest<'a> {
    base: &'a str,
    head: &'a str,
    commit_message: String,
}

#[derive(Serialize)]
struct UpdateBranchRequest<'a> {
    expected_head_sha: &'a str,
}

#[derive(Serialize)]
struct CommentRequest<'a> {
    body: &'a str,
}

/// REST client for one repository.
pub struct RepoClient {
    name: String,
    transport: Transport,
}

impl RepoClient {
    pub fn new(base: Url, token: &str, timeout: Duration) -> Result<Self, ApiError> {
        let name = repo_name(&base);
        let transport = Transport::new(base, token, timeout)?;
        Ok(Self { name, transport })
    }
}

impl std::fmt::Debug for RepoClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepoClient")
            .field("name", &self.name)
            .field("base", &self.transport.base().as_str())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl RepoApi for RepoClient {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip(self), fields(repo = %self.name))]
    async fn list_open_pulls(&self) -> Result<Vec<PullRequest>, ApiError> {
        let pages: Vec<Vec<WirePull>> = self
            .transport
            .get_pages(&["pulls"], &[("state", "open")])
            .await?;
        let pulls = pulls_from_pages(pages);
        debug!(count = pulls.len(), "listed open pull requests");
        Ok(pulls)
    }

    #[instrument(skip(self), fields(repo = %self.name))]
    async fn merge_status(&self, number: u64) -> Result<MergeStatus, ApiError> {
        let number = number.to_string();
        let pull: WirePull = self.transport.get(&["pulls", number.as_str()], &[]).await?;
        Ok(MergeStatus::from(&pull))
    }

    #[instrument(skip(self), fields(repo = %self.name))]
    async fn branch_protection(&self, branch: &str) -> Result<BranchProtection, ApiError> {
        let wire: WireBranch = self
            .transport
            .get(&branch_segments(&["branches"], branch), &[])
            .await?;
        if !wire.protected {
            return Ok(BranchProtection::default());
        }

        let mut segments = branch_segments(&["branches"], branch);
        segments.extend(["protection", "required_status_checks", "contexts"]);
        let required_contexts: Vec<String> = self.transport.get(&segments, &[]).await?;
        debug!(required = required_contexts.len(), "fetched required contexts");

        Ok(BranchProtection {
            protected: true,
            required_contexts,
        })
    }

    #[instrument(skip(self), fields(repo = %self.name))]
    async fn check_runs(&self, sha: &str) -> Result<CheckSummary, ApiError> {
        let pages: Vec<WireCheckRuns> = self
            .transport
            .get_pages(&["commits", sha, "check-runs"], &[])
            .await?;
        Ok(pages.into())
    }

    #[instrument(skip(self), fields(repo = %self.name))]
    async fn statuses(&self, sha: &str) -> Result<CheckSummary, ApiError> {
        let pages: Vec<WireCombinedStatus> = self
            .transport
            .get_pages(&["commits", sha, "status"], &[])
            .await?;
        Ok(pages.into())
    }

    #[instrument(skip(self, pr), fields(repo = %self.name, pr = pr.number))]
    async fn merge(&self, pr: &PullRequest, method: MergeMethod) -> Result<(), ApiError> {
        let number = pr.number.to_string();
        let request = MergeRequest {
            merge_method: method.as_str(),
            sha: &pr.head_sha,
        };
        let body = self
            .transport
            .send(Method::PUT, &["pulls", number.as_str(), "merge"], &request)
            .await?;
        let url = self.transport.url(&["pulls", number.as_str(), "merge"])?;
        let result: WireMergeResult = Transport::decode(&url, &body)?;
        if !result.merged {
            return Err(ApiError::MergeRejected {
                number: pr.number,
                message: result.message,
            });
        }
        Ok(())
    }

    #[instrument(skip(self, pr), fields(repo = %self.name, pr = pr.number))]
    async fn update_branch(&self, pr: &PullRequest) -> Result<(), ApiError> {
        if pr.is_cross_repository {
            let number = pr.number.to_string();
            let request = UpdateBranchRequest {
                expected_head_sha: &pr.head_sha,
            };
            self.transport
                .send(Method::PUT, &["pulls", number.as_str(), "update-branch"], &request)
                .await?;
        } else {
            let request = MergeBranchesRequest {
                base: &pr.head_ref,
                head: &pr.base_ref,
                commit_message: format!("Merge branch '{}' into {}", pr.base_ref, pr.head_ref),
            };
            self.transport
                .send(Method::POST, &["merges"], &request)
                .await?;
        }
        Ok(())
    }

    #[instrument(skip(self), fields(repo = %self.name))]
    async fn delete_branch(&self, branch: &str) -> Result<(), ApiError> {
        self.transport
            .delete(&branch_segments(&["git", "refs", "heads"], branch))
            .await
    }

    #[instrument(skip(self), fields(repo = %self.name))]
    async fn issue_labels(&self, number: u64) -> Result<Vec<Label>, ApiError> {
        let number = number.to_string();
        let pages: Vec<Vec<WireLabel>> = self
            .transport
            .get_pages(&["issues", number.as_str(), "labels"], &[])
            .await?;
        Ok(pages
            .into_iter()
            .flatten()
            .map(|l| Label { name: l.name })
            .collect())
    }

    #[instrument(skip(self), fields(repo = %self.name))]
    async fn remove_label(&self, number: u64, label: &str) -> Result<(), ApiError> {
        let number = number.to_string();
        self.transport
            .delete(&["issues", number.as_str(), "labels", label])
            .await
    }

    #[instrument(skip(self, body), fields(repo = %self.name))]
    async fn post_comment(&self, number: u64, body: &str) -> Result<(), ApiError> {
        let number = number.to_string();
        self.transport
            .send(
                Method::POST,
                &["issues", number.as_str(), "comments"],
                &CommentRequest { body },
            )
            .await
            .map(|_| ())
    }
}
