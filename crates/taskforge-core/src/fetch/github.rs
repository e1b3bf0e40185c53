//! GitHub REST implementation of the change fetcher.

use std::sync::LazyLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{ChangeFetcher, ChangeRecord, FetchError, LinkedIssue, MAX_REPO_LEN};

/// Default API root.
const DEFAULT_API_BASE: &str = "https://api.github.com";

/// Files per page when listing a change's files.
const FILES_PER_PAGE: usize = 100;

/// Upper bound on file-list pages fetched (3000 files).
/// Changes larger than this are rejected rather than truncated.
const MAX_FILE_PAGES: usize = 30;

/// Request timeout for each API call.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Issue references in a change body, in priority order.
static ISSUE_REFS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"[Ff]ixes #(\d+)",
        r"[Cc]loses #(\d+)",
        r"[Rr]esolves #(\d+)",
        r"#(\d+)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("issue reference regex is valid"))
    .collect()
});

#[derive(Debug, Deserialize)]
struct PullResponse {
    title: String,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    merged: bool,
    #[serde(default)]
    created_at: Option<String>,
    base: RefObject,
    head: RefObject,
}

#[derive(Debug, Deserialize)]
struct RefObject {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct FileResponse {
    filename: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    patch: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IssueResponse {
    number: u64,
    title: String,
    #[serde(default)]
    body: Option<String>,
}

/// Fetches change metadata from the GitHub REST API.
#[derive(Debug, Clone)]
pub struct GitHubFetcher {
    api_base: String,
    token: Option<String>,
    agent: ureq::Agent,
}

impl GitHubFetcher {
    /// Fetcher with an explicit token (or `None` for anonymous access).
    #[must_use]
    pub fn new(token: Option<String>) -> Self {
        Self::with_api_base(DEFAULT_API_BASE, token)
    }

    /// Fetcher reading the token from `GITHUB_TOKEN`.
    ///
    /// Anonymous access works but is heavily rate-limited.
    #[must_use]
    pub fn from_env() -> Self {
        let token = std::env::var("GITHUB_TOKEN").ok().filter(|t| !t.is_empty());
        if token.is_none() {
            warn!("GITHUB_TOKEN not set; API rate limits will be restrictive");
        }
        Self::new(token)
    }

    /// Fetcher against a non-default API root (test servers).
    #[must_use]
    pub fn with_api_base(api_base: &str, token: Option<String>) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(REQUEST_TIMEOUT)
            .build();
        Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            token,
            agent,
        }
    }

    fn get_json<T: serde::de::DeserializeOwned>(&self, endpoint: &str) -> Result<T, FetchError> {
        let url = format!("{}{endpoint}", self.api_base);
        let mut request = self
            .agent
            .get(&url)
            .set("Accept", "application/vnd.github+json")
            .set("User-Agent", "taskforge");
        if let Some(token) = &self.token {
            request = request.set("Authorization", &format!("Bearer {token}"));
        }

        let response = request.call().map_err(|e| match e {
            ureq::Error::Status(status, _) => FetchError::Status {
                status,
                endpoint: endpoint.to_string(),
            },
            ureq::Error::Transport(t) => FetchError::Transport(t.to_string()),
        })?;

        response
            .into_json::<T>()
            .map_err(|e| FetchError::Decode(e.to_string()))
    }

    fn fetch_files(&self, repo: &str, number: u64) -> Result<Vec<FileResponse>, FetchError> {
        let mut files = Vec::new();
        for page in 1..=MAX_FILE_PAGES {
            let endpoint =
                format!("/repos/{repo}/pulls/{number}/files?per_page={FILES_PER_PAGE}&page={page}");
            let batch: Vec<FileResponse> = self.get_json(&endpoint)?;
            let batch_len = batch.len();
            files.extend(batch);
            if batch_len < FILES_PER_PAGE {
                return Ok(files);
            }
        }
        Err(FetchError::InvalidRequest(format!(
            "change {repo}#{number} touches more than {} files",
            MAX_FILE_PAGES * FILES_PER_PAGE
        )))
    }

    fn fetch_linked_issue(&self, repo: &str, body: &str) -> Option<LinkedIssue> {
        for pattern in ISSUE_REFS.iter() {
            let Some(caps) = pattern.captures(body) else {
                continue;
            };
            let Ok(number) = caps[1].parse::<u64>() else {
                continue;
            };
            match self.get_json::<IssueResponse>(&format!("/repos/{repo}/issues/{number}")) {
                Ok(issue) => {
                    return Some(LinkedIssue {
                        number: issue.number,
                        title: issue.title,
                        body: issue.body.unwrap_or_default(),
                    });
                }
                Err(e) => {
                    debug!(%repo, number, "linked issue lookup failed: {e}");
                }
            }
        }
        None
    }
}

impl ChangeFetcher for GitHubFetcher {
    fn fetch_change(&self, repo: &str, number: u64) -> Result<ChangeRecord, FetchError> {
        validate_repo(repo)?;
        debug!(%repo, number, "fetching change metadata");

        let pull: PullResponse = self
            .get_json(&format!("/repos/{repo}/pulls/{number}"))
            .map_err(|e| match e {
                FetchError::Status { status: 404, .. } => FetchError::NotFound {
                    repo: repo.to_string(),
                    number,
                },
                other => other,
            })?;

        let files = self.fetch_files(repo, number)?;
        let changed_files: Vec<String> = files.iter().map(|f| f.filename.clone()).collect();
        let diff = assemble_diff(&files);

        let body = pull.body.unwrap_or_default();
        let issue = if body.is_empty() {
            None
        } else {
            self.fetch_linked_issue(repo, &body)
        };

        let created_at = pull
            .created_at
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        Ok(ChangeRecord {
            repo: repo.to_string(),
            number,
            title: pull.title,
            body,
            base_commit: pull.base.sha,
            head_commit: pull.head.sha,
            changed_files,
            diff,
            merged: pull.merged,
            created_at,
            issue,
        })
    }
}

/// Assemble a `git apply`-compatible unified diff from per-file
/// patches, adding the `---`/`+++` headers the API omits.
fn assemble_diff(files: &[FileResponse]) -> String {
    let mut parts: Vec<String> = Vec::new();
    for file in files {
        let Some(patch) = &file.patch else {
            // Binary files carry no text patch; skip them.
            continue;
        };
        parts.push(format!("diff --git a/{0} b/{0}", file.filename));
        match file.status.as_str() {
            "added" => {
                parts.push("--- /dev/null".to_string());
                parts.push(format!("+++ b/{}", file.filename));
            }
            "removed" => {
                parts.push(format!("--- a/{}", file.filename));
                parts.push("+++ /dev/null".to_string());
            }
            _ => {
                parts.push(format!("--- a/{}", file.filename));
                parts.push(format!("+++ b/{}", file.filename));
            }
        }
        parts.push(patch.clone());
    }
    let mut diff = parts.join("\n");
    if !diff.is_empty() && !diff.ends_with('\n') {
        diff.push('\n');
    }
    diff
}

fn validate_repo(repo: &str) -> Result<(), FetchError> {
    if repo.len() > MAX_REPO_LEN
        || repo.split('/').count() != 2
        || repo.split('/').any(str::is_empty)
    {
        return Err(FetchError::InvalidRequest(format!(
            "repository must be 'owner/repo', got {repo:?}"
        )));
    }
    Ok(())
}
