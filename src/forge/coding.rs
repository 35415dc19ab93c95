//! CODING open API backend.
//!
//! Every action is a `POST {api_url}/{Action}?Action={Action}` with a JSON
//! body and HTTP basic auth.  Responses are either flat or wrapped in a
//! `Response` object, and may carry an `Error` object even when the HTTP
//! status is a success, so the envelope is inspected before the status.

use reqwest::header::ACCEPT;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::config::Credentials;
use crate::error::StoreError;

use super::{FileChange, FileStore, FileTarget, RemoteFile, RevisionToken};

const DESCRIBE_GIT_FILE: &str = "DescribeGitFile";
const DESCRIBE_GIT_COMMIT_INFOS: &str = "DescribeGitCommitInfos";
const MODIFY_GIT_FILES: &str = "ModifyGitFiles";

/// Upper bound on response text quoted in diagnostics.
const MAX_BODY_IN_ERROR: usize = 512;

/// Fragments of a provider error code/message that mark a stale base commit.
/// Matched against the lowercased text only; a bare mention of the
/// `LastCommitSha` parameter is not enough.
const CONFLICT_MARKERS: &[&str] = &["conflict", "not the latest", "not latest"];

const NOT_FOUND_MARKERS: &[&str] = &["notfound", "not found", "notexist", "not exist"];

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeGitFileRequest<'a> {
    depot_path: &'a str,
    #[serde(rename = "Ref")]
    git_ref: &'a str,
    path: &'a str,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct GitFile {
    file_path: Option<String>,
    size: Option<u64>,
    #[serde(alias = "ContentEncoding")]
    encoding: Option<String>,
    content: Option<String>,
    content_sha256: Option<String>,
    sha: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeGitFileResponse {
    #[serde(default)]
    git_file: Option<GitFile>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeGitCommitInfosRequest<'a> {
    depot_path: &'a str,
    #[serde(rename = "Ref")]
    git_ref: &'a str,
    page_number: u32,
    page_size: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GitCommit {
    #[serde(default)]
    sha: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeGitCommitInfosResponse {
    #[serde(default)]
    commits: Option<Vec<GitCommit>>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct ModifyGitFile<'a> {
    path: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct ModifyGitFilesRequest<'a> {
    depot_path: &'a str,
    #[serde(rename = "Ref")]
    git_ref: &'a str,
    last_commit_sha: &'a str,
    message: &'a str,
    git_files: &'a [ModifyGitFile<'a>],
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ModifyGitFilesResponse {
    #[serde(default)]
    git_commit: Option<GitCommit>,
}

// ---------------------------------------------------------------------------
// Store struct
// ---------------------------------------------------------------------------

pub struct CodingStore {
    http_client: reqwest::Client,
    api_url: String,
    credentials: Credentials,
}

impl CodingStore {
    pub fn new(http_client: reqwest::Client, api_url: &str, credentials: Credentials) -> Self {
        Self {
            http_client,
            api_url: api_url.trim_end_matches('/').to_string(),
            credentials,
        }
    }

    /// Invoke `action` and decode its payload.  `subject` names what the
    /// action addresses and is used for not-found diagnostics.
    async fn call<B, R>(&self, action: &'static str, subject: &str, body: &B) -> Result<R, StoreError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = format!("{}/{action}", self.api_url);

        let resp = self
            .http_client
            .post(&url)
            .query(&[("Action", action)])
            .basic_auth(&self.credentials.username, Some(&self.credentials.password))
            .header(ACCEPT, "application/json")
            .json(body)
            .send()
            .await
            .map_err(|source| StoreError::Request { action, source })?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|source| StoreError::Request { action, source })?;

        let payload = serde_json::from_str::<Value>(&text).ok().map(unwrap_envelope);

        if let Some(payload) = &payload {
            if let Some(request_id) = payload.get("RequestId").and_then(Value::as_str) {
                debug!(action, request_id, %status, "provider response received");
            }
            if let Some((code, message)) = provider_fault(payload) {
                warn!(action, %status, %code, %message, "provider reported an error");
                return Err(classify_fault(action, subject, status, code, message));
            }
        }

        if !status.is_success() {
            warn!(action, %status, "provider API returned non-success status");
            return Err(match status {
                StatusCode::NOT_FOUND => StoreError::NotFound {
                    action,
                    what: subject.to_string(),
                },
                StatusCode::CONFLICT => StoreError::Conflict {
                    action,
                    code: status.as_str().to_string(),
                    message: truncate_body(&text),
                },
                _ => StoreError::Status {
                    action,
                    status,
                    body: truncate_body(&text),
                },
            });
        }

        let payload = payload.ok_or_else(|| StoreError::InvalidResponse {
            action,
            reason: format!("response body is not JSON: {}", truncate_body(&text)),
        })?;

        serde_json::from_value(payload).map_err(|e| StoreError::InvalidResponse {
            action,
            reason: e.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Trait implementation
// ---------------------------------------------------------------------------

#[async_trait::async_trait]
impl FileStore for CodingStore {
    #[instrument(skip(self, target), fields(repo = %target.repo, path = %target.path, git_ref = %target.git_ref))]
    async fn describe_file(&self, target: &FileTarget) -> Result<RemoteFile, StoreError> {
        let subject = format!(
            "file {} at {} in {}",
            target.path, target.git_ref, target.repo
        );

        let resp: DescribeGitFileResponse = self
            .call(
                DESCRIBE_GIT_FILE,
                &subject,
                &DescribeGitFileRequest {
                    depot_path: &target.repo,
                    git_ref: &target.git_ref,
                    path: &target.path,
                },
            )
            .await?;

        // An all-empty GitFile is how a missing path looks on some deployments.
        let file = resp
            .git_file
            .filter(|f| f.file_path.is_some() || f.content.is_some())
            .ok_or_else(|| StoreError::NotFound {
                action: DESCRIBE_GIT_FILE,
                what: subject,
            })?;

        let remote = RemoteFile {
            path: non_empty(file.file_path).unwrap_or_else(|| target.path.clone()),
            content: file.content.unwrap_or_default(),
            encoding: file.encoding.unwrap_or_default(),
            size: file.size.unwrap_or_default(),
            sha: non_empty(file.sha),
            content_sha256: non_empty(file.content_sha256),
            // The file's own LastCommitSha is the last commit touching this
            // path, not the ref tip, so it cannot stand in for a revision.
            revision: None,
        };

        debug!(
            path = %remote.path,
            sha = remote.sha.as_deref().unwrap_or(""),
            size = remote.size,
            encoding = %remote.encoding,
            "file described"
        );
        Ok(remote)
    }

    #[instrument(skip(self))]
    async fn latest_revision(
        &self,
        repo: &str,
        git_ref: &str,
    ) -> Result<RevisionToken, StoreError> {
        let subject = format!("ref {git_ref} in {repo}");

        let resp: DescribeGitCommitInfosResponse = self
            .call(
                DESCRIBE_GIT_COMMIT_INFOS,
                &subject,
                &DescribeGitCommitInfosRequest {
                    depot_path: repo,
                    git_ref,
                    page_number: 1,
                    page_size: 1,
                },
            )
            .await?;

        let latest = resp
            .commits
            .unwrap_or_default()
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::NoCommits {
                git_ref: git_ref.to_string(),
            })?;

        let sha = non_empty(latest.sha).ok_or_else(|| StoreError::InvalidResponse {
            action: DESCRIBE_GIT_COMMIT_INFOS,
            reason: "latest commit carries no Sha".to_string(),
        })?;

        debug!(%sha, "latest revision resolved");
        Ok(RevisionToken::new(sha))
    }

    #[instrument(skip(self, message, files), fields(base = %base, file_count = files.len()))]
    async fn commit_files(
        &self,
        repo: &str,
        git_ref: &str,
        base: &RevisionToken,
        message: &str,
        files: &[FileChange],
    ) -> Result<RevisionToken, StoreError> {
        let subject = format!("ref {git_ref} in {repo}");
        let git_files: Vec<ModifyGitFile<'_>> = files
            .iter()
            .map(|f| ModifyGitFile {
                path: &f.path,
                content: &f.content,
            })
            .collect();

        let resp: ModifyGitFilesResponse = self
            .call(
                MODIFY_GIT_FILES,
                &subject,
                &ModifyGitFilesRequest {
                    depot_path: repo,
                    git_ref,
                    last_commit_sha: base.as_str(),
                    message,
                    git_files: &git_files,
                },
            )
            .await?;

        // Without a commit sha the outcome is ambiguous; never assume success.
        let sha = resp
            .git_commit
            .and_then(|c| non_empty(c.sha))
            .ok_or_else(|| StoreError::InvalidResponse {
                action: MODIFY_GIT_FILES,
                reason: "response carries no GitCommit.Sha".to_string(),
            })?;

        debug!(%sha, "commit created");
        Ok(RevisionToken::new(sha))
    }
}

// ---------------------------------------------------------------------------
// Envelope helpers
// ---------------------------------------------------------------------------

/// Strip the optional `{"Response": {...}}` wrapper.
fn unwrap_envelope(value: Value) -> Value {
    match value {
        Value::Object(mut map) if map.get("Response").is_some_and(Value::is_object) => {
            map.remove("Response").unwrap_or(Value::Null)
        }
        other => other,
    }
}

/// Extract a non-empty `Error` payload as `(code, message)`.
///
/// Only `null`, `""`, `[]` and objects whose members are all blank count as
/// "no error". `Code`/`Message` may be strings or numbers. Any other non-empty
/// shape is still a fault and is quoted as the message.
fn provider_fault(payload: &Value) -> Option<(String, String)> {
    match payload.get("Error")? {
        Value::Null => None,
        Value::String(message) if message.is_empty() => None,
        Value::String(message) => Some((String::new(), message.clone())),
        Value::Array(items) if items.is_empty() => None,
        Value::Object(fields) => {
            let code = fields.get("Code").map(fault_text).unwrap_or_default();
            let message = fields.get("Message").map(fault_text).unwrap_or_default();
            if !code.is_empty() || !message.is_empty() {
                Some((code, message))
            } else if fields.values().all(|v| fault_text(v).is_empty()) {
                None
            } else {
                Some((String::new(), Value::Object(fields.clone()).to_string()))
            }
        }
        other => Some((String::new(), other.to_string())),
    }
}

fn fault_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn classify_fault(
    action: &'static str,
    subject: &str,
    status: StatusCode,
    code: String,
    message: String,
) -> StoreError {
    let haystack = format!("{code} {message}").to_ascii_lowercase();
    let matches = |markers: &[&str]| markers.iter().any(|m| haystack.contains(m));

    if action == MODIFY_GIT_FILES && (status == StatusCode::CONFLICT || matches(CONFLICT_MARKERS)) {
        StoreError::Conflict {
            action,
            code,
            message,
        }
    } else if status == StatusCode::NOT_FOUND || matches(NOT_FOUND_MARKERS) {
        StoreError::NotFound {
            action,
            what: format!("{subject} ({code}: {message})"),
        }
    } else {
        StoreError::Provider {
            action,
            code,
            message,
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}

fn truncate_body(body: &str) -> String {
    let body = body.trim();
    match body.char_indices().nth(MAX_BODY_IN_ERROR) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
