//! Remote file store abstraction.
//!
//! Provides the [`FileStore`] trait that encapsulates all provider-specific API
//! interaction.  The orchestrator only ever talks to this trait, so no
//! provider URL construction or envelope parsing leaks outside this module.

pub mod coding;

use std::fmt;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::config::{Config, Credentials};
use crate::error::StoreError;

// ---------------------------------------------------------------------------
// Store types
// ---------------------------------------------------------------------------

/// Opaque identifier of a commit on a ref.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RevisionToken(String);

impl RevisionToken {
    pub fn new(sha: impl Into<String>) -> Self {
        Self(sha.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RevisionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The file a run operates on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTarget {
    /// Repository identifier (`team/project/repo` on CODING).
    pub repo: String,
    pub path: String,
    pub git_ref: String,
}

impl FileTarget {
    pub fn new(
        repo: impl Into<String>,
        path: impl Into<String>,
        git_ref: impl Into<String>,
    ) -> Self {
        Self {
            repo: repo.into(),
            path: path.into(),
            git_ref: git_ref.into(),
        }
    }
}

/// A file as described by the store.  Never mutated after the read.
#[derive(Debug, Clone)]
pub struct RemoteFile {
    /// Path as reported by the provider (falls back to the requested path).
    pub path: String,
    /// Transport-encoded content.
    pub content: String,
    pub encoding: String,
    pub size: u64,
    /// Blob digest reported by the provider.
    pub sha: Option<String>,
    /// Hex SHA-256 of the decoded content, when the provider reports one.
    pub content_sha256: Option<String>,
    /// Tip of the ref at read time, when the store can report it. A commit
    /// that merely last touched the file does not qualify.
    pub revision: Option<RevisionToken>,
}

/// One file replacement inside a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    pub path: String,
    /// Plain UTF-8 text; the store does not expect it re-encoded.
    pub content: String,
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Versioned remote file store with conditional multi-file commits.
#[async_trait::async_trait]
pub trait FileStore: Send + Sync {
    /// Fetch the file at `target`.
    async fn describe_file(&self, target: &FileTarget) -> Result<RemoteFile, StoreError>;

    /// Resolve the most recent commit on `git_ref`.
    async fn latest_revision(&self, repo: &str, git_ref: &str)
        -> Result<RevisionToken, StoreError>;

    /// Replace `files` in one commit on top of `base`.  The store rejects the
    /// commit if `git_ref` no longer points at `base`.
    async fn commit_files(
        &self,
        repo: &str,
        git_ref: &str,
        base: &RevisionToken,
        message: &str,
        files: &[FileChange],
    ) -> Result<RevisionToken, StoreError>;
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Build the HTTP-backed [`FileStore`] for the configured endpoint.
pub fn build_store(config: &Config, credentials: Credentials) -> Result<Box<dyn FileStore>> {
    let http_client = reqwest::Client::builder()
        .user_agent(config.api.user_agent.as_str())
        .timeout(Duration::from_secs(config.api.request_timeout_secs))
        .connect_timeout(Duration::from_secs(config.api.connect_timeout_secs))
        .build()
        .context("failed to build reqwest client")?;

    Ok(Box::new(coding::CodingStore::new(
        http_client,
        &config.api.api_url,
        credentials,
    )))
}
