//! Read-modify-write driver.
//!
//! Runs one patch against a [`FileStore`]:
//!
//! 1. describe the file (`Reading`)
//! 2. decode and parse it (`Decoding`)
//! 3. stop if the key already holds the value
//! 4. resolve the ref's latest commit right before writing
//!    (`ResolvingRevision`), refusing to write if the read was pinned to an
//!    older commit
//! 5. commit the single changed file conditioned on that commit
//!    (`Committing`)
//!
//! There is no retry loop.  A conflict is reported to the caller, who can
//! re-run the whole patch.

use tracing::{debug, info, instrument};

use crate::codec;
use crate::error::{Cause, PatchError, Stage};
use crate::forge::{FileChange, FileStore, FileTarget, RevisionToken};
use crate::patch::{self, PatchRequest};

/// Whether a run may write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Commit,
    /// Stop once the new content is known; no revision lookup, no commit.
    DryRun,
}

/// Terminal success states of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchOutcome {
    /// The key already held the value; nothing was written.
    Unchanged { path: String },
    /// A new commit was created.
    Committed {
        path: String,
        revision: RevisionToken,
    },
    /// Dry run: the content that would have been committed.
    WouldCommit { path: String, content: String },
}

/// Commit message used for every patch of `path`.
pub fn commit_message(path: &str) -> String {
    format!("update {path}")
}

/// Run one patch of `target` against `store`.
#[instrument(
    skip(store, target, request),
    fields(repo = %target.repo, path = %target.path, git_ref = %target.git_ref, key = %request.key)
)]
pub async fn run_patch(
    store: &dyn FileStore,
    target: &FileTarget,
    request: &PatchRequest,
    mode: Mode,
) -> Result<PatchOutcome, PatchError> {
    // ---- Reading ----
    let file = store
        .describe_file(target)
        .await
        .map_err(|e| PatchError::new(Stage::Reading, e))?;
    info!(
        path = %file.path,
        sha = file.sha.as_deref().unwrap_or(""),
        "file fetched"
    );

    // ---- Decoding ----
    let bytes = codec::decode(&file).map_err(|e| PatchError::new(Stage::Decoding, e))?;
    let doc = codec::parse_document(&bytes).map_err(|e| PatchError::new(Stage::Decoding, e))?;

    // ---- Deciding ----
    if !patch::needs_update(&doc, request) {
        info!(key = %request.key, "key already set to value");
        return Ok(PatchOutcome::Unchanged { path: file.path });
    }

    let doc = patch::apply(doc, request);
    let content = codec::serialize_document(&doc);

    if mode == Mode::DryRun {
        info!(key = %request.key, "dry run, skipping commit");
        return Ok(PatchOutcome::WouldCommit {
            path: file.path,
            content,
        });
    }

    // ---- ResolvingRevision ----
    let base = store
        .latest_revision(&target.repo, &target.git_ref)
        .await
        .map_err(|e| PatchError::new(Stage::ResolvingRevision, e))?;

    if let Some(read) = &file.revision {
        if *read != base {
            return Err(PatchError::new(
                Stage::ResolvingRevision,
                Cause::StaleRead {
                    read: read.clone(),
                    latest: base,
                },
            ));
        }
    }
    debug!(%base, "base revision resolved");

    // ---- Committing ----
    let message = commit_message(&file.path);
    let change = FileChange {
        path: file.path.clone(),
        content,
    };
    let revision = store
        .commit_files(&target.repo, &target.git_ref, &base, &message, &[change])
        .await
        .map_err(|e| PatchError::new(Stage::Committing, e))?;

    info!(path = %file.path, %revision, "file committed");
    Ok(PatchOutcome::Committed {
        path: file.path,
        revision,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
