//! Error taxonomy for the patch run.
//!
//! Store and codec failures are typed so the orchestrator can tag them with
//! the stage they happened in, and the CLI can report a [`FailureKind`] that
//! tells "never reached the store" apart from "store rejected the write".

use std::fmt;

use thiserror::Error;

use crate::forge::RevisionToken;

// ---------------------------------------------------------------------------
// Store errors
// ---------------------------------------------------------------------------

/// Failures reported by a [`crate::forge::FileStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// The request never produced a response (connect failure, timeout, ...).
    #[error("{action} request failed: {source}")]
    Request {
        action: &'static str,
        #[source]
        source: reqwest::Error,
    },

    /// Non-success HTTP status without a provider error payload.
    #[error("{action} returned HTTP {status}: {body}")]
    Status {
        action: &'static str,
        status: reqwest::StatusCode,
        body: String,
    },

    /// The response envelope carried a provider-level error object.
    #[error("{action} failed with provider error {code}: {message}")]
    Provider {
        action: &'static str,
        code: String,
        message: String,
    },

    /// The response could not be decoded into the expected shape.
    #[error("{action} returned an unexpected response: {reason}")]
    InvalidResponse { action: &'static str, reason: String },

    #[error("{action}: {what} not found")]
    NotFound { action: &'static str, what: String },

    #[error("ref {git_ref:?} has no commits")]
    NoCommits { git_ref: String },

    /// The ref advanced past the base revision the commit was conditioned on.
    #[error("{action} rejected as a conflict ({code}): {message}")]
    Conflict {
        action: &'static str,
        code: String,
        message: String,
    },
}

impl StoreError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Request { .. } | Self::Status { .. } => FailureKind::Transport,
            Self::Provider { .. } | Self::InvalidResponse { .. } => FailureKind::Provider,
            Self::NotFound { .. } => FailureKind::NotFound,
            Self::NoCommits { .. } => FailureKind::NoCommits,
            Self::Conflict { .. } => FailureKind::Conflict,
        }
    }
}

// ---------------------------------------------------------------------------
// Codec errors
// ---------------------------------------------------------------------------

/// Failures turning a remote file into a JSON document and back.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("unsupported content encoding {0:?}")]
    UnsupportedEncoding(String),

    #[error("malformed base64 content: {0}")]
    MalformedEncoding(#[from] base64::DecodeError),

    #[error("content digest mismatch: expected sha256 {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("malformed JSON document: {0}")]
    MalformedJson(String),
}

// ---------------------------------------------------------------------------
// Orchestrator errors
// ---------------------------------------------------------------------------

/// Caller-visible classification of a failed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Transport,
    Provider,
    NotFound,
    NoCommits,
    Format,
    Conflict,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Transport => "transport",
            Self::Provider => "provider",
            Self::NotFound => "not-found",
            Self::NoCommits => "no-commits",
            Self::Format => "format",
            Self::Conflict => "conflict",
        })
    }
}

/// Orchestrator stage a failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Reading,
    Decoding,
    ResolvingRevision,
    Committing,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Reading => "reading",
            Self::Decoding => "decoding",
            Self::ResolvingRevision => "resolving revision",
            Self::Committing => "committing",
        })
    }
}

#[derive(Debug, Error)]
pub enum Cause {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The ref moved between reading the file and resolving the base revision.
    #[error("ref advanced from {read} to {latest} after the file was read")]
    StaleRead {
        read: RevisionToken,
        latest: RevisionToken,
    },
}

/// A failed patch run: the stage it stopped in and why.
#[derive(Debug, Error)]
#[error("{stage}: {source}")]
pub struct PatchError {
    pub stage: Stage,
    pub source: Cause,
}

impl PatchError {
    pub fn new(stage: Stage, source: impl Into<Cause>) -> Self {
        Self {
            stage,
            source: source.into(),
        }
    }

    pub fn kind(&self) -> FailureKind {
        match &self.source {
            Cause::Store(e) => e.kind(),
            Cause::Codec(_) => FailureKind::Format,
            Cause::StaleRead { .. } => FailureKind::Conflict,
        }
    }
}
