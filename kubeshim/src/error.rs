//! Error taxonomy for invocations, selectors and the apply loop.
//!
//! Absence of data is never an error (see [`crate::core::model`]). Everything
//! else fails fast with one of the variants below.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::core::kind::ParseRefError;
use crate::core::types::FailureKind;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A non-zero exit from the cluster tool, classified from stderr.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("`{command}` failed ({kind}, exit {status}): {}", .stderr.trim())]
pub struct RemoteFailure {
    pub kind: FailureKind,
    pub command: String,
    pub status: i32,
    pub stderr: String,
}

/// One resource's failure inside a bulk verb.
#[derive(Debug)]
pub struct ResourceFailure {
    pub name: String,
    pub error: Error,
}

/// Some resources in a bulk verb failed; the rest were changed and stay changed.
#[derive(Debug)]
pub struct BulkFailure {
    pub verb: String,
    pub succeeded: Vec<String>,
    pub failed: Vec<ResourceFailure>,
}

impl fmt::Display for BulkFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} failed for {} of {} resources",
            self.verb,
            self.failed.len(),
            self.failed.len() + self.succeeded.len()
        )?;
        for failure in &self.failed {
            write!(f, "\n  {}: {}", failure.name, failure.error)?;
        }
        Ok(())
    }
}

impl std::error::Error for BulkFailure {}

#[derive(Debug, Error)]
pub enum Error {
    /// The tool (or the ssh client) could not be started at all.
    #[error("failed to launch `{program}`")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The remote shell never reached the tool.
    #[error("transport to `{host}` failed: {message}")]
    Transport { host: String, message: String },

    #[error("`{command}` timed out after {after:?}")]
    Timeout { command: String, after: Duration },

    /// Captured output hit the configured limit; the kept prefix is unusable.
    #[error("`{command}` wrote more than {limit} bytes to {stream}")]
    OutputTruncated {
        command: String,
        stream: &'static str,
        limit: usize,
    },

    #[error(transparent)]
    Remote(#[from] RemoteFailure),

    #[error(transparent)]
    Bulk(#[from] BulkFailure),

    /// Every attempt of the apply loop hit a conflict.
    #[error("gave up after {attempts} attempts; last conflict: {last}")]
    RetriesExhausted { attempts: u32, last: RemoteFailure },

    #[error("failed to parse {what}")]
    Parse {
        what: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("selector `{selector}`: {message}")]
    Selection { selector: String, message: String },

    #[error(transparent)]
    InvalidRef(#[from] ParseRefError),

    /// Process plumbing failed after launch (pipes, waiting).
    #[error("{context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Error::Io {
            context: context.into(),
            source,
        }
    }

    /// Remote failure kind, if this error came from a classified non-zero exit.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Error::Remote(failure) => Some(failure.kind),
            Error::RetriesExhausted { .. } => Some(FailureKind::Conflict),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.failure_kind() == Some(FailureKind::NotFound)
    }

    /// A single conflict. Exhausted retries are reported separately.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Remote(failure) if failure.kind == FailureKind::Conflict)
    }

    pub fn is_retries_exhausted(&self) -> bool {
        matches!(self, Error::RetriesExhausted { .. })
    }
}
