//! Pull error types.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use idsync_connector::error::ConnectorError;

use crate::entity::EntityKey;
use crate::hooks::HookError;
use crate::matching::MatchKind;
use crate::store::StoreError;

/// Errors that can occur while pulling from an external resource.
#[derive(Debug, Error)]
pub enum PullError {
    /// More than one candidate at the best match rank.
    #[error("Ambiguous match for '{uid}': {candidates} candidates matched as {kind}")]
    AmbiguousMatch {
        uid: String,
        candidates: usize,
        kind: MatchKind,
    },

    /// A before/after hook raised an error.
    #[error("Hook '{hook}' failed: {message}")]
    HookFailure { hook: String, message: String },

    /// The persistence layer rejected the attribute mutation.
    #[error("Mutation failed for '{uid}': {message}")]
    MutationFailure { uid: String, message: String },

    /// The source is unreachable or returned a malformed record.
    #[error("Connector failure: {0}")]
    ConnectorFailure(#[from] ConnectorError),

    /// A relationship write was rejected after the membership diff was computed.
    #[error("Reconciliation failed for container {container}: {message}")]
    ReconciliationFailure { container: EntityKey, message: String },

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Read failure while matching or reloading an entity.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The run was cancelled before this delta was dispatched.
    #[error("Run cancelled")]
    Cancelled,

    /// The report was already finalized.
    #[error("Run report is finalized, outcome for '{uid}' rejected")]
    ReportFinalized { uid: String },
}

impl PullError {
    /// Create an ambiguous match error.
    pub fn ambiguous(uid: impl Into<String>, candidates: usize, kind: MatchKind) -> Self {
        Self::AmbiguousMatch {
            uid: uid.into(),
            candidates,
            kind,
        }
    }

    /// Create a hook failure error.
    pub fn hook(hook: impl Into<String>, message: impl Into<String>) -> Self {
        Self::HookFailure {
            hook: hook.into(),
            message: message.into(),
        }
    }

    /// Create a mutation failure error.
    pub fn mutation(uid: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MutationFailure {
            uid: uid.into(),
            message: message.into(),
        }
    }

    /// Create a reconciliation failure error.
    pub fn reconciliation(container: EntityKey, message: impl Into<String>) -> Self {
        Self::ReconciliationFailure {
            container,
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Convert a hook error raised by `hook` into the matching pull error.
    pub fn from_hook(hook: &str, error: HookError) -> Self {
        match error {
            HookError::Reconciliation { container, message } => {
                Self::reconciliation(container, message)
            }
            other => Self::hook(hook, other.to_string()),
        }
    }

    /// The kind recorded in the run report.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            PullError::AmbiguousMatch { .. } => ErrorKind::AmbiguousMatch,
            PullError::HookFailure { .. } => ErrorKind::HookFailure,
            PullError::MutationFailure { .. } | PullError::Store(_) => ErrorKind::MutationFailure,
            PullError::ConnectorFailure(_) => ErrorKind::ConnectorFailure,
            PullError::ReconciliationFailure { .. } => ErrorKind::ReconciliationFailure,
            PullError::Configuration { .. } | PullError::ReportFinalized { .. } => {
                ErrorKind::Configuration
            }
            PullError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Whether this error aborts the whole run rather than a single delta.
    ///
    /// Configuration errors surface when the profile is built; one raised
    /// while processing a delta fails that delta only.
    #[must_use]
    pub fn is_run_fatal(&self) -> bool {
        matches!(self, PullError::ConnectorFailure(_))
    }
}

/// Error classification carried by report entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    AmbiguousMatch,
    HookFailure,
    MutationFailure,
    ConnectorFailure,
    ReconciliationFailure,
    Configuration,
    Cancelled,
}

impl ErrorKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::AmbiguousMatch => "ambiguous_match",
            ErrorKind::HookFailure => "hook_failure",
            ErrorKind::MutationFailure => "mutation_failure",
            ErrorKind::ConnectorFailure => "connector_failure",
            ErrorKind::ReconciliationFailure => "reconciliation_failure",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result type for pull operations.
pub type PullResult<T> = Result<T, PullError>;
