//! Pull hooks
//!
//! Extension points around the generic mutation step. Hooks run in the order
//! they are configured on the profile. `before` runs before any write and may
//! adjust or veto the change request; `after` runs once the entity has been
//! written and may write related entities, chaining entries under the
//! delta's report.

use async_trait::async_trait;
use thiserror::Error;

use crate::context::RunContext;
use crate::delta::Delta;
use crate::entity::{ChangeRequest, EntityKey, InternalEntity};
use crate::profile::PullProfile;
use crate::report::DeltaReport;
use crate::store::StoreError;

/// Hook execution errors.
#[derive(Debug, Error)]
pub enum HookError {
    /// Hook execution failed.
    #[error("Hook '{hook}' failed: {message}")]
    Failed { hook: String, message: String },

    /// The hook refused the change. The delta is reported as ignored.
    #[error("Change vetoed by hook '{hook}': {reason}")]
    Vetoed { hook: String, reason: String },

    /// Relationship writes were rejected.
    #[error("Reconciliation of container {container} failed: {message}")]
    Reconciliation { container: EntityKey, message: String },

    /// A read through the persistence layer failed.
    #[error("Store error in hook: {0}")]
    Store(#[from] StoreError),
}

impl HookError {
    pub fn failed(hook: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            hook: hook.into(),
            message: message.into(),
        }
    }

    pub fn vetoed(hook: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Vetoed {
            hook: hook.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for hook operations.
pub type HookResult<T> = Result<T, HookError>;

/// Hook invoked by the mutation pipeline.
#[async_trait]
pub trait PullHook: Send + Sync {
    /// Name used in logs and report messages.
    fn name(&self) -> &str;

    /// Called before the mutation. `entity` is the matched entity, None on
    /// create.
    async fn before(
        &self,
        _profile: &PullProfile,
        _run: &RunContext,
        _delta: &Delta,
        _entity: Option<&InternalEntity>,
        _request: &mut ChangeRequest,
    ) -> HookResult<()> {
        Ok(())
    }

    /// Called after the mutation. `entity` is the written entity, None once
    /// deleted.
    async fn after(
        &self,
        _profile: &PullProfile,
        _run: &RunContext,
        _delta: &Delta,
        _entity: Option<&InternalEntity>,
        _report: &mut DeltaReport,
    ) -> HookResult<()> {
        Ok(())
    }

    /// Called once after the last delta of the run has been reported.
    async fn after_all(&self, _profile: &PullProfile, _run: &RunContext) -> HookResult<()> {
        Ok(())
    }
}
