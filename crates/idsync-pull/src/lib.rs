//! # Inbound Pull Engine
//!
//! Pulls identities and groups from an external source into internal
//! entity storage.
//!
//! A [`PullPipeline`](pipeline::PullPipeline) fetches deltas from the
//! profile's [`DeltaSource`](idsync_connector::traits::DeltaSource) and runs
//! each one through a fixed sequence of stages:
//!
//! 1. **Match** the record to internal entities (link first, then
//!    correlation rules).
//! 2. **Classify** it as create, update, delete or nothing.
//! 3. Run **before hooks**, which may edit the change request or veto it.
//! 4. **Mutate** the entity store.
//! 5. Run **after hooks**, such as
//!    [`MembershipReconciler`](membership::MembershipReconciler).
//! 6. **Report** the outcome to the run report.
//!
//! Deltas are processed concurrently up to
//! [`PullConfig::concurrency`](config::PullConfig::concurrency). Deltas
//! touching the same source object or entity are serialized through the
//! run's lock table.
//!
//! ## Crate Organization
//!
//! - [`config`] - Run settings and the pull policy
//! - [`entity`] - Internal entity model and change requests
//! - [`store`] - `EntityStore` and `LinkStore` persistence traits
//! - [`mapping`] - Inbound attribute mapping
//! - [`matching`] - Correlation rules and the inbound matcher
//! - [`delta`] - Deltas, operations and classification
//! - [`hooks`] - The `PullHook` extension point
//! - [`membership`] - Group membership reconciliation hook
//! - [`locks`] - Per-object lock table
//! - [`context`] - Per-run state
//! - [`report`] - Provisioning reports
//! - [`profile`] - Pull profile and its builder
//! - [`pipeline`] - The pull pipeline

pub mod config;
pub mod context;
pub mod delta;
pub mod entity;
pub mod error;
pub mod hooks;
pub mod locks;
pub mod mapping;
pub mod matching;
pub mod membership;
pub mod pipeline;
pub mod profile;
pub mod report;
pub mod store;

/// Prelude module for convenient imports.
///
/// ```
/// use idsync_pull::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::{
        DeletionRule, MatchingRule, PolicyAction, PullConfig, PullPolicy, UnmatchingRule,
    };
    pub use crate::context::RunContext;
    pub use crate::delta::{classify, Delta, Operation, PipelineStage};
    pub use crate::entity::{
        ChangeRequest, EntityKey, EntityType, InternalEntity, MembershipPatch,
    };
    pub use crate::error::{ErrorKind, PullError, PullResult};
    pub use crate::hooks::{HookError, HookResult, PullHook};
    pub use crate::mapping::{AttributeMapping, InboundMapper};
    pub use crate::matching::{
        CorrelationMatchType, CorrelationRule, InboundMatcher, MatchKind, MatchResult, PullMatch,
    };
    pub use crate::membership::MembershipReconciler;
    pub use crate::pipeline::PullPipeline;
    pub use crate::profile::{Provision, PullProfile, PullProfileBuilder};
    pub use crate::report::{
        DeltaReport, OutcomeStatus, ProvisioningReport, RunReport, RunStatus, RunSummary,
    };
    pub use crate::store::{
        AttributeQuery, EntityStore, ExternalLink, LinkStore, StoreError, StoreResult,
    };
}

// Re-export async_trait for hook and store implementors
pub use async_trait::async_trait;
