//! Deltas and their classification into operations.

use serde::{Deserialize, Serialize};
use std::fmt;

use idsync_connector::operation::{ExternalRecord, Uid};
use idsync_connector::traits::SyncDelta;
use idsync_connector::types::DeltaHint;

use crate::entity::EntityType;
use crate::error::{PullError, PullResult};
use crate::matching::{MatchResult, PullMatch};

/// Mutation required by a delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Update,
    Delete,
    /// Absent in the source; the link is dropped and the entity kept.
    Unlink,
    /// Nothing to do: absent in the source and unknown internally.
    None,
}

impl Operation {
    /// Operation implied by the connector hint and whether anything matched.
    #[must_use]
    pub fn for_hint(hint: DeltaHint, matched: bool) -> Self {
        match (hint, matched) {
            (DeltaHint::Present, false) => Operation::Create,
            (DeltaHint::Present, true) => Operation::Update,
            (DeltaHint::Absent, false) => Operation::None,
            (DeltaHint::Absent, true) => Operation::Delete,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::Unlink => "unlink",
            Operation::None => "none",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Stage a delta reached in the mutation pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Matched,
    BeforeHooks,
    Mutated,
    AfterHooks,
    Reported,
}

impl PipelineStage {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Matched => "matched",
            PipelineStage::BeforeHooks => "before_hooks",
            PipelineStage::Mutated => "mutated",
            PipelineStage::AfterHooks => "after_hooks",
            PipelineStage::Reported => "reported",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One record from the source, tagged with the entity type it provisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delta {
    sequence: u64,
    entity_type: EntityType,
    record: ExternalRecord,
    hint: DeltaHint,
    operation: Option<Operation>,
}

impl Delta {
    pub fn new(sequence: u64, entity_type: EntityType, delta: SyncDelta) -> Self {
        Self {
            sequence,
            entity_type,
            record: delta.record,
            hint: delta.hint,
            operation: None,
        }
    }

    /// Dispatch order within the run.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    #[must_use]
    pub fn entity_type(&self) -> &EntityType {
        &self.entity_type
    }

    #[must_use]
    pub fn record(&self) -> &ExternalRecord {
        &self.record
    }

    #[must_use]
    pub fn uid(&self) -> &Uid {
        self.record.uid()
    }

    #[must_use]
    pub fn hint(&self) -> DeltaHint {
        self.hint
    }

    /// The classified operation, once computed.
    #[must_use]
    pub fn operation(&self) -> Option<Operation> {
        self.operation
    }

    pub(crate) fn set_operation(&mut self, operation: Operation) {
        self.operation = Some(operation);
    }
}

/// Classified operation and the entity it targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub operation: Operation,
    pub target: Option<PullMatch>,
}

/// Decide the operation for a delta given its match result.
///
/// More than one candidate at the strongest rank on UPDATE or DELETE is an
/// [`PullError::AmbiguousMatch`].
pub fn classify(delta: &Delta, matches: &MatchResult) -> PullResult<Classification> {
    let best = matches.best();
    let operation = Operation::for_hint(delta.hint(), !best.is_empty());

    match best {
        [] => Ok(Classification {
            operation,
            target: None,
        }),
        [only] => Ok(Classification {
            operation,
            target: Some(only.clone()),
        }),
        tied => Err(PullError::ambiguous(
            delta.uid().value(),
            tied.len(),
            tied[0].kind,
        )),
    }
}
