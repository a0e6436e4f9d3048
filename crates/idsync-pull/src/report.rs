//! Per-entity outcomes and the run report they are aggregated into.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

use idsync_connector::ids::ResourceId;

use crate::delta::{Delta, Operation, PipelineStage};
use crate::entity::{EntityKey, EntityType};
use crate::error::{ErrorKind, PullError, PullResult};

/// Outcome of processing one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Success,
    Failure,
    Ignored,
}

impl OutcomeStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeStatus::Success => "success",
            OutcomeStatus::Failure => "failure",
            OutcomeStatus::Ignored => "ignored",
        }
    }
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One entry of the run report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningReport {
    pub id: Uuid,
    /// Dispatch order of the delta that produced this entry.
    pub sequence: u64,
    /// Entry this one is chained under, if any.
    pub parent: Option<Uuid>,
    pub uid: String,
    pub key: Option<EntityKey>,
    pub entity_type: EntityType,
    pub operation: Operation,
    pub status: OutcomeStatus,
    pub error_kind: Option<ErrorKind>,
    pub message: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl ProvisioningReport {
    fn new(
        sequence: u64,
        uid: impl Into<String>,
        entity_type: EntityType,
        operation: Operation,
        status: OutcomeStatus,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            sequence,
            parent: None,
            uid: uid.into(),
            key: None,
            entity_type,
            operation,
            status,
            error_kind: None,
            message: None,
            recorded_at: Utc::now(),
        }
    }

    /// A chained entry for a write made on a related entity.
    #[must_use]
    pub fn related(
        sequence: u64,
        key: EntityKey,
        entity_type: EntityType,
        operation: Operation,
    ) -> Self {
        let mut report = Self::new(
            sequence,
            key.to_string(),
            entity_type,
            operation,
            OutcomeStatus::Success,
        );
        report.key = Some(key);
        report
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Mark as failed with the given error.
    pub fn fail(&mut self, error: &PullError) {
        self.status = OutcomeStatus::Failure;
        self.error_kind = Some(error.kind());
        self.message = Some(error.to_string());
    }

    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.status == OutcomeStatus::Failure
    }
}

/// Outcome of one delta: the main entry plus entries chained under it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaReport {
    pub main: ProvisioningReport,
    pub related: Vec<ProvisioningReport>,
    /// Last stage reached.
    pub stage: PipelineStage,
}

impl DeltaReport {
    fn for_delta(delta: &Delta, status: OutcomeStatus, stage: PipelineStage) -> Self {
        let operation = delta.operation().unwrap_or(Operation::None);
        Self {
            main: ProvisioningReport::new(
                delta.sequence(),
                delta.uid().value(),
                delta.entity_type().clone(),
                operation,
                status,
            ),
            related: Vec::new(),
            stage,
        }
    }

    #[must_use]
    pub fn success(delta: &Delta, key: Option<EntityKey>, stage: PipelineStage) -> Self {
        let mut report = Self::for_delta(delta, OutcomeStatus::Success, stage);
        report.main.key = key;
        report
    }

    #[must_use]
    pub fn ignored(delta: &Delta, key: Option<EntityKey>, message: impl Into<String>) -> Self {
        let mut report = Self::for_delta(delta, OutcomeStatus::Ignored, PipelineStage::Matched);
        report.main.key = key;
        report.main.message = Some(message.into());
        report
    }

    #[must_use]
    pub fn failed(
        delta: &Delta,
        key: Option<EntityKey>,
        stage: PipelineStage,
        error: &PullError,
    ) -> Self {
        let mut report = Self::for_delta(delta, OutcomeStatus::Failure, stage);
        report.main.key = key;
        report.main.fail(error);
        report
    }

    /// Chain an entry under the main one.
    pub fn add_related(&mut self, mut entry: ProvisioningReport) {
        entry.parent = Some(self.main.id);
        entry.sequence = self.main.sequence;
        self.related.push(entry);
    }

    /// Mark the main entry failed. Chained entries keep their own status.
    pub fn fail(&mut self, stage: PipelineStage, error: &PullError) {
        self.stage = stage;
        self.main.fail(error);
    }

    #[must_use]
    pub fn status(&self) -> OutcomeStatus {
        self.main.status
    }

    /// Main entry followed by the chained ones.
    pub fn entries(&self) -> impl Iterator<Item = &ProvisioningReport> {
        std::iter::once(&self.main).chain(self.related.iter())
    }
}

/// Counters over report entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub ignored: usize,
}

impl RunSummary {
    /// Add an entry to the summary.
    pub fn add(&mut self, entry: &ProvisioningReport) {
        self.processed += 1;
        match entry.status {
            OutcomeStatus::Success => self.succeeded += 1,
            OutcomeStatus::Failure => self.failed += 1,
            OutcomeStatus::Ignored => self.ignored += 1,
        }
    }
}

/// Run-level status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every fetched delta was processed.
    Completed,
    /// A run-fatal error stopped dispatch.
    Failed,
    /// Cancelled before all deltas were dispatched.
    Cancelled,
}

impl RunStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Frozen result of a pull run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub resource: ResourceId,
    pub status: RunStatus,
    pub error: Option<String>,
    pub entries: Vec<ProvisioningReport>,
    pub summary: RunSummary,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    /// Top-level entries, one per delta.
    pub fn outcomes(&self) -> impl Iterator<Item = &ProvisioningReport> {
        self.entries.iter().filter(|e| e.parent.is_none())
    }

    /// Entries chained under the given entry.
    pub fn children_of(&self, id: Uuid) -> impl Iterator<Item = &ProvisioningReport> {
        self.entries.iter().filter(move |e| e.parent == Some(id))
    }

    /// The top-level entries for an external UID, in report order.
    pub fn for_uid<'a>(&'a self, uid: &'a str) -> impl Iterator<Item = &'a ProvisioningReport> {
        self.outcomes().filter(move |e| e.uid == uid)
    }
}

/// Append-only collector of report entries for one run.
pub struct ReportAggregator {
    entries: Mutex<Vec<ProvisioningReport>>,
    frozen: AtomicBool,
}

impl ReportAggregator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            frozen: AtomicBool::new(false),
        }
    }

    /// Append a delta's entries, main entry first.
    pub fn append(&self, report: &DeltaReport) -> PullResult<()> {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        // checked under the lock so nothing slips in after finalize
        if self.frozen.load(Ordering::SeqCst) {
            return Err(PullError::ReportFinalized {
                uid: report.main.uid.clone(),
            });
        }
        entries.extend(report.entries().cloned());
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn is_finalized(&self) -> bool {
        self.frozen.load(Ordering::SeqCst)
    }

    /// Freeze the sequence and return the entries collected so far.
    pub(crate) fn freeze(&self) -> Vec<ProvisioningReport> {
        let entries = self
            .entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        self.frozen.store(true, Ordering::SeqCst);
        entries.clone()
    }
}

impl Default for ReportAggregator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use idsync_connector::operation::{AttributeSet, ExternalRecord, Uid};
    use idsync_connector::traits::SyncDelta;

    fn delta(uid: &str) -> Delta {
        let record = ExternalRecord::new(Uid::from_value(uid), "group", AttributeSet::new());
        let mut delta = Delta::new(7, EntityType::Group, SyncDelta::present(record));
        delta.set_operation(Operation::Update);
        delta
    }

    #[test]
    fn test_related_entries_are_chained() {
        let group = EntityKey::new();
        let member = EntityKey::new();
        let mut report =
            DeltaReport::success(&delta("cn=staff"), Some(group), PipelineStage::Reported);
        report.add_related(ProvisioningReport::related(
            0,
            member,
            EntityType::User,
            Operation::Update,
        ));

        let entries: Vec<_> = report.entries().collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].parent, Some(entries[0].id));
        assert_eq!(entries[1].sequence, 7);
        assert_eq!(entries[1].key, Some(member));
    }

    #[test]
    fn test_failed_report_carries_kind() {
        let err = PullError::mutation("cn=staff", "rejected");
        let report = DeltaReport::failed(&delta("cn=staff"), None, PipelineStage::Mutated, &err);
        assert_eq!(report.status(), OutcomeStatus::Failure);
        assert_eq!(report.main.error_kind, Some(ErrorKind::MutationFailure));
        assert_eq!(report.main.operation, Operation::Update);
    }

    #[test]
    fn test_append_rejected_after_freeze() {
        let aggregator = ReportAggregator::new();
        let report = DeltaReport::success(&delta("a"), None, PipelineStage::Reported);
        aggregator.append(&report).unwrap();

        let frozen = aggregator.freeze();
        assert_eq!(frozen.len(), 1);
        assert!(aggregator.is_finalized());

        let err = aggregator.append(&report).unwrap_err();
        assert!(matches!(err, PullError::ReportFinalized { .. }));
        assert_eq!(aggregator.len(), 1);
    }

    #[test]
    fn test_summary_counts() {
        let mut summary = RunSummary::default();
        let ok = DeltaReport::success(&delta("a"), None, PipelineStage::Reported);
        let ignored = DeltaReport::ignored(&delta("b"), None, "policy");
        let failed = DeltaReport::failed(
            &delta("c"),
            None,
            PipelineStage::BeforeHooks,
            &PullError::hook("audit", "boom"),
        );
        for report in [&ok, &ignored, &failed] {
            for entry in report.entries() {
                summary.add(entry);
            }
        }

        assert_eq!(summary.processed, 3);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.ignored, 1);
        assert_eq!(summary.failed, 1);
    }
}
