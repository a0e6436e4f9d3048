//! State owned by a single pull run.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use idsync_connector::ids::ResourceId;

use crate::entity::EntityKey;
use crate::locks::EntityLocks;
use crate::report::{ReportAggregator, RunReport, RunStatus, RunSummary};

type Snapshot = BTreeMap<EntityKey, BTreeSet<EntityKey>>;

/// Membership edges for one container that must change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipDiff {
    pub add: BTreeSet<EntityKey>,
    pub remove: BTreeSet<EntityKey>,
}

impl MembershipDiff {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }

    /// Every member touched by the diff.
    pub fn members(&self) -> impl Iterator<Item = EntityKey> + '_ {
        self.add.iter().chain(self.remove.iter()).copied()
    }
}

/// Before/after membership state, keyed by member.
///
/// "before" is captured from persisted state prior to mutation, "after" is
/// resolved from the source record once the container has been written.
#[derive(Debug, Default)]
pub struct MembershipSnapshots {
    before: Mutex<Snapshot>,
    after: Mutex<Snapshot>,
}

impl MembershipSnapshots {
    fn lock(map: &Mutex<Snapshot>) -> std::sync::MutexGuard<'_, Snapshot> {
        map.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Forget everything recorded for a container, in both snapshots.
    pub fn reset_container(&self, container: EntityKey) {
        for map in [&self.before, &self.after] {
            let mut map = Self::lock(map);
            map.values_mut().for_each(|containers| {
                containers.remove(&container);
            });
            map.retain(|_, containers| !containers.is_empty());
        }
    }

    pub fn record_before(&self, member: EntityKey, container: EntityKey) {
        Self::lock(&self.before)
            .entry(member)
            .or_default()
            .insert(container);
    }

    pub fn record_after(&self, member: EntityKey, container: EntityKey) {
        Self::lock(&self.after)
            .entry(member)
            .or_default()
            .insert(container);
    }

    #[must_use]
    pub fn before_of(&self, member: EntityKey) -> BTreeSet<EntityKey> {
        Self::lock(&self.before)
            .get(&member)
            .cloned()
            .unwrap_or_default()
    }

    #[must_use]
    pub fn after_of(&self, member: EntityKey) -> BTreeSet<EntityKey> {
        Self::lock(&self.after)
            .get(&member)
            .cloned()
            .unwrap_or_default()
    }

    /// Members to add to and remove from a container.
    #[must_use]
    pub fn diff_for(&self, container: EntityKey) -> MembershipDiff {
        let members_in = |map: &Mutex<Snapshot>| -> BTreeSet<EntityKey> {
            Self::lock(map)
                .iter()
                .filter(|(_, containers)| containers.contains(&container))
                .map(|(member, _)| *member)
                .collect()
        };
        let before = members_in(&self.before);
        let after = members_in(&self.after);

        MembershipDiff {
            add: after.difference(&before).copied().collect(),
            remove: before.difference(&after).copied().collect(),
        }
    }

    pub fn clear(&self) {
        Self::lock(&self.before).clear();
        Self::lock(&self.after).clear();
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        Self::lock(&self.before).is_empty() && Self::lock(&self.after).is_empty()
    }
}

/// Context for one pull run: locks, snapshots, report and cancellation.
///
/// Concurrent runs each own a context; nothing is shared between them.
pub struct RunContext {
    run_id: Uuid,
    resource: ResourceId,
    started_at: DateTime<Utc>,
    locks: EntityLocks,
    memberships: MembershipSnapshots,
    report: ReportAggregator,
    cancelled: AtomicBool,
    sequence: AtomicU64,
}

impl RunContext {
    #[must_use]
    pub fn new(resource: ResourceId) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            resource,
            started_at: Utc::now(),
            locks: EntityLocks::new(),
            memberships: MembershipSnapshots::default(),
            report: ReportAggregator::new(),
            cancelled: AtomicBool::new(false),
            sequence: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    #[must_use]
    pub fn resource(&self) -> ResourceId {
        self.resource
    }

    #[must_use]
    pub fn locks(&self) -> &EntityLocks {
        &self.locks
    }

    #[must_use]
    pub fn memberships(&self) -> &MembershipSnapshots {
        &self.memberships
    }

    #[must_use]
    pub fn report(&self) -> &ReportAggregator {
        &self.report
    }

    /// Stop dispatching new deltas. In-flight deltas finish.
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            info!(run_id = %self.run_id, "Pull run cancellation requested");
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub(crate) fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst)
    }

    /// Freeze the report and build the run result.
    pub fn finalize(&self, status: RunStatus, error: Option<String>) -> RunReport {
        let entries = self.report.freeze();
        let mut summary = RunSummary::default();
        for entry in &entries {
            summary.add(entry);
        }

        RunReport {
            run_id: self.run_id,
            resource: self.resource,
            status,
            error,
            entries,
            summary,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}
