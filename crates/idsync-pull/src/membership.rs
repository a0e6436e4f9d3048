//! Group membership reconciliation.
//!
//! Directories keep membership on the group (`uniqueMember`, `member`), the
//! internal model keeps it on the member. The generic mutation step only
//! writes the group's own attributes, so this hook moves the edges:
//!
//! 1. `before`: snapshot the group's persisted members, keyed by member.
//! 2. `after`: resolve the group's member attribute from the source record,
//!    diff against the snapshot and patch each affected member.
//!
//! Both snapshots live in the [`RunContext`](crate::context::RunContext) and
//! are dropped in `after_all`.

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use crate::context::RunContext;
use crate::delta::{Delta, Operation};
use crate::entity::{ChangeRequest, EntityKey, EntityType, InternalEntity, MembershipPatch};
use crate::error::PullError;
use crate::hooks::{HookError, HookResult, PullHook};
use crate::locks::LockKey;
use crate::profile::PullProfile;
use crate::report::{DeltaReport, OutcomeStatus, ProvisioningReport};

/// Connector property naming the group member attribute.
pub const GROUP_MEMBER_ATTRIBUTE_PROPERTY: &str = "groupMemberAttribute";

/// Member attribute used when the connector does not configure one.
pub const DEFAULT_GROUP_MEMBER_ATTRIBUTE: &str = "uniquemember";

/// Hook reconciling group membership edges onto member entities.
#[derive(Debug, Clone)]
pub struct MembershipReconciler {
    member_type: EntityType,
}

impl MembershipReconciler {
    pub const NAME: &'static str = "membership";

    /// Reconcile memberships of users.
    #[must_use]
    pub fn new() -> Self {
        Self {
            member_type: EntityType::User,
        }
    }

    /// The member attribute configured on the profile's connector.
    #[must_use]
    pub fn member_attribute(profile: &PullProfile) -> String {
        profile
            .connector()
            .configuration_property(GROUP_MEMBER_ATTRIBUTE_PROPERTY)
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_GROUP_MEMBER_ATTRIBUTE.to_string())
    }

    /// The member attribute when the delta is a group whose mapping carries
    /// it and member entities are provisioned too.
    fn active_attribute(&self, profile: &PullProfile, delta: &Delta) -> Option<String> {
        if !delta.entity_type().is_container() {
            return None;
        }
        profile.provision_for(&self.member_type)?;
        let provision = profile.provision_for(delta.entity_type())?;
        let attribute = Self::member_attribute(profile);
        provision
            .mapper
            .maps_external(&attribute)
            .then_some(attribute)
    }

    /// Resolve the member references of the record and record them as the
    /// target state of `group`.
    async fn resolve_targets(
        &self,
        profile: &PullProfile,
        run: &RunContext,
        delta: &Delta,
        attribute: &str,
        group: EntityKey,
    ) -> HookResult<()> {
        let Some(members) = profile.provision_for(&self.member_type) else {
            return Ok(());
        };
        for reference in delta.record().values_of(attribute) {
            let matches = profile
                .matcher()
                .match_reference(
                    &self.member_type,
                    &members.object_class,
                    &reference,
                    profile.resource(),
                )
                .await
                .map_err(|e| HookError::failed(Self::NAME, e.to_string()))?;

            match matches.unique() {
                Some(member) => run.memberships().record_after(member.key(), group),
                None if matches.is_empty() => {
                    warn!(
                        reference = %reference,
                        group = %group,
                        "Member reference not found, skipping"
                    );
                }
                None => {
                    warn!(
                        reference = %reference,
                        group = %group,
                        candidates = matches.best().len(),
                        "Ambiguous member reference, skipping"
                    );
                }
            }
        }
        Ok(())
    }
}

impl Default for MembershipReconciler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PullHook for MembershipReconciler {
    fn name(&self) -> &str {
        Self::NAME
    }

    #[instrument(skip_all, fields(uid = %delta.uid()))]
    async fn before(
        &self,
        profile: &PullProfile,
        run: &RunContext,
        delta: &Delta,
        entity: Option<&InternalEntity>,
        _request: &mut ChangeRequest,
    ) -> HookResult<()> {
        if self.active_attribute(profile, delta).is_none() {
            debug!(entity_type = %delta.entity_type(), "Not a reconciled group, ignoring");
            return Ok(());
        }
        let Some(group) = entity else {
            return Ok(());
        };

        run.memberships().reset_container(group.key);
        let members = profile.entities().members_of(group.key).await?;
        for member in &members {
            run.memberships().record_before(*member, group.key);
        }
        debug!(group = %group.key, members = members.len(), "Captured persisted members");
        Ok(())
    }

    #[instrument(skip_all, fields(uid = %delta.uid()))]
    async fn after(
        &self,
        profile: &PullProfile,
        run: &RunContext,
        delta: &Delta,
        entity: Option<&InternalEntity>,
        report: &mut DeltaReport,
    ) -> HookResult<()> {
        let Some(attribute) = self.active_attribute(profile, delta) else {
            return Ok(());
        };
        if !matches!(
            delta.operation(),
            Some(Operation::Create) | Some(Operation::Update)
        ) {
            return Ok(());
        }
        let Some(group) = entity else {
            return Ok(());
        };

        self.resolve_targets(profile, run, delta, &attribute, group.key)
            .await?;

        let diff = run.memberships().diff_for(group.key);
        if diff.is_empty() {
            debug!(group = %group.key, "Membership unchanged");
            return Ok(());
        }

        let group_lock = LockKey::Entity(group.key);
        let _members = run
            .locks()
            .lock_all(
                diff.members()
                    .map(LockKey::Entity)
                    .filter(|key| key != &group_lock),
            )
            .await;

        let patches = diff
            .add
            .iter()
            .map(|member| (*member, MembershipPatch::adding(group.key)))
            .chain(
                diff.remove
                    .iter()
                    .map(|member| (*member, MembershipPatch::removing(group.key))),
            );

        let mut rejected = 0usize;
        let mut total = 0usize;
        for (member, patch) in patches {
            total += 1;
            let verb = if patch.add.is_empty() { "removed from" } else { "added to" };
            let entry = ProvisioningReport::related(
                delta.sequence(),
                member,
                self.member_type.clone(),
                Operation::Update,
            );

            if profile.is_dry_run() {
                let mut entry =
                    entry.with_message(format!("Dry run: would be {verb} group {}", group.key));
                entry.status = OutcomeStatus::Ignored;
                report.add_related(entry);
                continue;
            }

            match profile.entities().update_memberships(member, &patch).await {
                Ok(_) => {
                    info!(member = %member, group = %group.key, "Membership {verb} group");
                    report.add_related(entry.with_message(format!("{verb} group {}", group.key)));
                }
                Err(e) => {
                    warn!(
                        member = %member,
                        group = %group.key,
                        error = %e,
                        "Membership write rejected"
                    );
                    rejected += 1;
                    let mut entry = entry;
                    entry.fail(&PullError::reconciliation(group.key, e.to_string()));
                    report.add_related(entry);
                }
            }
        }

        if rejected > 0 {
            return Err(HookError::Reconciliation {
                container: group.key,
                message: format!("{rejected} of {total} membership writes rejected"),
            });
        }
        Ok(())
    }

    async fn after_all(&self, _profile: &PullProfile, run: &RunContext) -> HookResult<()> {
        run.memberships().clear();
        Ok(())
    }
}
