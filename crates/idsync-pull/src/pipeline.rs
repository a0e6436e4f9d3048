//! Pull pipeline.
//!
//! Fetches deltas from the profile's connector, one provision at a time, and
//! runs each through match, classify, before hooks, mutation, after hooks
//! and report on a bounded pool of tasks.

use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, instrument, warn};

use idsync_connector::error::ConnectorError;

use crate::config::PolicyAction;
use crate::context::RunContext;
use crate::delta::{classify, Delta, Operation, PipelineStage};
use crate::entity::{ChangeRequest, InternalEntity};
use crate::error::{PullError, PullResult};
use crate::hooks::HookError;
use crate::locks::{LockGuard, LockKey};
use crate::profile::PullProfile;
use crate::report::{DeltaReport, OutcomeStatus, RunReport, RunStatus};
use crate::store::{ExternalLink, StoreError};

/// Result of the mutation step.
struct Mutation {
    /// The entity as written, None once deleted or not yet created.
    entity: Option<InternalEntity>,
    message: Option<String>,
}

impl Mutation {
    fn written(entity: InternalEntity) -> Self {
        Self {
            entity: Some(entity),
            message: None,
        }
    }
}

/// Runs pulls for one profile.
pub struct PullPipeline {
    profile: Arc<PullProfile>,
}

impl PullPipeline {
    #[must_use]
    pub fn new(profile: PullProfile) -> Self {
        Self {
            profile: Arc::new(profile),
        }
    }

    #[must_use]
    pub fn from_shared(profile: Arc<PullProfile>) -> Self {
        Self { profile }
    }

    #[must_use]
    pub fn profile(&self) -> &PullProfile {
        &self.profile
    }

    /// Create the context for a new run. Keep a clone to cancel it.
    #[must_use]
    pub fn start(&self) -> Arc<RunContext> {
        Arc::new(RunContext::new(self.profile.resource()))
    }

    /// Run a full pull with a fresh context.
    pub async fn run(&self) -> RunReport {
        let run = self.start();
        self.execute(run).await
    }

    /// Process one delta within a run and append its outcome to the run
    /// report.
    pub async fn process(&self, run: &RunContext, delta: Delta) -> DeltaReport {
        process_delta(&self.profile, run, delta).await
    }

    /// Run a pull on the given context.
    ///
    /// Object classes are pulled in provision order; all deltas of one
    /// provision finish before the next provision is fetched. A connector
    /// failure stops dispatch and fails the run, keeping outcomes already
    /// reported.
    #[instrument(
        skip(self, run),
        fields(run_id = %run.run_id(), resource = %self.profile.resource())
    )]
    pub async fn execute(&self, run: Arc<RunContext>) -> RunReport {
        let profile = &self.profile;
        let config = profile.config();
        info!(
            connector = profile.connector().display_name(),
            connector_type = %profile.connector().connector_type(),
            concurrency = config.concurrency,
            batch_size = config.batch_size,
            dry_run = config.dry_run,
            "Starting pull run"
        );

        let semaphore = Arc::new(Semaphore::new(config.concurrency));
        let mut fatal: Option<PullError> = None;

        for provision in profile.provisions() {
            let mut tasks = JoinSet::new();
            let mut token: Option<String> = None;

            loop {
                if run.is_cancelled() {
                    break;
                }
                let batch = match profile
                    .connector()
                    .fetch_deltas(&provision.object_class, token.as_deref(), config.batch_size)
                    .await
                {
                    Ok(batch) => batch,
                    Err(e) => {
                        error!(
                            object_class = %provision.object_class,
                            error = %e,
                            transient = e.is_transient(),
                            "Connector failure, aborting run"
                        );
                        fatal = Some(PullError::from(e));
                        break;
                    }
                };
                debug!(
                    object_class = %provision.object_class,
                    deltas = batch.deltas.len(),
                    has_more = batch.has_more,
                    "Fetched delta batch"
                );

                for sync_delta in batch.deltas {
                    if run.is_cancelled() {
                        break;
                    }
                    if sync_delta.record.uid().is_blank() {
                        error!(
                            object_class = %provision.object_class,
                            "Record without UID, aborting run"
                        );
                        fatal = Some(PullError::from(ConnectorError::invalid_data(format!(
                            "Record of class '{}' has a blank UID",
                            provision.object_class
                        ))));
                        break;
                    }
                    let Ok(permit) = semaphore.clone().acquire_owned().await else {
                        break;
                    };
                    // waiting for a permit may have outlasted a cancel
                    if run.is_cancelled() {
                        break;
                    }

                    let delta =
                        Delta::new(run.next_sequence(), provision.entity_type.clone(), sync_delta);
                    let (profile, run) = (profile.clone(), run.clone());
                    tasks.spawn(async move {
                        let _permit = permit;
                        process_delta(&profile, &run, delta).await;
                    });

                    while let Some(joined) = tasks.try_join_next() {
                        log_join_error(joined);
                    }
                }

                if fatal.is_some() || run.is_cancelled() {
                    break;
                }
                if batch.new_token.is_some() {
                    token = batch.new_token;
                }
                if !batch.has_more {
                    break;
                }
            }

            while let Some(joined) = tasks.join_next().await {
                log_join_error(joined);
            }
            if fatal.is_some() || run.is_cancelled() {
                break;
            }
        }

        for hook in profile.hooks() {
            if let Err(e) = hook.after_all(profile, &run).await {
                warn!(hook = hook.name(), error = %e, "Hook failed after run");
            }
        }
        run.memberships().clear();

        let (status, error) = match (fatal, run.is_cancelled()) {
            (Some(e), _) => (RunStatus::Failed, Some(e.to_string())),
            (None, true) => (RunStatus::Cancelled, Some(PullError::Cancelled.to_string())),
            (None, false) => (RunStatus::Completed, None),
        };
        let report = run.finalize(status, error);

        info!(
            status = %report.status,
            processed = report.summary.processed,
            succeeded = report.summary.succeeded,
            failed = report.summary.failed,
            ignored = report.summary.ignored,
            "Pull run finished"
        );
        report
    }
}

fn log_join_error(joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        error!(error = %e, "Delta task did not complete");
    }
}

/// Run one delta to REPORTED. Locks taken on the way are released only after
/// the outcome has been appended.
#[instrument(
    skip_all,
    fields(uid = %delta.uid(), entity_type = %delta.entity_type(), sequence = delta.sequence())
)]
async fn process_delta(profile: &PullProfile, run: &RunContext, delta: Delta) -> DeltaReport {
    let mut held = Vec::with_capacity(2);
    let report = run_stages(profile, run, delta, &mut held).await;

    if let Err(e) = run.report().append(&report) {
        warn!(error = %e, "Outcome not recorded");
    }
    drop(held);
    report
}

async fn run_stages(
    profile: &PullProfile,
    run: &RunContext,
    mut delta: Delta,
    held: &mut Vec<LockGuard>,
) -> DeltaReport {
    let uid = delta.uid().value().to_string();
    held.push(
        run.locks()
            .lock(LockKey::external(delta.record().object_class(), &uid))
            .await,
    );

    // MATCHED
    let matches = match profile
        .matcher()
        .match_record(delta.entity_type(), delta.record(), profile.resource())
        .await
    {
        Ok(matches) => matches,
        Err(e) => {
            warn!(error = %e, "Matching failed");
            return DeltaReport::failed(&delta, None, PipelineStage::Matched, &e);
        }
    };
    let classification = match classify(&delta, &matches) {
        Ok(classification) => classification,
        Err(e) => {
            delta.set_operation(Operation::for_hint(delta.hint(), true));
            warn!(error = %e, "Ambiguous match, no mutation");
            return DeltaReport::failed(&delta, None, PipelineStage::Matched, &e);
        }
    };
    let operation = classification.operation;
    delta.set_operation(operation);
    let target_key = classification.target.as_ref().map(|m| m.key());

    if operation == Operation::None {
        debug!("Absent from source and unknown internally");
        return DeltaReport::ignored(&delta, None, "Not found internally, nothing to delete");
    }
    let action = profile.config().policy.action_for(operation);
    if action == PolicyAction::Ignore {
        info!(operation = %operation, "Ignored by pull policy");
        return DeltaReport::ignored(
            &delta,
            target_key,
            format!("{operation} ignored by pull policy"),
        );
    }
    if action == PolicyAction::Unlink {
        delta.set_operation(Operation::Unlink);
    }

    if let Some(key) = target_key {
        held.push(run.locks().lock(LockKey::Entity(key)).await);
    }
    // reload under the entity lock, the match may be stale
    let target = match target_key {
        Some(key) => match profile.entities().find(key).await {
            Ok(Some(entity)) => Some(entity),
            Ok(None) => {
                let e = PullError::mutation(&uid, format!("Matched entity {key} no longer exists"));
                return DeltaReport::failed(&delta, target_key, PipelineStage::Matched, &e);
            }
            Err(e) => {
                let e = PullError::from(e);
                return DeltaReport::failed(&delta, target_key, PipelineStage::Matched, &e);
            }
        },
        None => None,
    };

    let mut request = match change_request(profile, &delta) {
        Ok(request) => request,
        Err(e) => {
            warn!(error = %e, "Inbound mapping failed");
            return DeltaReport::failed(&delta, target_key, PipelineStage::Matched, &e);
        }
    };

    // BEFORE_HOOKS
    for hook in profile.hooks() {
        match hook
            .before(profile, run, &delta, target.as_ref(), &mut request)
            .await
        {
            Ok(()) => {}
            Err(HookError::Vetoed { hook: vetoer, reason }) => {
                info!(hook = %vetoer, reason = %reason, "Change vetoed");
                let mut report = DeltaReport::ignored(
                    &delta,
                    target_key,
                    format!("Vetoed by {vetoer}: {reason}"),
                );
                report.stage = PipelineStage::BeforeHooks;
                return report;
            }
            Err(e) => {
                let e = PullError::from_hook(hook.name(), e);
                warn!(error = %e, "Before hook failed");
                return DeltaReport::failed(&delta, target_key, PipelineStage::BeforeHooks, &e);
            }
        }
    }

    // MUTATED
    let mutation = match mutate(profile, &delta, target.as_ref(), &request).await {
        Ok(mutation) => mutation,
        Err(e) => {
            warn!(error = %e, "Mutation failed");
            return DeltaReport::failed(&delta, target_key, PipelineStage::Mutated, &e);
        }
    };
    let key = mutation.entity.as_ref().map(|e| e.key).or(target_key);
    let mut report = DeltaReport::success(&delta, key, PipelineStage::Mutated);
    report.main.message = mutation.message;
    if profile.is_dry_run() {
        report.main.status = OutcomeStatus::Ignored;
    }

    // AFTER_HOOKS
    report.stage = PipelineStage::AfterHooks;
    for hook in profile.hooks() {
        if let Err(e) = hook
            .after(profile, run, &delta, mutation.entity.as_ref(), &mut report)
            .await
        {
            let e = PullError::from_hook(hook.name(), e);
            warn!(error = %e, "After hook failed");
            report.fail(PipelineStage::AfterHooks, &e);
            return report;
        }
    }

    report.stage = PipelineStage::Reported;
    report
}

/// Map the record through the provision of its entity type.
fn change_request(profile: &PullProfile, delta: &Delta) -> PullResult<ChangeRequest> {
    if !matches!(
        delta.operation(),
        Some(Operation::Create) | Some(Operation::Update)
    ) {
        return Ok(ChangeRequest::default());
    }
    let provision = profile.provision_for(delta.entity_type()).ok_or_else(|| {
        PullError::configuration(format!("No provision for '{}'", delta.entity_type()))
    })?;
    provision
        .mapper
        .map(delta.record())
        .into_request(delta.uid().value())
}

/// Apply the change request. The only step writing plain attributes.
async fn mutate(
    profile: &PullProfile,
    delta: &Delta,
    target: Option<&InternalEntity>,
    request: &ChangeRequest,
) -> PullResult<Mutation> {
    let uid = delta.uid().value();
    let resource = profile.resource();
    let object_class = delta.record().object_class();
    let operation = delta.operation().unwrap_or(Operation::None);
    let rejected = |e: StoreError| PullError::mutation(uid, e.to_string());

    if profile.is_dry_run() {
        info!(operation = %operation, "Dry run: skipping write");
        return Ok(Mutation {
            entity: target.cloned(),
            message: Some(format!("Dry run: would {operation}")),
        });
    }

    match (operation, target) {
        (Operation::Create, None) => {
            let entity = profile
                .entities()
                .create(delta.entity_type(), &request.attributes)
                .await
                .map_err(rejected)?;
            profile
                .links()
                .link(ExternalLink::new(resource, object_class, uid, entity.key))
                .await
                .map_err(rejected)?;
            info!(key = %entity.key, "Created entity");
            Ok(Mutation::written(entity))
        }
        (Operation::Update, Some(target)) => {
            let entity = profile
                .entities()
                .update(target.key, &request.attributes)
                .await
                .map_err(rejected)?;
            profile
                .links()
                .link(ExternalLink::new(resource, object_class, uid, entity.key))
                .await
                .map_err(rejected)?;
            info!(key = %entity.key, attributes = request.attributes.len(), "Updated entity");
            Ok(Mutation::written(entity))
        }
        (Operation::Unlink, Some(target)) => {
            profile
                .links()
                .unlink(resource, object_class, uid)
                .await
                .map_err(rejected)?;
            info!(key = %target.key, "Unlinked entity");
            Ok(Mutation {
                entity: Some(target.clone()),
                message: Some("Link removed, entity kept".to_string()),
            })
        }
        (Operation::Delete, Some(target)) => {
            profile
                .entities()
                .delete(target.key)
                .await
                .map_err(rejected)?;
            if profile
                .entities()
                .find(target.key)
                .await
                .map_err(rejected)?
                .is_some()
            {
                return Err(PullError::mutation(
                    uid,
                    format!("Entity {} still exists after delete", target.key),
                ));
            }
            profile
                .links()
                .unlink(resource, object_class, uid)
                .await
                .map_err(rejected)?;
            info!(key = %target.key, "Deleted entity");
            Ok(Mutation {
                entity: None,
                message: None,
            })
        }
        (operation, _) => Err(PullError::mutation(
            uid,
            format!("Cannot {operation} without a matching target"),
        )),
    }
}
