//! Concurrency Tests
//!
//! Runs on a multi-threaded runtime with several deltas in flight:
//! - Deltas for the same source object are serialized
//! - Concurrent runs keep separate reports
//! - Repeated group deltas do not deadlock or double-apply membership
//! - The lock table drains once a run is over

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::*;
use idsync_connector::ids::ResourceId;
use idsync_connector::traits::SyncDelta;
use idsync_pull::config::PullConfig;
use idsync_pull::delta::Operation;
use idsync_pull::entity::{EntityKey, EntityType};
use idsync_pull::membership::MembershipReconciler;
use idsync_pull::pipeline::PullPipeline;
use idsync_pull::report::{OutcomeStatus, RunReport, RunStatus};

const TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_deltas_processed_in_parallel() {
    let harness = Harness::new();
    for i in 0..50 {
        harness
            .source
            .push(SyncDelta::present(user_record(&format!("user{i}"))));
    }
    let profile = harness
        .directory_builder()
        .config(PullConfig::default().with_concurrency(8).with_batch_size(7))
        .build()
        .unwrap();

    let pipeline = PullPipeline::new(profile);
    let run = pipeline.start();

    let report = tokio::time::timeout(TIMEOUT, pipeline.execute(run.clone()))
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.outcomes().count(), 50);
    assert!(run.locks().is_empty());
    assert_eq!(report.summary.succeeded, 50);
    assert_eq!(harness.entities.all_of(&EntityType::User).len(), 50);
    assert_eq!(harness.links.len(), 50);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_same_uid_deltas_are_serialized() {
    let harness = Harness::new();
    for _ in 0..10 {
        harness.source.push(SyncDelta::present(user_record("alice")));
    }
    let profile = harness
        .directory_builder()
        .config(PullConfig::default().with_concurrency(8))
        .build()
        .unwrap();

    let report = tokio::time::timeout(TIMEOUT, PullPipeline::new(profile).run())
        .await
        .unwrap();

    let alice = user_dn("alice");
    let outcomes: Vec<_> = report.for_uid(&alice).collect();
    assert_eq!(outcomes.len(), 10);
    assert!(outcomes.iter().all(|e| e.status == OutcomeStatus::Success));
    assert_eq!(
        outcomes
            .iter()
            .filter(|e| e.operation == Operation::Create)
            .count(),
        1
    );
    assert_eq!(harness.entities.create_count.load(Ordering::SeqCst), 1);
    assert_eq!(harness.entities.update_count.load(Ordering::SeqCst), 9);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_runs_keep_separate_reports() {
    let first = Harness::new();
    let second = Harness {
        resource: ResourceId::new(),
        entities: first.entities.clone(),
        links: first.links.clone(),
        source: Arc::new(ScriptedSource::new()),
    };
    for i in 0..20 {
        first
            .source
            .push(SyncDelta::present(user_record(&format!("hr{i}"))));
        second
            .source
            .push(SyncDelta::present(user_record(&format!("ldap{i}"))));
    }
    let first_pipeline = PullPipeline::new(first.directory_builder().build().unwrap());
    let second_pipeline = PullPipeline::new(second.directory_builder().build().unwrap());

    let (a, b) = tokio::time::timeout(
        TIMEOUT,
        async { tokio::join!(first_pipeline.run(), second_pipeline.run()) },
    )
    .await
    .unwrap();

    assert_ne!(a.run_id, b.run_id);
    assert_eq!(a.resource, first.resource);
    assert_eq!(b.resource, second.resource);
    assert_eq!(a.outcomes().count(), 20);
    assert_eq!(b.outcomes().count(), 20);
    assert!(a.outcomes().all(|e| e.uid.starts_with("uid=hr")));
    assert!(b.outcomes().all(|e| e.uid.starts_with("uid=ldap")));
    assert_eq!(first.entities.all_of(&EntityType::User).len(), 40);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_repeated_group_deltas_apply_membership_once() {
    let harness = Harness::new();
    let alice = harness.seed_user("alice").await;
    let bob = harness.seed_user("bob").await;
    let devs = harness.seed_group("devs", &[]).await;
    for _ in 0..5 {
        harness
            .source
            .push(SyncDelta::present(group_record("devs", &["alice", "bob"])));
    }
    let profile = harness
        .directory_builder()
        .hook(Arc::new(MembershipReconciler::new()))
        .config(PullConfig::default().with_concurrency(4))
        .build()
        .unwrap();

    let report = tokio::time::timeout(TIMEOUT, PullPipeline::new(profile).run())
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert!(report
        .outcomes()
        .all(|e| e.status == OutcomeStatus::Success));
    assert_eq!(harness.entities.patches().len(), 2);
    assert_eq!(harness.memberships_of(alice), vec![devs]);
    assert_eq!(harness.memberships_of(bob), vec![devs]);
}

fn membership_children(report: &RunReport, group: &str) -> Vec<String> {
    let outcome = report.outcomes().find(|e| e.uid == group_dn(group)).unwrap();
    report
        .children_of(outcome.id)
        .map(|e| e.message.clone().unwrap_or_default())
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_runs_reconcile_their_own_groups() {
    let first = Harness::new();
    let second = Harness {
        resource: ResourceId::new(),
        entities: first.entities.clone(),
        links: first.links.clone(),
        source: Arc::new(ScriptedSource::new()),
    };
    let alice = first.seed_user("alice").await;
    let bob = first.seed_user("bob").await;
    let carol = second.seed_user("carol").await;
    let dave = second.seed_user("dave").await;
    let devs = first.seed_group("devs", &[alice]).await;
    let ops = second.seed_group("ops", &[carol]).await;
    first
        .source
        .push(SyncDelta::present(group_record("devs", &["bob"])));
    second
        .source
        .push(SyncDelta::present(group_record("ops", &["dave"])));

    let reconciler = Arc::new(MembershipReconciler::new());
    let first_pipeline =
        PullPipeline::new(first.directory_builder().hook(reconciler.clone()).build().unwrap());
    let second_pipeline =
        PullPipeline::new(second.directory_builder().hook(reconciler).build().unwrap());
    let (first_run, second_run) = (first_pipeline.start(), second_pipeline.start());

    let (a, b) = tokio::time::timeout(TIMEOUT, async {
        tokio::join!(
            first_pipeline.execute(first_run.clone()),
            second_pipeline.execute(second_run.clone())
        )
    })
    .await
    .unwrap();

    let devs_children = membership_children(&a, "devs");
    assert_eq!(devs_children.len(), 2);
    assert!(devs_children.iter().all(|m| m.ends_with(&devs.to_string())));
    let ops_children = membership_children(&b, "ops");
    assert_eq!(ops_children.len(), 2);
    assert!(ops_children.iter().all(|m| m.ends_with(&ops.to_string())));

    assert_eq!(harness_members(&first, &[alice, bob]), vec![vec![], vec![devs]]);
    assert_eq!(harness_members(&second, &[carol, dave]), vec![vec![], vec![ops]]);
    assert!(first_run.memberships().is_empty());
    assert!(second_run.memberships().is_empty());
}

fn harness_members(harness: &Harness, members: &[EntityKey]) -> Vec<Vec<EntityKey>> {
    members.iter().map(|m| harness.memberships_of(*m)).collect()
}
