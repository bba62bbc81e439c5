// Coordinator Service unit tests

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::application::coordinator::{CoordinatorConfig, CoordinatorService};
use crate::domain::{RecordType, TxOutcome, TxPhase, Vote};
use crate::error::AppError;
use crate::port::resource_manager::mocks::{
    AckScript, MockResourceManager, PrepareScript, QueryScript,
};
use crate::port::transaction_log::mocks::InMemoryTransactionLog;
use crate::port::{BranchStatus, IdProvider, TimeProvider};

struct SeqIdProvider {
    counter: AtomicU64,
}

impl IdProvider for SeqIdProvider {
    fn generate_id(&self) -> String {
        format!("tx-{}", self.counter.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

struct FixedTimeProvider;

impl TimeProvider for FixedTimeProvider {
    fn now_millis(&self) -> i64 {
        1_700_000_000_000
    }
}

fn fast_config() -> CoordinatorConfig {
    CoordinatorConfig {
        prepare_timeout: Duration::from_millis(50),
        phase_two_timeout: Duration::from_millis(50),
        participant_retry_base_delay_ms: 1,
        log_append_base_delay_ms: 1,
        cancel_wait_timeout: Duration::from_millis(500),
        ..CoordinatorConfig::default()
    }
}

fn setup() -> (Arc<CoordinatorService>, Arc<InMemoryTransactionLog>) {
    let log = Arc::new(InMemoryTransactionLog::new());
    let service = Arc::new(CoordinatorService::new(
        log.clone(),
        Arc::new(SeqIdProvider {
            counter: AtomicU64::new(0),
        }),
        Arc::new(FixedTimeProvider),
        fast_config(),
    ));
    (service, log)
}

#[tokio::test]
async fn test_commit_all_yes_commits_every_branch() {
    let (service, log) = setup();
    let rm_a = Arc::new(MockResourceManager::new("rm-a"));
    let rm_b = Arc::new(MockResourceManager::new("rm-b"));
    service.register_resource_manager(rm_a.clone()).await;
    service.register_resource_manager(rm_b.clone()).await;

    let tx_id = service.begin().await.unwrap();
    service.enlist(&tx_id, "rm-a").await.unwrap();
    service.enlist(&tx_id, "rm-b").await.unwrap();

    let outcome = service.commit(&tx_id).await.unwrap();
    assert_eq!(outcome, TxOutcome::Committed);

    assert_eq!(rm_a.verb_count("prepare"), 1);
    assert_eq!(rm_a.verb_count("commit"), 1);
    assert_eq!(rm_a.verb_count("rollback"), 0);
    assert_eq!(rm_a.verb_count("forget"), 1);
    assert_eq!(rm_b.verb_count("commit"), 1);

    assert_eq!(
        log.record_types_for(&tx_id),
        vec![
            RecordType::Created,
            RecordType::Votes,
            RecordType::Decision,
            RecordType::Terminal
        ]
    );
}

#[tokio::test]
async fn test_single_no_vote_rolls_back_everything() {
    let (service, _log) = setup();
    let rm_yes = Arc::new(MockResourceManager::new("rm-yes"));
    let rm_no =
        Arc::new(MockResourceManager::new("rm-no").with_prepare(PrepareScript::VoteNo));
    service.register_resource_manager(rm_yes.clone()).await;
    service.register_resource_manager(rm_no.clone()).await;

    let tx_id = service.begin().await.unwrap();
    service.enlist(&tx_id, "rm-yes").await.unwrap();
    service.enlist(&tx_id, "rm-no").await.unwrap();

    let outcome = service.commit(&tx_id).await.unwrap();
    assert_eq!(outcome, TxOutcome::RolledBack);

    // Both confirmed voters receive the rollback verb, commit goes
    // nowhere.
    assert_eq!(rm_yes.verb_count("rollback"), 1);
    assert_eq!(rm_no.verb_count("rollback"), 1);
    assert_eq!(rm_yes.verb_count("commit"), 0);
    assert_eq!(rm_no.verb_count("commit"), 0);
}

#[tokio::test]
async fn test_empty_transaction_commits_vacuously() {
    let (service, log) = setup();
    let tx_id = service.begin().await.unwrap();
    let outcome = service.commit(&tx_id).await.unwrap();
    assert_eq!(outcome, TxOutcome::Committed);
    assert_eq!(
        log.record_types_for(&tx_id).last(),
        Some(&RecordType::Terminal)
    );
}

#[tokio::test]
async fn test_enlist_unregistered_resource_manager_fails() {
    let (service, _log) = setup();
    let tx_id = service.begin().await.unwrap();
    let err = service.enlist(&tx_id, "rm-missing").await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn test_enlist_unknown_transaction_fails() {
    let (service, _log) = setup();
    let err = service.enlist("tx-missing", "rm-a").await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn test_resolved_transaction_is_gone() {
    let (service, _log) = setup();
    let tx_id = service.begin().await.unwrap();
    service.commit(&tx_id).await.unwrap();

    assert!(matches!(
        service.commit(&tx_id).await.unwrap_err(),
        AppError::NotFound(_)
    ));
    assert!(matches!(
        service.status(&tx_id).await.unwrap_err(),
        AppError::NotFound(_)
    ));
    assert_eq!(service.in_flight_count().await, 0);
}

#[tokio::test]
async fn test_client_rollback_before_prepare_unwinds_locally() {
    let (service, log) = setup();
    let rm = Arc::new(MockResourceManager::new("rm-a"));
    service.register_resource_manager(rm.clone()).await;

    let tx_id = service.begin().await.unwrap();
    service.enlist(&tx_id, "rm-a").await.unwrap();

    let outcome = service.rollback(&tx_id).await.unwrap();
    assert_eq!(outcome, TxOutcome::RolledBack);

    // Nothing was prepared, so the participant hears nothing.
    assert!(rm.calls().is_empty());
    assert_eq!(
        log.record_types_for(&tx_id),
        vec![
            RecordType::Created,
            RecordType::Decision,
            RecordType::Terminal
        ]
    );
}

#[tokio::test]
async fn test_rollback_during_prepare_cancels_commit() {
    let (service, _log) = setup();
    // Prepare answers, but slowly enough for the cancel to land first.
    let rm = Arc::new(
        MockResourceManager::new("rm-a")
            .with_prepare_sequence(vec![PrepareScript::Hang])
            .with_query(QueryScript::Status(BranchStatus::Unprepared)),
    );
    service.register_resource_manager(rm.clone()).await;

    let tx_id = service.begin().await.unwrap();
    service.enlist(&tx_id, "rm-a").await.unwrap();

    let commit_service = service.clone();
    let commit_tx = tx_id.clone();
    let commit_task = tokio::spawn(async move { commit_service.commit(&commit_tx).await });

    // Let the commit grab the context lock and start preparing.
    tokio::time::sleep(Duration::from_millis(10)).await;
    let rollback_outcome = service.rollback(&tx_id).await.unwrap();
    assert_eq!(rollback_outcome, TxOutcome::RolledBack);

    let commit_outcome = commit_task.await.unwrap().unwrap();
    assert_eq!(commit_outcome, TxOutcome::RolledBack);
}

#[tokio::test]
async fn test_rollback_after_commit_point_is_refused() {
    let (service, _log) = setup();
    // Commit delivery stalls long enough for the rollback request to
    // arrive after the decision is durable.
    let rm = Arc::new(
        MockResourceManager::new("rm-a")
            .with_commit_sequence(vec![AckScript::Hang, AckScript::Ack]),
    );
    service.register_resource_manager(rm.clone()).await;

    let tx_id = service.begin().await.unwrap();
    service.enlist(&tx_id, "rm-a").await.unwrap();

    let commit_service = service.clone();
    let commit_tx = tx_id.clone();
    let commit_task = tokio::spawn(async move { commit_service.commit(&commit_tx).await });

    tokio::time::sleep(Duration::from_millis(25)).await;
    let err = service.rollback(&tx_id).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidState(_)));

    assert_eq!(commit_task.await.unwrap().unwrap(), TxOutcome::Committed);
}

#[tokio::test]
async fn test_status_reports_phase_and_votes() {
    let (service, _log) = setup();
    let rm = Arc::new(MockResourceManager::new("rm-a"));
    service.register_resource_manager(rm).await;

    let tx_id = service.begin().await.unwrap();
    let branch_id = service.enlist(&tx_id, "rm-a").await.unwrap();

    let snapshot = service.status(&tx_id).await.unwrap();
    assert_eq!(snapshot.tx_id, tx_id);
    assert_eq!(snapshot.phase, TxPhase::Active);
    assert_eq!(snapshot.branches.len(), 1);
    assert_eq!(snapshot.branches[0].branch_id, branch_id);
    assert_eq!(snapshot.branches[0].vote, Vote::Unknown);
}

#[tokio::test]
async fn test_indeterminate_branch_never_receives_direct_rollback() {
    let (service, _log) = setup();
    let rm_slow = Arc::new(
        MockResourceManager::new("rm-slow")
            .with_prepare(PrepareScript::Hang)
            .with_query(QueryScript::Status(BranchStatus::Unprepared)),
    );
    let rm_ok = Arc::new(MockResourceManager::new("rm-ok"));
    service.register_resource_manager(rm_slow.clone()).await;
    service.register_resource_manager(rm_ok.clone()).await;

    let tx_id = service.begin().await.unwrap();
    service.enlist(&tx_id, "rm-slow").await.unwrap();
    service.enlist(&tx_id, "rm-ok").await.unwrap();

    let outcome = service.commit(&tx_id).await.unwrap();
    assert_eq!(outcome, TxOutcome::RolledBack);

    // The indeterminate branch is resolved through a query, never a
    // blind rollback. The confirmed yes voter does get rolled back.
    assert_eq!(rm_slow.verb_count("rollback"), 0);
    assert_eq!(rm_slow.verb_count("query"), 1);
    assert_eq!(rm_ok.verb_count("rollback"), 1);
}

#[tokio::test]
async fn test_unknown_branch_on_rollback_escalates_to_hazard() {
    let (service, _log) = setup();
    let rm_no = Arc::new(MockResourceManager::new("rm-no").with_prepare(PrepareScript::VoteNo));
    let rm_amnesiac = Arc::new(
        MockResourceManager::new("rm-amnesiac").with_rollback(AckScript::UnknownBranch),
    );
    service.register_resource_manager(rm_no.clone()).await;
    service
        .register_resource_manager(rm_amnesiac.clone())
        .await;

    let tx_id = service.begin().await.unwrap();
    service.enlist(&tx_id, "rm-no").await.unwrap();
    service.enlist(&tx_id, "rm-amnesiac").await.unwrap();

    let outcome = service.commit(&tx_id).await.unwrap();
    assert_eq!(outcome, TxOutcome::HeuristicHazard);
}

#[tokio::test]
async fn test_undeliverable_commit_is_hazard() {
    let (service, _log) = setup();
    let rm = Arc::new(MockResourceManager::new("rm-down").with_commit(AckScript::Unreachable));
    service.register_resource_manager(rm.clone()).await;

    let tx_id = service.begin().await.unwrap();
    service.enlist(&tx_id, "rm-down").await.unwrap();

    let outcome = service.commit(&tx_id).await.unwrap();
    assert_eq!(outcome, TxOutcome::HeuristicHazard);
}

#[tokio::test]
async fn test_unilateral_commit_under_rollback_is_mixed() {
    let (service, _log) = setup();
    // One branch is indeterminate and turns out to have committed on
    // its own; the no voter rolls back cleanly.
    let rm_rogue = Arc::new(
        MockResourceManager::new("rm-rogue")
            .with_prepare(PrepareScript::Hang)
            .with_query(QueryScript::Status(BranchStatus::Committed)),
    );
    let rm_no = Arc::new(MockResourceManager::new("rm-no").with_prepare(PrepareScript::VoteNo));
    service.register_resource_manager(rm_rogue.clone()).await;
    service.register_resource_manager(rm_no.clone()).await;

    let tx_id = service.begin().await.unwrap();
    service.enlist(&tx_id, "rm-rogue").await.unwrap();
    service.enlist(&tx_id, "rm-no").await.unwrap();

    let outcome = service.commit(&tx_id).await.unwrap();
    assert_eq!(outcome, TxOutcome::HeuristicMixed);
}

#[tokio::test]
async fn test_begin_fails_when_created_record_not_durable() {
    let (service, log) = setup();
    log.fail_next_appends(fast_config().log_append_attempts);
    let err = service.begin().await.unwrap_err();
    assert!(matches!(err, AppError::LogWrite(_)));
    assert_eq!(service.in_flight_count().await, 0);
}

#[tokio::test]
async fn test_append_retry_survives_transient_failure() {
    let (service, log) = setup();
    log.fail_next_appends(2);
    let tx_id = service.begin().await.unwrap();
    assert_eq!(log.record_types_for(&tx_id), vec![RecordType::Created]);
}

#[tokio::test]
async fn test_phase_two_never_runs_without_durable_decision() {
    let (service, log) = setup();
    let rm = Arc::new(MockResourceManager::new("rm-a"));
    service.register_resource_manager(rm.clone()).await;

    let tx_id = service.begin().await.unwrap();
    service.enlist(&tx_id, "rm-a").await.unwrap();

    // Every append after CREATED fails, so neither the vote set nor
    // the decision becomes durable.
    log.fail_next_appends(u32::MAX);
    let err = service.commit(&tx_id).await.unwrap_err();
    assert!(matches!(err, AppError::LogWrite(_)));

    assert_eq!(rm.verb_count("commit"), 0);
    assert_eq!(rm.verb_count("rollback"), 0);
}
