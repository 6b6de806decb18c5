//! Execution scheduler behavior against a scripted backend.

mod common;

use std::time::Duration;

use common::{migration, MockCluster};
use proptest::prelude::*;
use pvebal_balance::{ExecuteError, Executor, ExecutorConfig, Migration};
use tokio::sync::watch;

fn executor(wait: bool) -> Executor {
    Executor::new(ExecutorConfig {
        poll_interval: Duration::from_millis(1),
        stall_timeout: Some(Duration::from_secs(5)),
        wait,
    })
}

fn chain() -> Vec<Migration> {
    vec![
        migration("1", "a", "b"),
        migration("2", "a", "c"),
        migration("3", "c", "d"),
        migration("4", "b", "d"),
    ]
}

#[tokio::test]
async fn test_blocked_migrations_are_deferred() {
    let backend = MockCluster::new(vec![]);
    let (_shutdown_tx, mut shutdown) = watch::channel(false);

    let report = executor(false)
        .execute(&chain(), &backend, &mut shutdown)
        .await
        .unwrap();

    assert_eq!(backend.submitted_vms(), vec!["1", "3", "2", "4"]);
    assert!(backend.violations().is_empty());
    assert_eq!(report.submitted, 4);
    assert_eq!(backend.polls(), 2);

    // Without wait, the last two are still running.
    let in_flight: Vec<String> = report.in_flight.iter().map(|m| m.vm.id.to_string()).collect();
    assert_eq!(in_flight, vec!["2", "4"]);
    assert_eq!(report.succeeded.len(), 2);
}

#[tokio::test]
async fn test_wait_drains_all_tasks() {
    let backend = MockCluster::new(vec![]);
    let (_shutdown_tx, mut shutdown) = watch::channel(false);

    let report = executor(true)
        .execute(&chain(), &backend, &mut shutdown)
        .await
        .unwrap();

    assert!(report.in_flight.is_empty());
    assert_eq!(report.succeeded.len(), 4);
    assert!(report.failed.is_empty());
    assert_eq!(backend.polls(), 4);
}

#[tokio::test]
async fn test_independent_migrations_run_concurrently() {
    let backend = MockCluster::new(vec![]);
    let (_shutdown_tx, mut shutdown) = watch::channel(false);
    let plan = vec![
        migration("1", "a", "b"),
        migration("2", "c", "d"),
        migration("3", "e", "f"),
    ];

    let report = executor(false)
        .execute(&plan, &backend, &mut shutdown)
        .await
        .unwrap();

    assert_eq!(report.submitted, 3);
    assert_eq!(backend.max_concurrent(), 3);
    assert_eq!(backend.polls(), 0);
}

#[tokio::test]
async fn test_empty_plan_submits_nothing() {
    let backend = MockCluster::new(vec![]);
    let (_shutdown_tx, mut shutdown) = watch::channel(false);

    let report = executor(true)
        .execute(&[], &backend, &mut shutdown)
        .await
        .unwrap();

    assert_eq!(report.submitted, 0);
    assert!(backend.submitted().is_empty());
    assert_eq!(backend.polls(), 0);
}

#[tokio::test]
async fn test_failed_migration_is_reported_not_retried() {
    let backend = MockCluster::new(vec![]).failing("1");
    let (_shutdown_tx, mut shutdown) = watch::channel(false);

    let report = executor(true)
        .execute(&chain(), &backend, &mut shutdown)
        .await
        .unwrap();

    assert_eq!(report.submitted, 4);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].migration.vm.id.as_str(), "1");
    assert_eq!(report.succeeded.len(), 3);
    assert_eq!(backend.submitted().len(), 4);
}

#[tokio::test]
async fn test_stalled_backend_times_out() {
    let backend = MockCluster::new(vec![]).finishing(0);
    let (_shutdown_tx, mut shutdown) = watch::channel(false);
    let executor = Executor::new(ExecutorConfig {
        poll_interval: Duration::from_millis(5),
        stall_timeout: Some(Duration::from_millis(30)),
        wait: false,
    });

    let err = executor
        .execute(&chain(), &backend, &mut shutdown)
        .await
        .unwrap_err();

    match err {
        ExecuteError::Stalled { elapsed, in_flight } => {
            assert!(elapsed >= Duration::from_millis(30));
            assert_eq!(in_flight, 2);
        }
        other => panic!("expected stall, got {other:?}"),
    }
}

#[tokio::test]
async fn test_shutdown_before_start_cancels() {
    let backend = MockCluster::new(vec![]);
    let (shutdown_tx, mut shutdown) = watch::channel(false);
    shutdown_tx.send(true).unwrap();

    let err = executor(false)
        .execute(&chain(), &backend, &mut shutdown)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ExecuteError::Cancelled {
            pending: 4,
            in_flight: 0
        }
    ));
    assert!(backend.submitted().is_empty());
}

#[tokio::test]
async fn test_shutdown_interrupts_wait() {
    let backend = MockCluster::new(vec![]).finishing(0);
    let (shutdown_tx, mut shutdown) = watch::channel(false);
    let executor = Executor::new(ExecutorConfig {
        poll_interval: Duration::from_secs(60),
        stall_timeout: None,
        wait: false,
    });
    let plan = vec![migration("1", "a", "b"), migration("2", "b", "c")];

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let _ = shutdown_tx.send(true);
    });

    let err = tokio::time::timeout(
        Duration::from_secs(5),
        executor.execute(&plan, &backend, &mut shutdown),
    )
    .await
    .expect("shutdown did not interrupt the wait")
    .unwrap_err();

    assert!(matches!(
        err,
        ExecuteError::Cancelled {
            pending: 1,
            in_flight: 1
        }
    ));
}

fn arb_plan() -> impl Strategy<Value = Vec<Migration>> {
    prop::collection::vec((0usize..5, 1usize..5), 0..16).prop_map(|moves| {
        moves
            .into_iter()
            .enumerate()
            .map(|(vm, (source, offset))| {
                let target = (source + offset) % 5;
                migration(
                    &vm.to_string(),
                    &format!("host{source}"),
                    &format!("host{target}"),
                )
            })
            .collect()
    })
}

proptest! {
    #[test]
    fn prop_hosts_never_shared_between_running_tasks(
        plan in arb_plan(),
        finish_per_poll in 1usize..3,
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        let backend = MockCluster::new(vec![]).finishing(finish_per_poll);

        let report = runtime.block_on(async {
            let (_shutdown_tx, mut shutdown) = watch::channel(false);
            executor(true).execute(&plan, &backend, &mut shutdown).await
        }).unwrap();

        prop_assert!(backend.violations().is_empty(), "{:?}", backend.violations());
        prop_assert_eq!(report.submitted, plan.len());
        prop_assert_eq!(report.succeeded.len(), plan.len());
        prop_assert!(report.in_flight.is_empty());
    }
}
