//! Integration tests for total update with busy-retry, on a paused clock.

mod common;

use common::{memory_node, scripted_node, suffix, ScriptedDirectory};
use dirtopo_directory::Dn;
use dirtopo_repl::{
    establish_agreement, start_replication, AgreementOptions, DirectoryNode, PollConfig,
    ReplicaRole, ReplicaSetup, ReplicationOutcome, RetryPolicy, TopologyEngine,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const BUSY: &str = "-2 Total update aborted: Replication session aborted: replica busy";
const DONE: &str = "0 Total update succeeded";

async fn agreement_on(dir: ScriptedDirectory) -> (Arc<ScriptedDirectory>, DirectoryNode, Dn) {
    let (dir, supplier) = scripted_node("m1", dir);
    let (_, consumer) = memory_node("c1", 389);
    let engine = TopologyEngine::default();
    let suffix = suffix();
    engine
        .setup_replica(&supplier, &ReplicaSetup::new(suffix.clone(), ReplicaRole::Master))
        .await
        .unwrap();
    engine
        .setup_replica(&consumer, &ReplicaSetup::new(suffix.clone(), ReplicaRole::Leaf))
        .await
        .unwrap();
    let outcome = establish_agreement(
        &supplier,
        &consumer,
        &suffix,
        &AgreementOptions::default(),
        &PollConfig::entry(),
        &CancellationToken::new(),
    )
    .await
    .unwrap();
    (dir, supplier, outcome.dn().clone())
}

fn init_poll() -> PollConfig {
    PollConfig::init()
        .with_interval(Duration::from_secs(1))
        .with_timeout(Duration::from_secs(30))
}

#[tokio::test(start_paused = true)]
async fn test_busy_consumer_is_retried_until_success() {
    let scripted = ScriptedDirectory::new("m1").with_init_statuses([BUSY, BUSY, DONE]);
    let (dir, supplier, agreement) = agreement_on(scripted).await;

    let outcome = start_replication(
        &supplier,
        &agreement,
        &RetryPolicy::fixed(5, Duration::from_secs(1)),
        &init_poll(),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(outcome, ReplicationOutcome::Succeeded { attempts: 3 });
    assert_eq!(dir.init_polls.load(Ordering::SeqCst), 3);
    // the first begin plus two restarts
    assert_eq!(dir.begins.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_busy_retries_are_bounded() {
    let scripted = ScriptedDirectory::new("m1").with_init_statuses([BUSY, BUSY, BUSY, DONE]);
    let (dir, supplier, agreement) = agreement_on(scripted).await;

    let outcome = start_replication(
        &supplier,
        &agreement,
        &RetryPolicy::fixed(3, Duration::from_secs(1)),
        &init_poll(),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(outcome, ReplicationOutcome::BusyExhausted { attempts: 3 });
    assert!(!outcome.succeeded());
    assert_eq!(dir.begins.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_failure_is_not_retried() {
    let scripted =
        ScriptedDirectory::new("m1").with_init_statuses(["-11 Total update aborted: connection error", DONE]);
    let (dir, supplier, agreement) = agreement_on(scripted).await;

    let outcome = start_replication(
        &supplier,
        &agreement,
        &RetryPolicy::fixed(5, Duration::from_secs(1)),
        &init_poll(),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(
        outcome,
        ReplicationOutcome::Failed {
            status: Some("-11 Total update aborted: connection error".to_string()),
            attempts: 1,
        }
    );
    assert_eq!(dir.begins.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_silent_consumer_times_out() {
    let (dir, supplier, agreement) = agreement_on(ScriptedDirectory::new("m1")).await;
    let started = tokio::time::Instant::now();

    let outcome = start_replication(
        &supplier,
        &agreement,
        &RetryPolicy::fixed(5, Duration::from_secs(1)),
        &init_poll().with_timeout(Duration::from_secs(10)),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    match outcome {
        ReplicationOutcome::TimedOut { attempts, elapsed } => {
            assert_eq!(attempts, 1);
            assert!(elapsed >= Duration::from_secs(10));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(started.elapsed() < Duration::from_secs(12));
    assert!(dir.init_polls.load(Ordering::SeqCst) >= 9);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_backoff() {
    let scripted = ScriptedDirectory::new("m1").with_init_statuses([BUSY, DONE]);
    let (dir, supplier, agreement) = agreement_on(scripted).await;
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        trigger.cancel();
    });

    let outcome = start_replication(
        &supplier,
        &agreement,
        &RetryPolicy::fixed(5, Duration::from_secs(60)),
        &init_poll(),
        &cancel,
    )
    .await
    .unwrap();

    assert_eq!(outcome, ReplicationOutcome::Cancelled { attempts: 1 });
    assert_eq!(dir.begins.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_engine_uses_configured_attempts() {
    let scripted = ScriptedDirectory::new("m1").with_init_statuses([BUSY, BUSY, DONE]);
    let (_, supplier, agreement) = agreement_on(scripted).await;
    let engine = TopologyEngine::new(dirtopo_repl::EngineConfig {
        max_init_attempts: 2,
        ..Default::default()
    });

    let outcome = engine.start_replication(&supplier, &agreement).await.unwrap();
    assert_eq!(outcome, ReplicationOutcome::BusyExhausted { attempts: 2 });
}
