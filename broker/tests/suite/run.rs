use std::collections::BTreeMap;
use std::time::Duration;
use std::time::Instant;

use broker_test_support::FakeHelper;
use broker_test_support::process::process_is_alive;
use broker_test_support::process::wait_for_helper_pid;
use pretty_assertions::assert_eq;
use runas_broker::Broker;
use runas_broker::BrokerConfig;
use runas_broker::BrokerError;
use runas_broker::Credentials;
use runas_broker::FailureKind;
use runas_broker::RunSpec;
use runas_broker_protocol::AuthRequest;

/// A request far larger than a pipe buffer, so writing it blocks until the
/// helper reads.
fn oversized_environment() -> RunSpec {
    RunSpec {
        arguments: vec!["/usr/bin/env".to_string()],
        environment: BTreeMap::from([("BIG".to_string(), "x".repeat(200_000))]),
    }
}

fn notepad() -> RunSpec {
    RunSpec {
        arguments: vec!["/usr/bin/env".to_string(), "--debug=ü".to_string()],
        environment: BTreeMap::from([
            ("HOME".to_string(), "/home/alice".to_string()),
            ("OPTS".to_string(), "a=b".to_string()),
        ]),
    }
}

#[tokio::test]
async fn run_hands_back_a_live_worker() -> anyhow::Result<()> {
    let helper = FakeHelper::builder().build().await?;
    let broker = Broker::new(helper.config());

    let mut worker = broker
        .authenticate_and_run(Credentials::new("alice", "hunter2"), notepad())
        .await?;

    // The fake helper keeps reading stdin until the caller closes it.
    assert_eq!(worker.try_wait()?, None);
    assert!(worker.id().is_some());

    drop(worker.take_stdin());
    let status = tokio::time::timeout(Duration::from_secs(5), worker.wait()).await??;
    assert!(status.success(), "{status}");
    Ok(())
}

#[tokio::test]
async fn run_passes_the_quiet_flag_and_the_full_request() -> anyhow::Result<()> {
    let helper = FakeHelper::builder().build().await?;
    let broker = Broker::new(helper.config());

    let mut worker = broker
        .authenticate_and_run(Credentials::new("alice", "hunter2"), notepad())
        .await?;
    drop(worker.take_stdin());
    tokio::time::timeout(Duration::from_secs(5), worker.wait()).await??;

    assert_eq!(helper.recorded_args()?, vec!["-q".to_string()]);
    match helper.recorded_request().await? {
        AuthRequest::Run {
            username,
            secret,
            arguments,
            environment,
        } => {
            let expected = notepad();
            assert_eq!(username, "alice");
            assert_eq!(secret.expose(), "hunter2");
            assert_eq!(arguments, expected.arguments);
            assert_eq!(environment, expected.environment);
        }
        other => panic!("expected a run request, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn terminating_the_worker_stops_it() -> anyhow::Result<()> {
    let helper = FakeHelper::builder().build().await?;
    let broker = Broker::new(helper.config());

    let mut worker = broker
        .authenticate_and_run(Credentials::new("alice", "hunter2"), RunSpec::default())
        .await?;
    let pid = wait_for_helper_pid(&helper.pid_file()).await?;

    worker.terminate().await;

    assert!(!process_is_alive(pid)?, "worker {pid} is still running");
    Ok(())
}

#[tokio::test]
async fn missing_helper_is_a_launch_error() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let broker = Broker::new(BrokerConfig::with_helper_path(
        dir.path().join("runas-helper"),
    ));

    let result = broker
        .authenticate_and_run(Credentials::new("alice", "hunter2"), RunSpec::default())
        .await;

    assert!(
        matches!(result, Err(BrokerError::Launch { .. })),
        "unexpected result: {result:?}"
    );
    Ok(())
}

#[tokio::test]
async fn helper_that_never_reads_its_request_is_killed() -> anyhow::Result<()> {
    let helper = FakeHelper::builder().ignore_stdin().hang().build().await?;
    let mut config = helper.config();
    config.request_write_timeout = Duration::from_millis(300);
    let broker = Broker::new(config);

    let started = Instant::now();
    let result = tokio::time::timeout(
        Duration::from_secs(5),
        broker.authenticate_and_run(Credentials::new("alice", "hunter2"), oversized_environment()),
    )
    .await?;
    let elapsed = started.elapsed();

    match result {
        Err(err) => assert_eq!(err.kind(), FailureKind::Timeout),
        Ok(worker) => panic!("expected a write timeout, got worker {worker:?}"),
    }
    assert!(elapsed < Duration::from_millis(1_800), "{elapsed:?}");

    let pid = wait_for_helper_pid(&helper.pid_file()).await?;
    assert!(!process_is_alive(pid)?, "helper {pid} survived the write timeout");
    Ok(())
}

#[tokio::test]
async fn helper_exiting_before_reading_fails_the_run() -> anyhow::Result<()> {
    let helper = FakeHelper::builder().ignore_stdin().build().await?;
    let broker = Broker::new(helper.config());

    let result = broker
        .authenticate_and_run(Credentials::new("alice", "hunter2"), oversized_environment())
        .await;

    assert!(
        matches!(result, Err(BrokerError::Io { .. })),
        "unexpected result: {result:?}"
    );
    let pid = wait_for_helper_pid(&helper.pid_file()).await?;
    assert!(!process_is_alive(pid)?, "helper {pid} was not reaped");
    Ok(())
}
