use std::time::Duration;
use std::time::Instant;

use broker_test_support::FakeHelper;
use broker_test_support::process::process_is_alive;
use broker_test_support::process::wait_for_helper_pid;
use pretty_assertions::assert_eq;
use runas_broker::AttemptState;
use runas_broker::Broker;
use runas_broker::BrokerConfig;
use runas_broker::Credentials;
use runas_broker::DefaultMessages;
use runas_broker::ERROR_AUTH_BAD_INPUT;
use runas_broker::ERROR_MESSAGE_TYPE_INVALID;
use runas_broker::FailureKind;
use runas_broker::MessageCatalog;
use runas_broker_protocol::AuthRequest;
use runas_broker_protocol::ReplyTag;
use tokio_util::sync::CancellationToken;
use tracing_test::traced_test;

fn alice() -> Credentials {
    Credentials::new("alice", "hunter2")
}

#[tokio::test]
async fn successful_probe_reports_the_profile_dir() -> anyhow::Result<()> {
    let helper = FakeHelper::builder()
        .reply(ReplyTag::RtvsResult, "/home/alice")
        .build()
        .await?;
    let broker = Broker::new(helper.config());

    let outcome = broker.authenticate_only(alice()).await;

    assert!(outcome.succeeded(), "{:?}", outcome.diagnostic());
    assert_eq!(outcome.profile_dir(), "/home/alice");
    assert!(!outcome.missing_profile());
    assert_eq!(outcome.state(), AttemptState::Succeeded);
    assert_eq!(outcome.diagnostic(), None);
    Ok(())
}

#[tokio::test]
async fn probe_sends_an_auth_only_request_without_arguments() -> anyhow::Result<()> {
    let helper = FakeHelper::builder()
        .reply(ReplyTag::RtvsResult, "/home/alice")
        .build()
        .await?;
    let broker = Broker::new(helper.config());

    broker.authenticate_only(alice()).await;

    assert_eq!(helper.recorded_args()?, Vec::<String>::new());
    match helper.recorded_request().await? {
        AuthRequest::Probe { username, secret } => {
            assert_eq!(username, "alice");
            assert_eq!(secret.expose(), "hunter2");
        }
        other => panic!("expected a probe request, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn empty_profile_dir_succeeds_with_a_warning() -> anyhow::Result<()> {
    let helper = FakeHelper::builder()
        .reply(ReplyTag::RtvsResult, "")
        .build()
        .await?;
    let broker = Broker::new(helper.config());

    let outcome = broker.authenticate_only(alice()).await;

    assert!(outcome.succeeded(), "{:?}", outcome.diagnostic());
    assert!(outcome.missing_profile());
    assert_eq!(outcome.profile_dir(), "");
    assert!(logs_contain("no profile directory"));
    assert!(!logs_contain("hunter2"));
    Ok(())
}

#[tokio::test]
async fn pam_replies_never_authenticate() -> anyhow::Result<()> {
    for (tag, payload) in [
        (ReplyTag::PamInfo, "/home/alice"),
        (ReplyTag::PamInfo, ""),
        (ReplyTag::PamError, "Authentication failure"),
        (ReplyTag::PamError, ""),
    ] {
        let helper = FakeHelper::builder().reply(tag, payload).build().await?;
        let broker = Broker::new(helper.config());

        let outcome = broker.authenticate_only(alice()).await;

        assert!(!outcome.succeeded(), "{tag:?} {payload:?}");
        assert_eq!(outcome.failure_kind(), Some(FailureKind::Credential));
        assert_eq!(outcome.profile_dir(), "");
        assert_eq!(outcome.state(), AttemptState::Failed);
    }
    Ok(())
}

#[tokio::test]
async fn unknown_user_is_reported_verbatim() -> anyhow::Result<()> {
    let helper = FakeHelper::builder()
        .reply(ReplyTag::UnixError, "no such user")
        .build()
        .await?;
    let broker = Broker::new(helper.config());

    let outcome = broker.authenticate_only(alice()).await;

    assert_eq!(outcome.failure_kind(), Some(FailureKind::Credential));
    let diagnostic = outcome.diagnostic().unwrap_or_default();
    assert!(diagnostic.contains("no such user"), "{diagnostic}");
    Ok(())
}

#[tokio::test]
async fn malformed_replies_fail_with_a_protocol_error() -> anyhow::Result<()> {
    for payload in [
        b"not json".to_vec(),
        br#"["rtvs-result"]"#.to_vec(),
        br#"["rtvs-everything-is-fine", "/home/alice"]"#.to_vec(),
        br#"{"tag": "rtvs-result"}"#.to_vec(),
    ] {
        let helper = FakeHelper::builder().raw_reply(payload).build().await?;
        let broker = Broker::new(helper.config());

        let outcome = broker.authenticate_only(alice()).await;

        assert!(!outcome.succeeded());
        assert_eq!(outcome.failure_kind(), Some(FailureKind::Protocol));
    }
    Ok(())
}

#[tokio::test]
async fn helper_side_errors_resolve_resource_keys() -> anyhow::Result<()> {
    let helper = FakeHelper::builder()
        .reply(ReplyTag::RtvsError, ERROR_MESSAGE_TYPE_INVALID)
        .build()
        .await?;
    let broker = Broker::new(helper.config());

    let outcome = broker.authenticate_only(alice()).await;

    assert_eq!(outcome.failure_kind(), Some(FailureKind::Execution));
    let expected = DefaultMessages::default().resolve(ERROR_MESSAGE_TYPE_INVALID);
    let diagnostic = outcome.diagnostic().unwrap_or_default();
    assert!(diagnostic.contains(&expected), "{diagnostic}");
    Ok(())
}

#[tokio::test]
async fn well_known_exit_codes_are_described() -> anyhow::Result<()> {
    let helper = FakeHelper::builder().exit_code(201).build().await?;
    let broker = Broker::new(helper.config());

    let outcome = broker.authenticate_only(alice()).await;

    assert_eq!(outcome.failure_kind(), Some(FailureKind::HelperExit));
    assert_eq!(
        outcome.diagnostic(),
        Some(DefaultMessages::default().resolve(ERROR_AUTH_BAD_INPUT))
    );
    Ok(())
}

#[tokio::test]
async fn unmapped_exit_codes_are_reported_by_number() -> anyhow::Result<()> {
    let helper = FakeHelper::builder()
        .reply(ReplyTag::RtvsResult, "/home/alice")
        .exit_code(77)
        .build()
        .await?;
    let broker = Broker::new(helper.config());

    let outcome = broker.authenticate_only(alice()).await;

    assert!(!outcome.succeeded());
    assert_eq!(outcome.failure_kind(), Some(FailureKind::HelperExit));
    assert_eq!(outcome.diagnostic().as_deref(), Some("77"));
    Ok(())
}

#[tokio::test]
async fn clean_exit_without_a_reply_fails() -> anyhow::Result<()> {
    let helper = FakeHelper::builder().build().await?;
    let broker = Broker::new(helper.config());

    let outcome = broker.authenticate_only(alice()).await;

    assert!(!outcome.succeeded());
    assert_eq!(outcome.failure_kind(), Some(FailureKind::HelperExit));
    assert_eq!(outcome.diagnostic().as_deref(), Some("0"));
    Ok(())
}

#[tokio::test]
async fn hung_helper_is_killed_at_the_deadline() -> anyhow::Result<()> {
    let helper = FakeHelper::builder().hang().build().await?;
    let mut config = helper.config();
    config.probe_timeout = Duration::from_millis(300);
    let broker = Broker::new(config);

    let started = Instant::now();
    let outcome = broker.authenticate_only(alice()).await;
    let elapsed = started.elapsed();

    assert_eq!(outcome.failure_kind(), Some(FailureKind::Timeout));
    assert_eq!(outcome.state(), AttemptState::TimedOut);
    assert!(elapsed >= Duration::from_millis(300), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(1_800), "{elapsed:?}");

    let pid = wait_for_helper_pid(&helper.pid_file()).await?;
    assert!(!process_is_alive(pid)?, "helper {pid} survived the timeout");
    Ok(())
}

#[tokio::test]
async fn cancellation_kills_the_helper() -> anyhow::Result<()> {
    let helper = FakeHelper::builder().hang().build().await?;
    let broker = Broker::new(helper.config());
    let cancel = CancellationToken::new();

    let canceller = {
        let cancel = cancel.clone();
        let pid_file = helper.pid_file();
        tokio::spawn(async move {
            let pid = wait_for_helper_pid(&pid_file).await;
            cancel.cancel();
            pid
        })
    };

    let started = Instant::now();
    let outcome = broker
        .authenticate_only_with_cancellation(alice(), cancel)
        .await;

    assert_eq!(outcome.failure_kind(), Some(FailureKind::Cancelled));
    assert!(started.elapsed() < Duration::from_millis(1_800));

    let pid = canceller.await??;
    assert!(!process_is_alive(pid)?, "helper {pid} survived cancellation");
    Ok(())
}

#[tokio::test]
async fn sequential_probes_leave_no_helpers_behind() -> anyhow::Result<()> {
    let helper = FakeHelper::builder()
        .reply(ReplyTag::RtvsResult, "/home/alice")
        .build()
        .await?;
    let broker = Broker::new(helper.config());

    for _ in 0..2 {
        let outcome = broker.authenticate_only(alice()).await;
        assert!(outcome.succeeded(), "{:?}", outcome.diagnostic());

        let pid = wait_for_helper_pid(&helper.pid_file()).await?;
        assert!(!process_is_alive(pid)?, "helper {pid} outlived its attempt");
    }
    Ok(())
}

#[tokio::test]
async fn missing_helper_fails_to_launch() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let broker = Broker::new(BrokerConfig::with_helper_path(
        dir.path().join("runas-helper"),
    ));

    let outcome = broker.authenticate_only(alice()).await;

    assert_eq!(outcome.failure_kind(), Some(FailureKind::Launch));
    assert_eq!(outcome.state(), AttemptState::Crashed);
    Ok(())
}

#[tokio::test]
async fn truncated_reply_frame_is_a_protocol_failure() -> anyhow::Result<()> {
    // The prefix announces 100 bytes but only 10 follow.
    let mut frame = 100u32.to_le_bytes().to_vec();
    frame.extend_from_slice(br#"["rtvs-res"#);
    let helper = FakeHelper::builder().raw_frame(frame).build().await?;
    let broker = Broker::new(helper.config());

    let outcome = broker.authenticate_only(alice()).await;

    assert!(!outcome.succeeded());
    assert_eq!(outcome.failure_kind(), Some(FailureKind::Protocol));
    assert_eq!(outcome.profile_dir(), "");

    let pid = wait_for_helper_pid(&helper.pid_file()).await?;
    assert!(!process_is_alive(pid)?, "helper {pid} outlived its attempt");
    Ok(())
}

#[tokio::test]
async fn slow_request_write_counts_against_the_exit_deadline() -> anyhow::Result<()> {
    // The helper only starts draining the request after most of the deadline
    // has passed, then never exits.
    let helper = FakeHelper::builder()
        .read_delay(Duration::from_millis(800))
        .hang()
        .build()
        .await?;
    let mut config = helper.config();
    config.probe_timeout = Duration::from_millis(1_000);
    let broker = Broker::new(config);
    let credentials = Credentials::new("a".repeat(200_000), "hunter2");

    let started = Instant::now();
    let outcome = broker.authenticate_only(credentials).await;
    let elapsed = started.elapsed();

    assert_eq!(outcome.failure_kind(), Some(FailureKind::Timeout));
    assert!(elapsed >= Duration::from_millis(1_000), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(1_500), "{elapsed:?}");
    Ok(())
}
