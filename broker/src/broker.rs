//! The authentication orchestrator.
//!
//! Every attempt owns one helper process and its pipes. Whatever happens during
//! the attempt (success, a rejected password, a hung or crashing helper, a
//! cancelled caller), the helper is gone by the time the attempt returns,
//! except for the run path where it is handed to the caller as the worker.

use std::collections::BTreeMap;
use std::sync::Arc;

use runas_broker_protocol::AuthRequest;
use runas_broker_protocol::AuthResponse;
use runas_broker_protocol::FrameError;
use runas_broker_protocol::Secret;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::classify::Authenticated;
use crate::classify::classify;
use crate::config::BrokerConfig;
use crate::error::BrokerError;
use crate::error::CredentialSource;
use crate::error::FailureKind;
use crate::error::Result;
use crate::exit_codes::ExitCodeTable;
use crate::exit_codes::HELPER_EXIT_OK;
use crate::launcher::HelperLauncher;
use crate::launcher::HelperMode;
use crate::messages::DefaultMessages;
use crate::messages::MessageCatalog;
use crate::process::HelperProcess;
use crate::process::WorkerProcess;

/// A username and the secret proving it.
#[derive(Debug)]
pub struct Credentials {
    pub username: String,
    pub secret: Secret,
}

impl Credentials {
    pub fn new(username: impl Into<String>, secret: impl Into<Secret>) -> Self {
        Self {
            username: username.into(),
            secret: secret.into(),
        }
    }
}

/// What the helper should exec once the user is authenticated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSpec {
    pub arguments: Vec<String>,
    pub environment: BTreeMap<String, String>,
}

/// Lifecycle of one authentication attempt. The last four states are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    NotStarted,
    Launched,
    RequestSent,
    AwaitingExit,
    Succeeded,
    Failed,
    TimedOut,
    /// Launching, writing to or reading from the helper failed.
    Crashed,
}

impl AttemptState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AttemptState::Succeeded
                | AttemptState::Failed
                | AttemptState::TimedOut
                | AttemptState::Crashed
        )
    }

    fn for_error(err: &BrokerError) -> Self {
        match err.kind() {
            FailureKind::Timeout => AttemptState::TimedOut,
            FailureKind::Launch | FailureKind::Io => AttemptState::Crashed,
            FailureKind::Protocol
            | FailureKind::Credential
            | FailureKind::Execution
            | FailureKind::HelperExit
            | FailureKind::Cancelled
            | FailureKind::Config => AttemptState::Failed,
        }
    }
}

struct Attempt<'a> {
    username: &'a str,
    mode: HelperMode,
    state: AttemptState,
}

impl<'a> Attempt<'a> {
    fn new(username: &'a str, mode: HelperMode) -> Self {
        Self {
            username,
            mode,
            state: AttemptState::NotStarted,
        }
    }

    fn advance(&mut self, next: AttemptState) {
        debug!(
            username = self.username,
            mode = ?self.mode,
            "authentication attempt {:?} -> {next:?}",
            self.state
        );
        self.state = next;
    }
}

/// Result of [`Broker::authenticate_only`].
#[derive(Debug)]
pub struct AuthOutcome {
    state: AttemptState,
    result: Result<Authenticated>,
}

impl AuthOutcome {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }

    /// The profile directory on success, empty otherwise.
    pub fn profile_dir(&self) -> &str {
        self.result
            .as_ref()
            .map_or("", |authenticated| authenticated.profile_dir.as_str())
    }

    /// Authenticated, but the helper reported no profile directory.
    pub fn missing_profile(&self) -> bool {
        self.result
            .as_ref()
            .is_ok_and(Authenticated::missing_profile)
    }

    /// Human-readable reason for a failure. Never contains the secret.
    pub fn diagnostic(&self) -> Option<String> {
        self.result.as_ref().err().map(ToString::to_string)
    }

    pub fn error(&self) -> Option<&BrokerError> {
        self.result.as_ref().err()
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.error().map(BrokerError::kind)
    }

    /// Terminal state the attempt finished in.
    pub fn state(&self) -> AttemptState {
        self.state
    }

    pub fn into_result(self) -> Result<Authenticated> {
        self.result
    }
}

/// Authenticates users through the privileged helper.
pub struct Broker {
    config: BrokerConfig,
    launcher: HelperLauncher,
    exit_codes: Arc<ExitCodeTable>,
    messages: Arc<dyn MessageCatalog>,
}

impl Broker {
    pub fn new(config: BrokerConfig) -> Self {
        let messages: Arc<dyn MessageCatalog> = Arc::new(DefaultMessages::default());
        let exit_codes = Arc::new(ExitCodeTable::from_catalog(messages.as_ref()));
        Self {
            launcher: HelperLauncher::new(&config),
            config,
            exit_codes,
            messages,
        }
    }

    /// Use `messages` for helper resource keys. The exit-code table is left as is;
    /// pair with [`Broker::with_exit_codes`] to localize both.
    pub fn with_messages(mut self, messages: Arc<dyn MessageCatalog>) -> Self {
        self.messages = messages;
        self
    }

    pub fn with_exit_codes(mut self, exit_codes: ExitCodeTable) -> Self {
        self.exit_codes = Arc::new(exit_codes);
        self
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Authenticate `credentials` and have the helper exec the program described
    /// by `target` as that user. Returns as soon as the request is written: the
    /// helper becomes the worker and the caller owns it from here on. Whether the
    /// worker actually started is observed through the worker itself.
    ///
    /// A helper that does not drain the request within `request_write_timeout`
    /// is killed and the attempt fails with [`BrokerError::Timeout`].
    pub async fn authenticate_and_run(
        &self,
        credentials: Credentials,
        target: RunSpec,
    ) -> Result<WorkerProcess> {
        let Credentials { username, secret } = credentials;
        let mut attempt = Attempt::new(&username, HelperMode::Run);

        let mut helper = match self.launcher.launch(HelperMode::Run) {
            Ok(helper) => helper,
            Err(err) => {
                attempt.advance(AttemptState::Crashed);
                error!(username, "failed to start session helper: {err}");
                return Err(err);
            }
        };
        attempt.advance(AttemptState::Launched);

        let request = AuthRequest::Run {
            username: username.clone(),
            secret,
            arguments: target.arguments,
            environment: target.environment,
        };
        let write_timeout = self.config.request_write_timeout;
        let sent = tokio::time::timeout(write_timeout, helper.send_request(request))
            .await
            .unwrap_or(Err(BrokerError::Timeout {
                after: write_timeout,
            }));
        if let Err(err) = sent {
            attempt.advance(AttemptState::for_error(&err));
            error!(username, "failed to send session request: {err}");
            helper.terminate().await;
            return Err(err);
        }
        attempt.advance(AttemptState::RequestSent);

        let worker = helper.into_worker();
        attempt.advance(AttemptState::Succeeded);
        info!(username, pid = worker.id(), "handed off session worker");
        Ok(worker)
    }

    /// Check `credentials` without running anything. Never fails: every error is
    /// folded into the returned [`AuthOutcome`].
    pub async fn authenticate_only(&self, credentials: Credentials) -> AuthOutcome {
        self.authenticate_only_with_cancellation(credentials, CancellationToken::new())
            .await
    }

    /// [`Broker::authenticate_only`], but firing `cancel` kills the helper and
    /// ends the attempt immediately.
    pub async fn authenticate_only_with_cancellation(
        &self,
        credentials: Credentials,
        cancel: CancellationToken,
    ) -> AuthOutcome {
        let Credentials { username, secret } = credentials;
        let mut attempt = Attempt::new(&username, HelperMode::Probe);

        let result = match self.launcher.launch(HelperMode::Probe) {
            Ok(mut helper) => {
                attempt.advance(AttemptState::Launched);
                let request = AuthRequest::Probe {
                    username: username.clone(),
                    secret,
                };
                let result = self
                    .probe(&mut helper, request, &cancel, &mut attempt)
                    .await;
                helper.terminate().await;
                result
            }
            Err(err) => Err(err),
        };

        match &result {
            Ok(authenticated) => {
                attempt.advance(AttemptState::Succeeded);
                if authenticated.missing_profile() {
                    warn!(
                        username,
                        "user authenticated but has no profile directory"
                    );
                } else {
                    info!(username, "user authenticated");
                }
            }
            Err(err) => {
                attempt.advance(AttemptState::for_error(err));
                log_failure(&username, err);
            }
        }

        AuthOutcome {
            state: attempt.state,
            result,
        }
    }

    async fn probe(
        &self,
        helper: &mut HelperProcess,
        request: AuthRequest,
        cancel: &CancellationToken,
        attempt: &mut Attempt<'_>,
    ) -> Result<Authenticated> {
        // Writing the request and waiting for exit share one deadline.
        let probe_timeout = self.config.probe_timeout;
        let deadline = tokio::time::Instant::now() + probe_timeout;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(BrokerError::Cancelled),
            sent = tokio::time::timeout_at(deadline, helper.send_request(request)) => {
                sent.map_err(|_| BrokerError::Timeout { after: probe_timeout })??;
            }
        }
        helper.close_stdin();
        attempt.advance(AttemptState::RequestSent);

        attempt.advance(AttemptState::AwaitingExit);
        let status = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(BrokerError::Cancelled),
            waited = tokio::time::timeout_at(deadline, helper.wait()) => {
                waited.map_err(|_| BrokerError::Timeout { after: probe_timeout })??
            }
        };
        debug!(helper_pid = helper.id(), "authentication helper exited: {status}");

        if status.code() != Some(HELPER_EXIT_OK) {
            return Err(BrokerError::HelperExit {
                code: status.code(),
                message: self.exit_codes.describe(status),
            });
        }

        let reply_timeout = self.config.reply_read_timeout;
        let payload = match tokio::time::timeout(reply_timeout, helper.read_reply()).await {
            Ok(Ok(payload)) => payload,
            Ok(Err(FrameError::Closed)) => {
                // Exit status 0 without a reply is still a failure.
                return Err(BrokerError::HelperExit {
                    code: Some(HELPER_EXIT_OK),
                    message: self.exit_codes.describe_code(HELPER_EXIT_OK),
                });
            }
            Ok(Err(err)) => return Err(err.into()),
            Err(_) => {
                return Err(BrokerError::Timeout {
                    after: reply_timeout,
                });
            }
        };

        classify(
            AuthResponse::decode(&payload),
            self.messages.as_ref(),
            &self.exit_codes,
        )
    }
}

fn log_failure(username: &str, err: &BrokerError) {
    match err {
        BrokerError::Credential {
            origin: CredentialSource::PamInfo | CredentialSource::PamError,
            message,
        } => error!(username, "PAM rejected authentication: {message}"),
        BrokerError::Credential {
            origin: CredentialSource::System,
            message,
        } => error!(username, "system rejected authentication: {message}"),
        BrokerError::Execution {
            resource_key,
            message,
        } => error!(
            username,
            resource_key, "authentication helper failed to run: {message}"
        ),
        BrokerError::Protocol(protocol) => {
            error!(username, "authentication helper protocol error: {protocol}")
        }
        BrokerError::HelperExit { code, message } => {
            error!(username, exit_code = code, "authentication failed: {message}")
        }
        BrokerError::Timeout { after } => error!(
            username,
            "authentication helper timed out after {}ms",
            after.as_millis()
        ),
        BrokerError::Cancelled => info!(username, "authentication cancelled"),
        BrokerError::Launch { .. } | BrokerError::Io { .. } | BrokerError::Config { .. } => {
            error!(username, "authentication failed: {err}")
        }
    }
}
