use std::io;
use std::path::PathBuf;
use std::time::Duration;

use runas_broker_protocol::FrameError;
use runas_broker_protocol::ProtocolError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, BrokerError>;

/// Coarse failure category, stable enough for a UI to branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    Launch,
    Protocol,
    Timeout,
    /// PAM or the OS rejected the user: wrong password, unknown user, expired account.
    Credential,
    /// The user authenticated but the helper could not start the requested session.
    Execution,
    /// The helper exited non-zero, or with status 0 but no reply.
    HelperExit,
    Cancelled,
    Io,
    Config,
}

/// Which part of the helper rejected the credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    PamInfo,
    PamError,
    System,
}

impl std::fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CredentialSource::PamInfo | CredentialSource::PamError => f.write_str("PAM"),
            CredentialSource::System => f.write_str("system"),
        }
    }
}

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("failed to launch authentication helper {}: {source}", .path.display())]
    Launch {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("authentication helper did not respond within {}ms", .after.as_millis())]
    Timeout { after: Duration },
    #[error("{origin} authentication error: {message}")]
    Credential {
        origin: CredentialSource,
        message: String,
    },
    #[error("authenticated, but the session could not be started: {message}")]
    Execution {
        resource_key: String,
        message: String,
    },
    // Callers display this verbatim, so it carries only the exit-code message.
    #[error("{message}")]
    HelperExit { code: Option<i32>, message: String },
    #[error("authentication was cancelled")]
    Cancelled,
    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("{message}")]
    Config { message: String },
}

impl BrokerError {
    pub fn kind(&self) -> FailureKind {
        match self {
            BrokerError::Launch { .. } => FailureKind::Launch,
            BrokerError::Protocol(_) => FailureKind::Protocol,
            BrokerError::Timeout { .. } => FailureKind::Timeout,
            BrokerError::Credential { .. } => FailureKind::Credential,
            BrokerError::Execution { .. } => FailureKind::Execution,
            BrokerError::HelperExit { .. } => FailureKind::HelperExit,
            BrokerError::Cancelled => FailureKind::Cancelled,
            BrokerError::Io { .. } => FailureKind::Io,
            BrokerError::Config { .. } => FailureKind::Config,
        }
    }

    pub(crate) fn config(message: String) -> Self {
        Self::Config { message }
    }

    pub(crate) fn io(context: &'static str, source: io::Error) -> Self {
        Self::Io { context, source }
    }
}

impl From<FrameError> for BrokerError {
    fn from(err: FrameError) -> Self {
        Self::Protocol(ProtocolError::Frame(err))
    }
}
