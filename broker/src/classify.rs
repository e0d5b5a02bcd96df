//! Maps a decoded helper reply onto the broker's outcome space.

use runas_broker_protocol::AuthResponse;
use runas_broker_protocol::ProtocolError;

use crate::error::BrokerError;
use crate::error::CredentialSource;
use crate::error::Result;
use crate::exit_codes::ExitCodeTable;
use crate::messages::MessageCatalog;

/// A successful authenticate-only attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authenticated {
    /// The user's profile (home) directory as reported by the helper.
    pub profile_dir: String,
}

impl Authenticated {
    /// The user authenticated but has no provisioned profile directory yet.
    /// Callers decide whether that is good enough to proceed.
    pub fn missing_profile(&self) -> bool {
        self.profile_dir.is_empty()
    }
}

/// Only [`AuthResponse::Result`] authenticates; every other reply is a failure
/// of a specific kind.
pub fn classify(
    response: AuthResponse,
    messages: &dyn MessageCatalog,
    exit_codes: &ExitCodeTable,
) -> Result<Authenticated> {
    match response {
        AuthResponse::Result(profile_dir) => Ok(Authenticated { profile_dir }),
        AuthResponse::PamInfo(message) => Err(BrokerError::Credential {
            origin: CredentialSource::PamInfo,
            message,
        }),
        AuthResponse::PamError(message) => Err(BrokerError::Credential {
            origin: CredentialSource::PamError,
            message,
        }),
        AuthResponse::SysError(message) => Err(BrokerError::Credential {
            origin: CredentialSource::System,
            message,
        }),
        AuthResponse::JsonError(message) => {
            Err(ProtocolError::RequestRejected(message).into())
        }
        AuthResponse::ExecError(resource_key) => {
            // The helper reports "no input" as its bare exit code.
            let message = match resource_key.parse::<i32>() {
                Ok(code) => exit_codes
                    .lookup(code)
                    .map_or_else(|| messages.resolve(&resource_key), str::to_string),
                Err(_) => messages.resolve(&resource_key),
            };
            Err(BrokerError::Execution {
                resource_key,
                message,
            })
        }
        AuthResponse::Invalid(reason) => Err(ProtocolError::InvalidResponse(reason).into()),
    }
}
