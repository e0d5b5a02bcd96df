//! Authenticates local users through a privileged helper process and, on
//! request, starts a worker running as the authenticated user.
//!
//! The broker itself never touches PAM. Each attempt spawns `runas-helper`,
//! hands it one request frame over stdin and either reads one reply frame back
//! ([`Broker::authenticate_only`]) or gives the running helper to the caller as
//! a [`WorkerProcess`] ([`Broker::authenticate_and_run`]).

mod broker;
mod classify;
mod config;
mod error;
mod exit_codes;
mod launcher;
mod messages;
mod process;
mod process_group;

pub use broker::AttemptState;
pub use broker::AuthOutcome;
pub use broker::Broker;
pub use broker::Credentials;
pub use broker::RunSpec;
pub use classify::Authenticated;
pub use classify::classify;
pub use config::BrokerConfig;
pub use config::BrokerConfigToml;
pub use config::DEFAULT_FORWARD_ENV;
pub use config::DEFAULT_HELPER_NAME;
pub use config::DEFAULT_PROBE_TIMEOUT;
pub use config::DEFAULT_REPLY_READ_TIMEOUT;
pub use config::DEFAULT_REQUEST_WRITE_TIMEOUT;
pub use error::BrokerError;
pub use error::CredentialSource;
pub use error::FailureKind;
pub use error::Result;
pub use exit_codes::ExitCodeTable;
pub use exit_codes::HELPER_EXIT_BAD_INPUT;
pub use exit_codes::HELPER_EXIT_INIT_FAILED;
pub use exit_codes::HELPER_EXIT_NO_INPUT;
pub use exit_codes::HELPER_EXIT_OK;
pub use launcher::HelperMode;
pub use launcher::QUIET_FLAG;
pub use messages::DefaultMessages;
pub use messages::ERROR_AUTH_BAD_INPUT;
pub use messages::ERROR_AUTH_INIT_FAILED;
pub use messages::ERROR_AUTH_NO_INPUT;
pub use messages::ERROR_INPUT_FORMAT_INVALID;
pub use messages::ERROR_MESSAGE_TYPE_INVALID;
pub use messages::MessageCatalog;
pub use process::WorkerProcess;
pub use runas_broker_protocol::Secret;
