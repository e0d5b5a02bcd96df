//! Resolution of helper resource keys into user-facing text.

use std::collections::HashMap;

pub const ERROR_AUTH_INIT_FAILED: &str = "Error_AuthInitFailed";
pub const ERROR_AUTH_BAD_INPUT: &str = "Error_AuthBadInput";
pub const ERROR_AUTH_NO_INPUT: &str = "Error_AuthNoInput";
pub const ERROR_INPUT_FORMAT_INVALID: &str = "Error_RunAsUser_InputFormatInvalid";
pub const ERROR_MESSAGE_TYPE_INVALID: &str = "Error_RunAsUser_MessageTypeInvalid";

/// Looks up localized text for a resource key.
pub trait MessageCatalog: Send + Sync {
    fn lookup(&self, key: &str) -> Option<String>;

    /// Like [`MessageCatalog::lookup`], falling back to the key itself.
    fn resolve(&self, key: &str) -> String {
        self.lookup(key).unwrap_or_else(|| key.to_string())
    }
}

/// Built-in English text for every key the helper is known to emit.
#[derive(Debug, Clone)]
pub struct DefaultMessages {
    entries: HashMap<&'static str, &'static str>,
}

impl Default for DefaultMessages {
    fn default() -> Self {
        Self {
            entries: HashMap::from([
                (
                    ERROR_AUTH_INIT_FAILED,
                    "authentication helper failed to initialize",
                ),
                (
                    ERROR_AUTH_BAD_INPUT,
                    "authentication helper received a malformed request",
                ),
                (
                    ERROR_AUTH_NO_INPUT,
                    "authentication helper received no username or password",
                ),
                (
                    ERROR_INPUT_FORMAT_INVALID,
                    "the authentication request is not a JSON object",
                ),
                (
                    ERROR_MESSAGE_TYPE_INVALID,
                    "the authentication request has an unknown message type",
                ),
            ]),
        }
    }
}

impl MessageCatalog for DefaultMessages {
    fn lookup(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(|text| (*text).to_string())
    }
}
