use std::collections::HashMap;
use std::process::ExitStatus;

use crate::messages::ERROR_AUTH_BAD_INPUT;
use crate::messages::ERROR_AUTH_INIT_FAILED;
use crate::messages::ERROR_AUTH_NO_INPUT;
use crate::messages::MessageCatalog;

pub const HELPER_EXIT_OK: i32 = 0;
pub const HELPER_EXIT_INIT_FAILED: i32 = 200;
pub const HELPER_EXIT_BAD_INPUT: i32 = 201;
pub const HELPER_EXIT_NO_INPUT: i32 = 202;

/// Maps helper exit codes to diagnostics. Built once and handed to the
/// [`crate::Broker`]; codes without an entry are reported by number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitCodeTable {
    entries: HashMap<i32, String>,
}

impl ExitCodeTable {
    pub fn new(entries: HashMap<i32, String>) -> Self {
        Self { entries }
    }

    /// The helper's well-known codes, with text from `catalog`.
    pub fn from_catalog(catalog: &dyn MessageCatalog) -> Self {
        Self::new(HashMap::from([
            (HELPER_EXIT_INIT_FAILED, catalog.resolve(ERROR_AUTH_INIT_FAILED)),
            (HELPER_EXIT_BAD_INPUT, catalog.resolve(ERROR_AUTH_BAD_INPUT)),
            (HELPER_EXIT_NO_INPUT, catalog.resolve(ERROR_AUTH_NO_INPUT)),
        ]))
    }

    pub fn lookup(&self, code: i32) -> Option<&str> {
        self.entries.get(&code).map(String::as_str)
    }

    pub fn describe_code(&self, code: i32) -> String {
        self.lookup(code)
            .map_or_else(|| code.to_string(), str::to_string)
    }

    /// Describe how the helper exited. A helper killed by a signal has no code.
    pub fn describe(&self, status: ExitStatus) -> String {
        if let Some(code) = status.code() {
            return self.describe_code(code);
        }

        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return format!("terminated by signal {signal}");
            }
        }

        status.to_string()
    }
}

impl Default for ExitCodeTable {
    fn default() -> Self {
        Self::from_catalog(&crate::messages::DefaultMessages::default())
    }
}
