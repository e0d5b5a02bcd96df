use std::path::Path;
use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::Command;
use tracing::trace;

use crate::config::BrokerConfig;
use crate::error::BrokerError;
use crate::error::Result;
use crate::process::HelperProcess;

/// Tells the helper to exec the requested program after authenticating and to
/// suppress reply frames, since nobody reads them on that path.
pub const QUIET_FLAG: &str = "-q";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelperMode {
    /// Authenticate and report; the helper exits and replies with one frame.
    Probe,
    /// Authenticate and exec the worker; the helper becomes the caller's process.
    Run,
}

impl HelperMode {
    pub fn args(self) -> &'static [&'static str] {
        match self {
            HelperMode::Probe => &[],
            HelperMode::Run => &[QUIET_FLAG],
        }
    }
}

/// Starts the privileged helper with piped stdio.
#[derive(Debug, Clone)]
pub(crate) struct HelperLauncher {
    helper_path: Option<PathBuf>,
    helper_name: String,
    forward_env: Vec<String>,
}

impl HelperLauncher {
    pub(crate) fn new(config: &BrokerConfig) -> Self {
        Self {
            helper_path: config.helper_path.clone(),
            helper_name: config.helper_name.clone(),
            forward_env: config.forward_env.clone(),
        }
    }

    pub(crate) fn launch(&self, mode: HelperMode) -> Result<HelperProcess> {
        let path = self.resolve_helper_path()?;
        trace!("launching authentication helper {path:?} in {mode:?} mode");

        let mut command = Command::new(&path);
        command.args(mode.args());
        command.env_clear();
        for key in &self.forward_env {
            if let Some(value) = std::env::var_os(key) {
                command.env(key, value);
            }
        }
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        // A probe helper must never outlive the attempt; a run helper belongs to
        // the caller once the request is written.
        command.kill_on_drop(mode == HelperMode::Probe);

        #[cfg(unix)]
        {
            let die_with_parent = mode == HelperMode::Probe;
            let parent_pid = unsafe { libc::getpid() };
            unsafe {
                command.pre_exec(move || {
                    crate::process_group::prepare_helper_child(parent_pid, die_with_parent)
                });
            }
        }

        let child = command.spawn().map_err(|source| BrokerError::Launch {
            path: path.clone(),
            source,
        })?;
        Ok(HelperProcess::new(child, mode))
    }

    /// The configured absolute path, else the helper next to our own executable.
    /// Neither `PATH` nor the working directory is ever consulted.
    pub(crate) fn resolve_helper_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.helper_path {
            return Ok(path.clone());
        }

        let exe = std::env::current_exe().map_err(|source| BrokerError::Launch {
            path: PathBuf::from(&self.helper_name),
            source,
        })?;
        let install_dir = exe.parent().unwrap_or_else(|| Path::new("/"));
        Ok(install_dir.join(&self.helper_name))
    }
}
