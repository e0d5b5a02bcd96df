use std::io;
use std::process::ExitStatus;
use std::time::Duration;

use runas_broker_protocol::AuthRequest;
use runas_broker_protocol::FrameError;
use runas_broker_protocol::read_frame;
use runas_broker_protocol::write_frame;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncRead;
use tokio::io::BufReader;
use tokio::process::Child;
use tokio::process::ChildStderr;
use tokio::process::ChildStdin;
use tokio::process::ChildStdout;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::warn;

use crate::error::BrokerError;
use crate::error::Result;
use crate::launcher::HelperMode;
use crate::process_group::kill_process_group;

/// How long cleanup waits for a killed process to be reaped.
const REAP_TIMEOUT: Duration = Duration::from_secs(1);

/// The helper during the handshake. Owned by exactly one attempt.
pub(crate) struct HelperProcess {
    child: Child,
    mode: HelperMode,
    process_group_id: Option<u32>,
    stderr_task: Option<JoinHandle<()>>,
}

impl HelperProcess {
    pub(crate) fn new(mut child: Child, mode: HelperMode) -> Self {
        let process_group_id = child.id();
        // Probe helpers may write diagnostics to stderr; keep the pipe drained so
        // they can never block on it. Run helpers hand stderr to the caller.
        let stderr_task = match mode {
            HelperMode::Probe => child.stderr.take().map(|stderr| {
                tokio::spawn(log_helper_stderr(stderr, process_group_id))
            }),
            HelperMode::Run => None,
        };
        Self {
            child,
            mode,
            process_group_id,
            stderr_task,
        }
    }

    pub(crate) fn id(&self) -> Option<u32> {
        self.process_group_id
    }

    /// Write the request frame. The request, and the secret inside it, is
    /// dropped (and wiped) before this returns.
    pub(crate) async fn send_request(&mut self, request: AuthRequest) -> Result<()> {
        let payload = request.encode()?;
        drop(request);

        let stdin = self.stdin()?;
        write_frame(stdin, &payload).await.map_err(|err| match err {
            FrameError::Io(source) => {
                BrokerError::io("failed to write request to authentication helper", source)
            }
            other => BrokerError::from(other),
        })
    }

    /// Close our end of stdin so the helper sees EOF after the request.
    pub(crate) fn close_stdin(&mut self) {
        drop(self.child.stdin.take());
    }

    pub(crate) async fn wait(&mut self) -> Result<ExitStatus> {
        self.child
            .wait()
            .await
            .map_err(|source| BrokerError::io("failed to wait for authentication helper", source))
    }

    /// Read the single reply frame from stdout.
    pub(crate) async fn read_reply(&mut self) -> std::result::Result<Vec<u8>, FrameError> {
        let stdout = self.child.stdout.as_mut().ok_or_else(|| {
            FrameError::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "helper stdout is not piped",
            ))
        })?;
        read_frame(stdout).await
    }

    /// Kill the helper if it is still running. Safe to call repeatedly; a helper
    /// that already exited is left alone. Failures are logged, never returned.
    pub(crate) async fn terminate(&mut self) {
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
        terminate_child(&mut self.child, self.process_group_id).await;
    }

    /// Hand the running helper to the caller as its worker process.
    pub(crate) fn into_worker(mut self) -> WorkerProcess {
        debug_assert_eq!(self.mode, HelperMode::Run);
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
        WorkerProcess {
            child: self.child,
            process_group_id: self.process_group_id,
        }
    }

    fn stdin(&mut self) -> Result<&mut ChildStdin> {
        self.child.stdin.as_mut().ok_or_else(|| {
            BrokerError::io(
                "failed to write request to authentication helper",
                io::Error::new(io::ErrorKind::BrokenPipe, "helper stdin is closed"),
            )
        })
    }
}

/// A worker started by [`crate::Broker::authenticate_and_run`]. The caller owns
/// it: dropping the handle does not stop the process.
#[derive(Debug)]
pub struct WorkerProcess {
    child: Child,
    process_group_id: Option<u32>,
}

impl WorkerProcess {
    /// OS process id, `None` once the process has been reaped.
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.child.stdin.take()
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    pub fn try_wait(&mut self) -> io::Result<Option<ExitStatus>> {
        self.child.try_wait()
    }

    pub async fn wait(&mut self) -> io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// Kill the worker and everything in its process group, if still running.
    pub async fn terminate(&mut self) {
        terminate_child(&mut self.child, self.process_group_id).await;
    }

    pub fn into_child(self) -> Child {
        self.child
    }
}

async fn terminate_child(child: &mut Child, process_group_id: Option<u32>) {
    match child.try_wait() {
        Ok(Some(_)) => return,
        Ok(None) => {}
        Err(err) => warn!("failed to poll helper process status: {err}"),
    }

    if let Some(pgid) = process_group_id
        && let Err(err) = kill_process_group(pgid)
    {
        debug!("failed to kill helper process group {pgid}: {err}");
    }
    if let Err(err) = child.start_kill() {
        debug!("failed to kill helper process: {err}");
    }

    match tokio::time::timeout(REAP_TIMEOUT, child.wait()).await {
        Ok(Ok(status)) => debug!("helper process terminated: {status}"),
        Ok(Err(err)) => warn!("failed to reap helper process: {err}"),
        Err(_) => warn!(
            "helper process did not exit within {}ms of being killed",
            REAP_TIMEOUT.as_millis()
        ),
    }
}

async fn log_helper_stderr<R>(stderr: R, pid: Option<u32>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => debug!(helper_pid = pid, "helper stderr: {line}"),
            Ok(None) => break,
            Err(err) => {
                debug!(helper_pid = pid, "stopped reading helper stderr: {err}");
                break;
            }
        }
    }
}
