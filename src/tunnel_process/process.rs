use log::{debug, info, warn};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{Child, ChildStderr, ChildStdout, Command};

use super::invocation::TunnelInvocation;
use crate::error_handling::types::{ForwardError, ProcessError};

/// Owned handle to one forwarding subprocess.
///
/// The child is killed if the handle is dropped while it is still running.
#[derive(Debug)]
pub struct TunnelProcess {
    child: Child,
    pid: Option<u32>,
    program: String,
}

impl TunnelProcess {
    /// Launches `invocation` with the inherited environment, stdin discarded and
    /// both output streams piped.
    pub fn spawn(invocation: &TunnelInvocation) -> Result<Self, ForwardError> {
        debug!("Spawning forward process: {}", invocation.command_line());

        let child = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                let binary_missing = e.kind() == std::io::ErrorKind::NotFound;
                warn!("Failed to spawn '{}': {}", invocation.program, e);
                ForwardError::SpawnFailed {
                    program: invocation.program.clone(),
                    reason: e.to_string(),
                    binary_missing,
                }
            })?;

        let pid = child.id();
        info!("Spawned '{}' with pid {:?}", invocation.program, pid);
        Ok(Self {
            child,
            pid,
            program: invocation.program.clone(),
        })
    }

    /// OS process id captured at spawn time.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Hands the output pipes to the caller; subsequent calls return `None`.
    pub fn take_output(&mut self) -> (Option<ChildStdout>, Option<ChildStderr>) {
        (self.child.stdout.take(), self.child.stderr.take())
    }

    /// Waits for the process to exit on its own.
    pub async fn wait(&mut self) -> Result<ExitStatus, ProcessError> {
        self.child.wait().await.map_err(ProcessError::WaitFailed)
    }

    /// Graceful stop: SIGTERM, wait up to `grace`, then SIGKILL.
    ///
    /// Returns once the process is confirmed gone. Calling it on a process that
    /// already exited just returns the recorded status.
    pub async fn terminate(&mut self, grace: Duration) -> Result<ExitStatus, ProcessError> {
        if let Some(status) = self.child.try_wait().map_err(ProcessError::WaitFailed)? {
            debug!("'{}' ({:?}) already exited: {}", self.program, self.pid, status);
            return Ok(status);
        }

        self.send_terminate()?;

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(result) => {
                let status = result.map_err(ProcessError::WaitFailed)?;
                debug!("'{}' ({:?}) exited after SIGTERM: {}", self.program, self.pid, status);
                Ok(status)
            }
            Err(_) => {
                warn!(
                    "'{}' ({:?}) did not exit within {}ms of SIGTERM, killing",
                    self.program,
                    self.pid,
                    grace.as_millis()
                );
                self.child.kill().await.map_err(ProcessError::KillFailed)?;
                self.child.wait().await.map_err(ProcessError::WaitFailed)
            }
        }
    }

    #[cfg(unix)]
    fn send_terminate(&mut self) -> Result<(), ProcessError> {
        use nix::errno::Errno;
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let Some(pid) = self.pid else {
            return Ok(());
        };
        match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            Ok(()) => Ok(()),
            // Exited between try_wait and the signal; the wait below reaps it.
            Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(ProcessError::SignalFailed(e)),
        }
    }

    #[cfg(not(unix))]
    fn send_terminate(&mut self) -> Result<(), ProcessError> {
        self.child.start_kill().map_err(ProcessError::KillFailed)
    }
}
