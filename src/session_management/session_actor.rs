use log::{debug, error, warn};
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use super::events::AdvisoryKind;
use super::session::SessionView;
use super::supervisor::Supervisor;
use crate::configuration::types::TunnelSpec;
use crate::error_handling::types::{FailureKind, ForwardError, ProcessError, TunnelFailure};
use crate::output_classifier::{classify, LineOutcome, OutputLine, OutputStream};
use crate::tunnel_process::TunnelProcess;

/// How long buffered output is still read after the process exited.
const EXIT_DRAIN: Duration = Duration::from_millis(250);

pub(crate) type ReadySender = oneshot::Sender<Result<SessionView, ForwardError>>;

/// Requests served by a session actor.
#[derive(Debug)]
pub(crate) enum SessionCommand {
    /// Terminate the process and report how it ended. Sent only after the
    /// session was marked Stopped.
    Stop {
        reply: oneshot::Sender<Result<ExitStatus, ProcessError>>,
    },
}

enum Outcome {
    Failed {
        advisory: AdvisoryKind,
        message: String,
        error: ForwardError,
    },
    Exited(ExitStatus),
    Stop(oneshot::Sender<Result<ExitStatus, ProcessError>>),
}

/// Task owning one forwarding subprocess.
///
/// Every process-driven transition of the session originates here; the
/// supervisor decides whether it still applies.
pub(crate) struct SessionActor {
    id: Uuid,
    spec: TunnelSpec,
    process: TunnelProcess,
    supervisor: Arc<Supervisor>,
    commands: mpsc::Receiver<SessionCommand>,
    lines: mpsc::Receiver<OutputLine>,
    ready: Option<ReadySender>,
}

impl SessionActor {
    pub(crate) fn new(
        id: Uuid,
        spec: TunnelSpec,
        process: TunnelProcess,
        supervisor: Arc<Supervisor>,
        commands: mpsc::Receiver<SessionCommand>,
        lines: mpsc::Receiver<OutputLine>,
        ready: ReadySender,
    ) -> Self {
        Self {
            id,
            spec,
            process,
            supervisor,
            commands,
            lines,
            ready: Some(ready),
        }
    }

    pub(crate) async fn run(mut self) {
        let deadline = tokio::time::sleep(self.supervisor.settings.connect_timeout);
        tokio::pin!(deadline);
        let mut lines_open = true;

        let outcome = loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(SessionCommand::Stop { reply }) => break Outcome::Stop(reply),
                    None => {
                        warn!("[{}] Control channel closed, terminating", self.id);
                        self.terminate().await;
                        return;
                    }
                },
                line = self.lines.recv(), if lines_open => match line {
                    Some(line) => {
                        if let Some(outcome) = self.handle_line(line) {
                            break outcome;
                        }
                    }
                    None => lines_open = false,
                },
                status = self.process.wait() => match status {
                    Ok(status) => match self.drain_after_exit().await {
                        Some(outcome) => break outcome,
                        None => break Outcome::Exited(status),
                    },
                    Err(e) => break self.failure(FailureKind::ForwardFailed, e.to_string()),
                },
                _ = &mut deadline, if self.ready.is_some() => {
                    let after = self.supervisor.settings.connect_timeout;
                    break Outcome::Failed {
                        advisory: AdvisoryKind::Timeout,
                        message: format!("not established within {:?}", after),
                        error: ForwardError::ConnectionTimeout {
                            target: self.spec.target(),
                            after,
                        },
                    };
                }
            }
        };

        match outcome {
            Outcome::Stop(reply) => self.serve_stop(reply).await,
            Outcome::Failed {
                advisory,
                message,
                error,
            } => {
                if self.supervisor.mark_failed(&self.id, advisory, &message) {
                    self.terminate().await;
                    self.supervisor.finish_teardown(&self.id);
                    self.resolve(Err(error));
                } else {
                    self.await_stop().await;
                }
            }
            Outcome::Exited(status) => match self.supervisor.mark_exited(&self.id, &status) {
                Some(session) => {
                    let message = match session.diagnostics_summary() {
                        s if s.is_empty() => format!("exited ({}) before connecting", status),
                        s => format!("exited ({}) before connecting: {}", status, s),
                    };
                    self.resolve(Err(self.failure_error(FailureKind::ForwardFailed, message)));
                }
                None => self.await_stop().await,
            },
        }
        debug!("[{}] Session actor finished", self.id);
    }

    /// Classifies one output line; returns an outcome when it ends the loop.
    fn handle_line(&mut self, line: OutputLine) -> Option<Outcome> {
        match classify(line.stream, &line.text) {
            LineOutcome::Established => {
                self.supervisor.record_activity(&self.id, None);
                if let Some(view) = self.supervisor.mark_connected(&self.id) {
                    self.resolve(Ok(view));
                }
                None
            }
            LineOutcome::Failure(kind) => {
                self.supervisor.record_activity(&self.id, None);
                Some(self.failure(kind, line.text))
            }
            LineOutcome::Unmatched => {
                let diagnostic = (line.stream == OutputStream::Stderr).then_some(line.text.as_str());
                self.supervisor.record_activity(&self.id, diagnostic);
                None
            }
        }
    }

    /// Reads what the pumps still deliver after exit, stopping at the first
    /// classified failure.
    async fn drain_after_exit(&mut self) -> Option<Outcome> {
        let drain = async {
            while let Some(line) = self.lines.recv().await {
                if let Some(outcome) = self.handle_line(line) {
                    return Some(outcome);
                }
            }
            None
        };
        tokio::time::timeout(EXIT_DRAIN, drain).await.ok().flatten()
    }

    fn failure(&self, kind: FailureKind, message: String) -> Outcome {
        Outcome::Failed {
            advisory: AdvisoryKind::Failure(kind),
            error: self.failure_error(kind, message.clone()),
            message,
        }
    }

    fn failure_error(&self, kind: FailureKind, message: String) -> ForwardError {
        ForwardError::Tunnel(TunnelFailure {
            kind,
            target: self.spec.target(),
            message,
        })
    }

    /// The session was marked Stopped concurrently; the stop request is on
    /// its way.
    async fn await_stop(&mut self) {
        match self.commands.recv().await {
            Some(SessionCommand::Stop { reply }) => self.serve_stop(reply).await,
            None => self.terminate().await,
        }
    }

    async fn serve_stop(&mut self, reply: oneshot::Sender<Result<ExitStatus, ProcessError>>) {
        let result = self
            .process
            .terminate(self.supervisor.settings.termination_grace)
            .await;
        let stopped = self.failure_error(
            FailureKind::ForwardFailed,
            "stopped before it was established".to_string(),
        );
        self.resolve(Err(stopped));
        if reply.send(result).is_err() {
            debug!("[{}] Stop requester went away", self.id);
        }
    }

    async fn terminate(&mut self) {
        if let Err(e) = self
            .process
            .terminate(self.supervisor.settings.termination_grace)
            .await
        {
            error!("[{}] Failed to terminate forward process: {}", self.id, e);
        }
    }

    fn resolve(&mut self, result: Result<SessionView, ForwardError>) {
        if let Some(ready) = self.ready.take() {
            // The starter may have given up waiting.
            let _ = ready.send(result);
        }
    }
}
