//! Long-lived demodulator process bound to a FIFO.
//!
//! State machine: `Idle --start()--> Running --(process exit)--> Idle`.
//! An exit while `Running` is unexpected and reported as
//! [`DemodulatorEvent::Closed`]; [`Demodulator::stop`] flips the status to
//! `Idle` before killing, so a deliberate stop reports nothing.
//!
//! Every spawn is a new session with its own number, and every event names
//! the session it came from.

use crate::config::{DemodulatorConfig, PipeConfig};
use crate::error::{DtmfError, Result};
use crate::process::pipe::PipeResource;
use crate::process::{clean_line, log_stderr};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemodulatorStatus {
    Idle,
    Running,
}

/// What the demodulator reports to its owner, in process output order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DemodulatorEvent {
    /// One trimmed, non-empty stdout line.
    Line { session: u64, line: String },
    /// The process exited on its own.
    Closed { session: u64, code: Option<i32> },
}

impl DemodulatorEvent {
    pub fn session(&self) -> u64 {
        match self {
            DemodulatorEvent::Line { session, .. } | DemodulatorEvent::Closed { session, .. } => {
                *session
            }
        }
    }
}

/// One spawned process and the task supervising it.
struct Session {
    pipe_path: PathBuf,
    kill_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

pub struct Demodulator {
    config: DemodulatorConfig,
    pipe_dir: PathBuf,
    fixed_path: Option<PathBuf>,
    events: mpsc::UnboundedSender<DemodulatorEvent>,
    status: Arc<watch::Sender<DemodulatorStatus>>,
    session: Option<Session>,
    /// Number of the most recently spawned session; 0 before the first.
    spawned: u64,
}

impl Demodulator {
    /// Creates an idle demodulator that reports to `events`.
    pub fn new(
        config: DemodulatorConfig,
        pipe: &PipeConfig,
        events: mpsc::UnboundedSender<DemodulatorEvent>,
    ) -> Self {
        let (status, _) = watch::channel(DemodulatorStatus::Idle);
        Self {
            config,
            pipe_dir: pipe.dir(),
            fixed_path: pipe.path.clone(),
            events,
            status: Arc::new(status),
            session: None,
            spawned: 0,
        }
    }

    pub fn status(&self) -> DemodulatorStatus {
        *self.status.borrow()
    }

    /// Receiver that observes every status transition.
    pub fn watch_status(&self) -> watch::Receiver<DemodulatorStatus> {
        self.status.subscribe()
    }

    /// Number the next [`Demodulator::start`] gives its session.
    ///
    /// Only meaningful while idle; a running session keeps its number.
    pub fn next_session(&self) -> u64 {
        self.spawned + 1
    }

    /// Pipe of the current process; `None` while idle.
    pub fn pipe_path(&self) -> Option<&Path> {
        match self.status() {
            DemodulatorStatus::Running => self.session.as_ref().map(|s| s.pipe_path.as_path()),
            DemodulatorStatus::Idle => None,
        }
    }

    /// Creates the pipe and spawns the process. No-op while running.
    pub async fn start(&mut self) -> Result<()> {
        if self.status() == DemodulatorStatus::Running {
            return Ok(());
        }
        self.reap().await;

        let pipe = PipeResource::create(self.fixed_path.as_deref(), &self.pipe_dir)?;
        let pipe_path = pipe.path().to_path_buf();

        tracing::debug!(
            program = %self.config.program,
            args = ?self.config.args,
            pipe = %pipe_path.display(),
            "spawning demodulator"
        );
        let mut child = Command::new(&self.config.program)
            .args(&self.config.args)
            .arg(&pipe_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DtmfError::Spawn {
                program: self.config.program.clone(),
                message: e.to_string(),
            })?;

        let stdout = child.stdout.take().ok_or_else(|| DtmfError::Spawn {
            program: self.config.program.clone(),
            message: "stdout was not captured".to_string(),
        })?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(log_stderr(self.config.program.clone(), stderr));
        }

        self.spawned += 1;
        self.status.send_replace(DemodulatorStatus::Running);

        let (kill_tx, kill_rx) = oneshot::channel();
        let task = tokio::spawn(supervise(
            self.spawned,
            child,
            pipe,
            stdout,
            kill_rx,
            Arc::clone(&self.status),
            self.events.clone(),
        ));
        tracing::info!(
            session = self.spawned,
            pipe = %pipe_path.display(),
            "demodulator started"
        );

        self.session = Some(Session {
            pipe_path,
            kill_tx: Some(kill_tx),
            task,
        });
        Ok(())
    }

    /// Kills the process and removes its pipe without reporting a close.
    ///
    /// Returns once the pipe is gone.
    pub async fn stop(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        // Must precede the kill: the exit path only reports a close while Running.
        self.status.send_if_modified(|status| {
            let was_running = *status == DemodulatorStatus::Running;
            *status = DemodulatorStatus::Idle;
            was_running
        });
        if let Some(kill_tx) = session.kill_tx.take() {
            // Err means the process already exited; nothing to kill.
            let _ = kill_tx.send(());
        }
        if let Err(e) = session.task.await {
            tracing::warn!("demodulator supervisor failed: {}", e);
        }
        tracing::info!("demodulator stopped");
    }

    /// Waits for a finished session's supervisor so its pipe is gone before a restart.
    async fn reap(&mut self) {
        if let Some(session) = self.session.take()
            && let Err(e) = session.task.await
        {
            tracing::warn!("demodulator supervisor failed: {}", e);
        }
    }
}

/// Reads stdout line by line until EOF or a kill request, then reaps the
/// process, removes the pipe and reports an unexpected exit.
async fn supervise(
    session: u64,
    mut child: Child,
    mut pipe: PipeResource,
    stdout: ChildStdout,
    mut kill_rx: oneshot::Receiver<()>,
    status: Arc<watch::Sender<DemodulatorStatus>>,
    events: mpsc::UnboundedSender<DemodulatorEvent>,
) {
    let mut segments = BufReader::new(stdout).split(b'\n');
    loop {
        tokio::select! {
            biased;
            _ = &mut kill_rx => {
                if let Err(e) = child.start_kill() {
                    tracing::warn!("failed to kill demodulator: {}", e);
                }
                break;
            }
            segment = segments.next_segment() => match segment {
                Ok(Some(raw)) => {
                    if let Some(line) = clean_line(&raw) {
                        // A closed receiver means nobody listens any more; keep draining.
                        let _ = events.send(DemodulatorEvent::Line { session, line });
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("demodulator stdout read failed: {}", e);
                    break;
                }
            }
        }
    }

    let code = match child.wait().await {
        Ok(exit) => exit.code(),
        Err(e) => {
            tracing::warn!("failed to reap demodulator: {}", e);
            None
        }
    };
    pipe.destroy_reported();

    let unexpected = status.send_if_modified(|status| {
        if *status == DemodulatorStatus::Running {
            *status = DemodulatorStatus::Idle;
            true
        } else {
            false
        }
    });
    if unexpected {
        tracing::info!(session, code = ?code, "demodulator exited");
        let _ = events.send(DemodulatorEvent::Closed { session, code });
    }
}
