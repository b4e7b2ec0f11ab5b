//! Runs a check suite in a separate worker process.
//!
//! The host launches `qax worker` (or a configured executable), writes one
//! [`WorkerRequest`] line to its stdin and reads [`WorkerMessage`] lines from
//! its stdout until `Complete`. Stop requests travel as a [`WorkerCommand`]
//! line on stdin; the worker also stops when its stdin closes.
//!
//! A worker that dies, or whose output ends before `Complete`, is reported as
//! `StatusChanged(Failed)` followed by `Complete`, so a host never waits
//! forever.

use crate::executor::{EventSink, ExecutorEvent, ExecutorStatus};
use crate::models::{ExecutionStatus, QaDocument};
use crate::plugins::CheckToolOptions;
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until, timeout};

#[cfg(windows)]
const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;

/// Subcommand that turns the `qax` binary into a worker.
pub const WORKER_SUBCOMMAND: &str = "worker";

/// How long a worker may take to exit after a stop or a finished run before
/// it is killed.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Everything the worker needs to rebuild and run the suite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRequest {
    pub config_dir: Utf8PathBuf,
    pub profile_name: String,
    /// Plugin class identifiers, in run order.
    pub plugin_class_ids: Vec<String>,
    #[serde(default)]
    pub options: IndexMap<String, CheckToolOptions>,
    pub document: QaDocument,
}

/// Control lines sent to the worker after the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerCommand {
    Stop,
}

/// Lines written by the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkerMessage {
    Event { event: ExecutorEvent },
    /// Final document, sent just before the `Complete` event.
    Result { document: QaDocument },
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to spawn worker {exe}: {source}")]
    Spawn {
        exe: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Worker {0} pipe was not captured")]
    MissingPipe(&'static str),

    #[error("Worker I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Worker protocol error: {0}")]
    Protocol(#[from] serde_json::Error),

    #[error("Cannot locate the qax executable: {0}")]
    CurrentExe(String),

    #[error("Worker task failed: {0}")]
    Join(String),
}

/// Result of an isolated run.
#[derive(Debug, Clone)]
pub struct IsolatedOutcome {
    /// Last status reported by (or synthesized for) the worker.
    pub status: ExecutorStatus,
    /// Final document, when the worker delivered one.
    pub document: Option<QaDocument>,
    pub exit_status: Option<ExitStatus>,
}

/// Requests a stop of an isolated run from any task or thread.
#[derive(Debug, Clone)]
pub struct IsolatedStopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl IsolatedStopHandle {
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }
}

/// A started isolated run: the event stream plus the task driving the worker.
#[derive(Debug)]
pub struct IsolatedRun {
    pub events: mpsc::UnboundedReceiver<ExecutorEvent>,
    pub stop: IsolatedStopHandle,
    task: JoinHandle<Result<IsolatedOutcome, WorkerError>>,
}

impl IsolatedRun {
    /// Wait for the worker to finish. Events not yet received stay in
    /// `events`.
    pub async fn wait(self) -> Result<IsolatedOutcome, WorkerError> {
        self.task.await.map_err(|e| WorkerError::Join(e.to_string()))?
    }

    /// Drain every event into `on_event`, then wait for the worker.
    pub async fn drain<F>(mut self, mut on_event: F) -> Result<IsolatedOutcome, WorkerError>
    where
        F: FnMut(ExecutorEvent),
    {
        while let Some(event) = self.events.recv().await {
            on_event(event);
        }
        self.task.await.map_err(|e| WorkerError::Join(e.to_string()))?
    }
}

/// Runs a [`CheckExecutor`](crate::executor::CheckExecutor) inside a worker
/// process.
#[derive(Debug)]
pub struct IsolatedCheckExecutor {
    worker_exe: Utf8PathBuf,
    worker_args: Vec<String>,
    request: WorkerRequest,
    timeout: Option<Duration>,
    grace_period: Duration,
    stop_tx: Arc<watch::Sender<bool>>,
    stop_rx: watch::Receiver<bool>,
}

impl IsolatedCheckExecutor {
    /// Executor launching `worker_exe worker`.
    pub fn new(worker_exe: impl Into<Utf8PathBuf>, request: WorkerRequest) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        Self {
            worker_exe: worker_exe.into(),
            worker_args: vec![WORKER_SUBCOMMAND.to_string()],
            request,
            timeout: None,
            grace_period: DEFAULT_GRACE_PERIOD,
            stop_tx: Arc::new(stop_tx),
            stop_rx,
        }
    }

    /// Executor using the running binary as the worker.
    pub fn from_current_exe(request: WorkerRequest) -> Result<Self, WorkerError> {
        let exe = std::env::current_exe().map_err(|e| WorkerError::CurrentExe(e.to_string()))?;
        let exe = Utf8PathBuf::from_path_buf(exe)
            .map_err(|p| WorkerError::CurrentExe(format!("non UTF-8 path {}", p.display())))?;
        Ok(Self::new(exe, request))
    }

    /// Replace the worker arguments (default: `worker`).
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.worker_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Wall-clock limit: on expiry a stop is requested, and the worker is
    /// killed if it is still running after the grace period.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn worker_exe(&self) -> &Utf8Path {
        &self.worker_exe
    }

    pub fn request(&self) -> &WorkerRequest {
        &self.request
    }

    pub fn stop_handle(&self) -> IsolatedStopHandle {
        IsolatedStopHandle {
            tx: Arc::clone(&self.stop_tx),
        }
    }

    pub fn stop(&self) {
        self.stop_handle().stop();
    }

    /// Spawn the run on the current tokio runtime.
    pub fn start(self) -> IsolatedRun {
        let (tx, events) = mpsc::unbounded_channel();
        let stop = self.stop_handle();
        let task = tokio::spawn(async move {
            let mut tx = tx;
            self.run(&mut tx).await
        });
        IsolatedRun { events, stop, task }
    }

    /// Run the worker to completion, forwarding its events to `sink`.
    ///
    /// Once the worker has been spawned, `sink` receives exactly one
    /// `Complete`, as the last event, even when the worker crashes.
    pub async fn run<S>(&self, sink: &mut S) -> Result<IsolatedOutcome, WorkerError>
    where
        S: EventSink + Send,
    {
        tracing::info!(
            "Starting worker {} for profile '{}' with {} check tools",
            self.worker_exe,
            self.request.profile_name,
            self.request.plugin_class_ids.len()
        );

        let mut command = Command::new(&self.worker_exe);
        command
            .args(&self.worker_args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Keep terminal interrupts away from the worker; the host stops it
        // through stdin instead.
        #[cfg(unix)]
        command.process_group(0);
        #[cfg(windows)]
        command.creation_flags(CREATE_NEW_PROCESS_GROUP);

        let mut child = command
            .spawn()
            .map_err(|source| WorkerError::Spawn {
                exe: self.worker_exe.clone(),
                source,
            })?;

        let stdout = child.stdout.take().ok_or(WorkerError::MissingPipe("stdout"))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(target: "qax::worker", "{}", line);
                }
            });
        }

        let mut stdin = child.stdin.take();
        let request = serde_json::to_string(&self.request)?;
        if let Err(e) = write_line(&mut stdin, &request).await {
            tracing::warn!("Failed to send request to worker: {}", e);
        }

        let mut lines = BufReader::new(stdout).lines();
        let mut stop_rx = self.stop_rx.clone();
        let mut deadline = self.timeout.map(|t| Instant::now() + t);
        let mut kill_at: Option<Instant> = None;
        let mut status = ExecutorStatus::Idle;
        let mut document = None;
        let mut snapshot = None;
        let mut completed = false;

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let line = match line {
                        Ok(Some(line)) => line,
                        Ok(None) => break,
                        Err(e) => {
                            tracing::warn!("Failed to read worker output: {}", e);
                            break;
                        }
                    };
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<WorkerMessage>(&line) {
                        Ok(WorkerMessage::Result { document: final_document }) => {
                            document = Some(final_document);
                        }
                        Ok(WorkerMessage::Event { event }) => {
                            match &event {
                                ExecutorEvent::StatusChanged { status: new_status } => status = *new_status,
                                ExecutorEvent::DocumentChanged { document: changed } => {
                                    snapshot = Some(changed.clone());
                                }
                                _ => {}
                            }
                            let done = event.is_complete();
                            sink.emit(event);
                            if done {
                                completed = true;
                                break;
                            }
                        }
                        Err(e) => tracing::warn!("Ignoring malformed worker message: {}", e),
                    }
                }
                changed = stop_rx.changed(), if stdin.is_some() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        send_stop(&mut stdin).await;
                    }
                }
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    tracing::warn!("Worker timed out, requesting stop");
                    deadline = None;
                    send_stop(&mut stdin).await;
                    kill_at = Some(Instant::now() + self.grace_period);
                }
                _ = sleep_until(kill_at.unwrap_or_else(Instant::now)), if kill_at.is_some() => {
                    tracing::error!("Worker did not stop within {:?}, killing it", self.grace_period);
                    kill_at = None;
                    if let Err(e) = child.start_kill() {
                        tracing::warn!("Failed to kill worker: {}", e);
                    }
                }
            }
        }

        if !completed {
            tracing::error!("Worker ended without completing the run");
            status = ExecutorStatus::Failed;
            sink.emit(ExecutorEvent::StatusChanged { status });
            sink.emit(ExecutorEvent::Complete);
        }

        if document.is_none() {
            if let Some(mut last) = snapshot {
                let unfinished = last.finish_pending_checks(
                    ExecutionStatus::Failed,
                    Some("Worker ended without completing the check"),
                );
                tracing::warn!(
                    "No final document from worker, using its last snapshot ({} unfinished checks)",
                    unfinished
                );
                document = Some(last);
            }
        }

        drop(stdin);
        let exit_status = wait_or_kill(&mut child, self.grace_period).await;
        tracing::info!("Worker finished with status {} ({:?})", status, exit_status);

        Ok(IsolatedOutcome {
            status,
            document,
            exit_status,
        })
    }
}

async fn write_line(stdin: &mut Option<ChildStdin>, line: &str) -> std::io::Result<()> {
    let Some(pipe) = stdin.as_mut() else {
        return Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "worker stdin closed"));
    };
    pipe.write_all(line.as_bytes()).await?;
    pipe.write_all(b"\n").await?;
    pipe.flush().await
}

/// Send a stop command, then close stdin so the worker also sees EOF.
async fn send_stop(stdin: &mut Option<ChildStdin>) {
    if stdin.is_none() {
        return;
    }
    tracing::info!("Sending stop request to worker");
    match serde_json::to_string(&WorkerCommand::Stop) {
        Ok(line) => {
            if let Err(e) = write_line(stdin, &line).await {
                tracing::debug!("Worker stdin closed before stop request: {}", e);
            }
        }
        Err(e) => tracing::warn!("Failed to encode stop request: {}", e),
    }
    stdin.take();
}

async fn wait_or_kill(child: &mut Child, grace_period: Duration) -> Option<ExitStatus> {
    match timeout(grace_period, child.wait()).await {
        Ok(Ok(status)) => Some(status),
        Ok(Err(e)) => {
            tracing::warn!("Failed to wait for worker: {}", e);
            None
        }
        Err(_) => {
            tracing::warn!("Worker still running after {:?}, killing it", grace_period);
            if let Err(e) = child.kill().await {
                tracing::warn!("Failed to kill worker: {}", e);
            }
            child.wait().await.ok()
        }
    }
}
