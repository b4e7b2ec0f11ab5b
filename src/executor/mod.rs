//! Sequential check tool execution.
//!
//! [`CheckExecutor`] runs an ordered list of check tools against one document
//! on the calling thread and reports lifecycle events to an [`EventSink`].
//! [`isolated::IsolatedCheckExecutor`] runs the same executor inside a worker
//! process and relays its events back over a pipe.
//!
//! # Event ordering
//!
//! - `StatusChanged(Running)` first
//! - per tool: `CheckToolStarted`, then any `Progress` / `DocumentChanged`
//! - `Progress(None, 1.0)` only when the suite ran to the end
//! - `StatusChanged(Complete | Stopped)`, then exactly one `Complete`, always
//!   last

pub mod isolated;

use crate::models::{ExecutionStatus, QaDocument};
use crate::plugins::{CancellationToken, CheckToolOptions, CheckToolPlugin};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Overall state of a suite run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorStatus {
    Idle,
    Running,
    Stopped,
    Complete,
    Failed,
}

impl fmt::Display for ExecutorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ExecutorStatus::Idle => "Idle",
            ExecutorStatus::Running => "Running",
            ExecutorStatus::Stopped => "Stopped",
            ExecutorStatus::Complete => "Complete",
            ExecutorStatus::Failed => "Failed",
        };
        f.write_str(label)
    }
}

/// Lifecycle events emitted during a suite run.
///
/// Every variant is plain data so events can cross the worker process
/// boundary as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutorEvent {
    /// Per-tool progress in `[0, 1]`. `check_tool_id` is `None` for the final
    /// suite-level report.
    Progress {
        check_tool_id: Option<String>,
        fraction: f32,
    },
    CheckToolStarted {
        check_tool_id: String,
        index: usize,
        total: usize,
    },
    StatusChanged {
        status: ExecutorStatus,
    },
    /// Snapshot of the document after a check tool mutated it. Supersedes any
    /// earlier snapshot.
    DocumentChanged {
        document: QaDocument,
    },
    Complete,
}

impl ExecutorEvent {
    pub fn is_complete(&self) -> bool {
        matches!(self, ExecutorEvent::Complete)
    }
}

/// Receiver of executor events.
pub trait EventSink {
    fn emit(&mut self, event: ExecutorEvent);
}

impl<F> EventSink for F
where
    F: FnMut(ExecutorEvent),
{
    fn emit(&mut self, event: ExecutorEvent) {
        self(event)
    }
}

impl EventSink for mpsc::UnboundedSender<ExecutorEvent> {
    fn emit(&mut self, event: ExecutorEvent) {
        if self.send(event).is_err() {
            tracing::debug!("Event receiver dropped, event discarded");
        }
    }
}

/// Runs check tools one after another against a single document.
///
/// A stop request (from [`stop`](Self::stop) or a token obtained through
/// [`stop_handle`](Self::stop_handle)) is honoured between tools and polled by
/// the running tool. Once stopped, an executor stays stopped.
#[derive(Debug)]
pub struct CheckExecutor {
    plugins: Vec<Arc<CheckToolPlugin>>,
    options: IndexMap<String, CheckToolOptions>,
    status: ExecutorStatus,
    cancel: CancellationToken,
}

impl CheckExecutor {
    pub fn new(plugins: Vec<Arc<CheckToolPlugin>>) -> Self {
        Self {
            plugins,
            options: IndexMap::new(),
            status: ExecutorStatus::Idle,
            cancel: CancellationToken::new(),
        }
    }

    /// Run-time options per check tool, keyed by plugin class identifier.
    pub fn with_options(mut self, options: IndexMap<String, CheckToolOptions>) -> Self {
        self.options = options;
        self
    }

    pub fn plugins(&self) -> &[Arc<CheckToolPlugin>] {
        &self.plugins
    }

    pub fn status(&self) -> ExecutorStatus {
        self.status
    }

    /// Token that stops this executor's run when cancelled, usable from any
    /// thread.
    pub fn stop_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn stop(&self) {
        tracing::info!("Stop requested for check suite");
        self.cancel.cancel();
    }

    /// Run every check tool in order, returning the final status.
    pub fn run(&mut self, document: &mut QaDocument, sink: &mut dyn EventSink) -> ExecutorStatus {
        let total = self.plugins.len();
        tracing::info!("Starting check suite with {} check tools", total);

        self.set_status(ExecutorStatus::Running, sink);
        self.mark_queued(document);

        for (index, plugin) in self.plugins.iter().enumerate() {
            if self.cancel.is_cancelled() {
                tracing::info!("Check suite stopped before '{}'", plugin.name());
                break;
            }

            sink.emit(ExecutorEvent::CheckToolStarted {
                check_tool_id: plugin.class_id().to_string(),
                index,
                total,
            });
            plugin.set_options(self.options.get(plugin.class_id()).cloned().unwrap_or_default());
            tracing::info!("Running check tool '{}' ({}/{})", plugin.name(), index + 1, total);

            let outcome = {
                let sink = RefCell::new(&mut *sink);
                let check_tool_id = plugin.class_id();
                let mut on_progress = |fraction: f32| {
                    sink.borrow_mut().emit(ExecutorEvent::Progress {
                        check_tool_id: Some(check_tool_id.to_string()),
                        fraction,
                    });
                };
                let mut on_document_changed = |document: &QaDocument| {
                    sink.borrow_mut().emit(ExecutorEvent::DocumentChanged {
                        document: document.clone(),
                    });
                };
                let cancel = &self.cancel;
                panic::catch_unwind(AssertUnwindSafe(|| {
                    plugin.run(document, cancel, &mut on_progress, &mut on_document_changed)
                }))
            };

            let failure = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(payload) => Some(format!("check tool panicked: {}", panic_message(payload.as_ref()))),
            };
            match failure {
                None => tracing::debug!("Check tool '{}' finished", plugin.name()),
                Some(error) => {
                    tracing::error!("Check tool '{}' failed: {}", plugin.name(), error);
                    mark_pending(plugin, document, ExecutionStatus::Failed, Some(&error));
                }
            }
        }

        let final_status = if self.cancel.is_cancelled() {
            for plugin in &self.plugins {
                mark_pending(plugin, document, ExecutionStatus::Aborted, None);
            }
            ExecutorStatus::Stopped
        } else {
            sink.emit(ExecutorEvent::Progress {
                check_tool_id: None,
                fraction: 1.0,
            });
            ExecutorStatus::Complete
        };

        self.set_status(final_status, sink);
        sink.emit(ExecutorEvent::Complete);
        tracing::info!("Check suite finished: {}", final_status);
        final_status
    }

    fn set_status(&mut self, status: ExecutorStatus, sink: &mut dyn EventSink) {
        self.status = status;
        sink.emit(ExecutorEvent::StatusChanged { status });
    }

    /// Reset every check node of the suite to `queued`.
    fn mark_queued(&self, document: &mut QaDocument) {
        for plugin in &self.plugins {
            for check_ref in plugin.checks() {
                if let Some(check) = document.check_mut(check_ref.data_level, &check_ref.id) {
                    check.set_execution_status(ExecutionStatus::Queued, None);
                }
            }
        }
    }
}

/// Move checks of `plugin` still queued or running to `status`.
fn mark_pending(
    plugin: &CheckToolPlugin,
    document: &mut QaDocument,
    status: ExecutionStatus,
    error: Option<&str>,
) {
    for check_ref in plugin.checks() {
        let Some(check) = document.check_mut(check_ref.data_level, &check_ref.id) else {
            continue;
        };
        if check.execution_status().is_some_and(|s| s.is_pending()) {
            check.set_execution_status(status, error.map(str::to_string));
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
