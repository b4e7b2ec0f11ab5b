//! Worker process entry point for isolated runs.
//!
//! Reads one [`WorkerRequest`] line, rebuilds the configuration and plugin
//! registry locally, runs a [`CheckExecutor`] and writes every event as a
//! [`WorkerMessage`] line. The executor's own `Complete` is held back so the
//! final document can be sent first.

use crate::config::ConfigModel;
use crate::executor::isolated::{WorkerCommand, WorkerMessage, WorkerRequest};
use crate::executor::{CheckExecutor, ExecutorEvent, ExecutorStatus};
use crate::plugins::{CancellationToken, CheckToolPlugin, PluginCatalog, PluginRegistry};
use anyhow::{Context, Result, anyhow};
use camino::Utf8Path;
use std::io::{self, BufRead, BufReader, Write};
use std::sync::Arc;
use std::thread;

/// Serve one request on the process's stdin/stdout.
pub fn run_worker(catalog: &PluginCatalog) -> ExecutorStatus {
    serve(BufReader::new(io::stdin()), io::stdout(), catalog)
}

/// Serve one request read from `input`, writing messages to `output`.
///
/// After the request, `input` is watched for a stop command on a separate
/// thread. End of input also counts as a stop.
pub fn serve<R, W>(mut input: R, output: W, catalog: &PluginCatalog) -> ExecutorStatus
where
    R: BufRead + Send + 'static,
    W: Write,
{
    let mut writer = MessageWriter::new(output);

    let mut line = String::new();
    let request = match input.read_line(&mut line) {
        Ok(0) => {
            tracing::error!("Worker input closed before a request arrived");
            return writer.fail();
        }
        Ok(_) => match serde_json::from_str::<WorkerRequest>(&line) {
            Ok(request) => request,
            Err(e) => {
                tracing::error!("Invalid worker request: {}", e);
                return writer.fail();
            }
        },
        Err(e) => {
            tracing::error!("Failed to read worker request: {}", e);
            return writer.fail();
        }
    };

    let WorkerRequest {
        config_dir,
        profile_name,
        plugin_class_ids,
        options,
        mut document,
    } = request;

    let plugins = match load_plugins(&config_dir, &profile_name, &plugin_class_ids, catalog) {
        Ok(plugins) => plugins,
        Err(e) => {
            tracing::error!("Worker setup failed: {:#}", e);
            return writer.fail();
        }
    };

    let mut executor = CheckExecutor::new(plugins).with_options(options);
    listen_for_stop(input, executor.stop_handle());

    let status = executor.run(&mut document, &mut |event: ExecutorEvent| {
        if !event.is_complete() {
            writer.send(&WorkerMessage::Event { event });
        }
    });

    writer.send(&WorkerMessage::Result { document });
    writer.send(&WorkerMessage::Event {
        event: ExecutorEvent::Complete,
    });
    status
}

fn load_plugins(
    config_dir: &Utf8Path,
    profile_name: &str,
    plugin_class_ids: &[String],
    catalog: &PluginCatalog,
) -> Result<Vec<Arc<CheckToolPlugin>>> {
    let config = ConfigModel::load(config_dir)
        .with_context(|| format!("Failed to load profiles from {}", config_dir))?;
    let profile = config
        .profile(profile_name)
        .ok_or_else(|| anyhow!("Profile '{}' not found in {}", profile_name, config_dir))?;
    let registry = PluginRegistry::load(&config, catalog);

    let mut plugins = Vec::with_capacity(plugin_class_ids.len());
    for class_id in plugin_class_ids {
        match registry.get_plugin(&profile.name, class_id) {
            Some(plugin) => plugins.push(plugin),
            None => tracing::warn!(
                "Check tool {} is not available in profile '{}', skipping",
                class_id,
                profile.name
            ),
        }
    }
    Ok(plugins)
}

fn listen_for_stop<R>(input: R, cancel: CancellationToken)
where
    R: BufRead + Send + 'static,
{
    let spawned = thread::Builder::new()
        .name("qax-stop-listener".to_string())
        .spawn(move || {
            for line in input.lines() {
                let Ok(line) = line else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<WorkerCommand>(&line) {
                    Ok(WorkerCommand::Stop) => {
                        tracing::info!("Stop requested by host");
                        cancel.cancel();
                        return;
                    }
                    Err(e) => tracing::warn!("Ignoring unknown host command: {}", e),
                }
            }
            tracing::info!("Host closed the worker input, stopping");
            cancel.cancel();
        });

    if let Err(e) = spawned {
        tracing::warn!("Failed to start stop listener, run cannot be stopped: {}", e);
    }
}

/// Line-framed JSON writer. Once the host is gone, further messages are
/// dropped.
struct MessageWriter<W: Write> {
    out: W,
    closed: bool,
}

impl<W: Write> MessageWriter<W> {
    fn new(out: W) -> Self {
        Self { out, closed: false }
    }

    fn send(&mut self, message: &WorkerMessage) {
        if self.closed {
            return;
        }
        let written = serde_json::to_writer(&mut self.out, message)
            .map_err(io::Error::from)
            .and_then(|()| self.out.write_all(b"\n"))
            .and_then(|()| self.out.flush());
        if let Err(e) = written {
            tracing::warn!("Host channel closed: {}", e);
            self.closed = true;
        }
    }

    /// Report a run that could not start.
    fn fail(&mut self) -> ExecutorStatus {
        let status = ExecutorStatus::Failed;
        self.send(&WorkerMessage::Event {
            event: ExecutorEvent::StatusChanged { status },
        });
        self.send(&WorkerMessage::Event {
            event: ExecutorEvent::Complete,
        });
        status
    }
}
