//! Integration tests for the IsolatedCheckExecutor
//!
//! These tests launch the real `qax` binary (or a small shell stand-in) as the
//! worker process and verify:
//! - Events relayed across the process boundary, ending in one Complete
//! - The final document returned by the worker, or its last snapshot
//! - Stopping a running worker, by request or by timeout
//! - Failures synthesized for workers that never complete

use camino::Utf8PathBuf;
use indexmap::IndexMap;
use qax::binder::FileAttachment;
use qax::executor::isolated::{IsolatedCheckExecutor, WorkerRequest};
use qax::models::ExecutionStatus;
use qax::plugins::CheckToolOptions;
use qax::plugins::builtin::example::RAW_CHECK_ID;
use qax::plugins::builtin::file_presence::FILE_PRESENCE_CHECK_ID;
use qax::plugins::builtin::{EXAMPLE_CLASS_ID, FILE_PRESENCE_CLASS_ID, RAW_FILES_GROUP};
use qax::{
    ConfigModel, DataLevel, ExecutorEvent, ExecutorStatus, PluginCatalog, PluginRegistry,
    ProfilePlugins, QaDocument,
};
use serde_json::json;
use std::fs;
use tempfile::TempDir;
use tokio::time::{Duration, timeout};

const WORKER_EXE: &str = env!("CARGO_BIN_EXE_qax");

const PROFILE_YAML: &str = r#"
name: Default
checkTools:
  - name: Presence
    pluginClass: qax.plugins.file_presence.FilePresenceCheckTool
  - name: Example
    pluginClass: qax.plugins.example.ExampleCheckTool
"#;

fn create_request(file_count: usize) -> (TempDir, WorkerRequest) {
    let temp_dir = TempDir::new().unwrap();
    let root = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    fs::write(config_dir.join("default.yaml"), PROFILE_YAML).unwrap();

    let config = ConfigModel::load(&config_dir).unwrap();
    let registry = PluginRegistry::load(&config, &PluginCatalog::builtin());
    let plugins = ProfilePlugins::new(registry.get_profile_plugins(config.profile("Default").unwrap()));

    let files: Vec<_> = (0..file_count)
        .map(|i| {
            let path = root.join(format!("line{i}.all"));
            fs::write(&path, b"ping").unwrap();
            FileAttachment::new(path, RAW_FILES_GROUP)
        })
        .collect();

    let mut document = QaDocument::new();
    plugins.update_qa_json(&mut document);
    plugins.update_qa_json_input_files(&mut document, &files);

    let request = WorkerRequest {
        config_dir,
        profile_name: "Default".to_string(),
        plugin_class_ids: vec![FILE_PRESENCE_CLASS_ID.to_string(), EXAMPLE_CLASS_ID.to_string()],
        options: IndexMap::new(),
        document,
    };
    (temp_dir, request)
}

fn slow_request(file_count: usize, delay_ms: u64) -> (TempDir, WorkerRequest) {
    let (temp_dir, mut request) = create_request(file_count);
    let mut slow = CheckToolOptions::new();
    slow.insert("delay_ms".to_string(), json!(delay_ms));
    request.options.insert(EXAMPLE_CLASS_ID.to_string(), slow);
    (temp_dir, request)
}

fn started_ids(events: &[ExecutorEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            ExecutorEvent::CheckToolStarted { check_tool_id, .. } => Some(check_tool_id.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_isolated_run_completes() {
    let (_temp_dir, request) = create_request(2);
    let executor = IsolatedCheckExecutor::new(WORKER_EXE, request);

    let mut events = Vec::new();
    let outcome = timeout(
        Duration::from_secs(60),
        executor.start().drain(|e| events.push(e)),
    )
    .await
    .expect("worker timed out")
    .unwrap();

    assert_eq!(outcome.status, ExecutorStatus::Complete);
    assert_eq!(started_ids(&events), vec![FILE_PRESENCE_CLASS_ID, EXAMPLE_CLASS_ID]);
    assert_eq!(events.last(), Some(&ExecutorEvent::Complete));
    assert_eq!(events.iter().filter(|e| e.is_complete()).count(), 1);

    let document = outcome.document.unwrap();
    let presence = document.check(DataLevel::RawData, FILE_PRESENCE_CHECK_ID).unwrap();
    assert_eq!(presence.execution_status(), Some(ExecutionStatus::Completed));
    let raw = document.check(DataLevel::RawData, RAW_CHECK_ID).unwrap();
    assert_eq!(raw.execution_status(), Some(ExecutionStatus::Completed));
}

#[tokio::test]
async fn test_isolated_run_can_be_stopped() {
    let (_temp_dir, request) = slow_request(100, 50);
    let executor = IsolatedCheckExecutor::new(WORKER_EXE, request);
    let mut run = executor.start();

    let mut events = Vec::new();
    let collected = timeout(Duration::from_secs(60), async {
        while let Some(event) = run.events.recv().await {
            if matches!(&event, ExecutorEvent::CheckToolStarted { check_tool_id, .. } if check_tool_id == EXAMPLE_CLASS_ID)
            {
                run.stop.stop();
            }
            events.push(event);
        }
    })
    .await;
    assert!(collected.is_ok(), "worker did not stop");

    let outcome = run.wait().await.unwrap();
    assert_eq!(outcome.status, ExecutorStatus::Stopped);
    assert_eq!(events.last(), Some(&ExecutorEvent::Complete));

    let document = outcome.document.unwrap();
    let raw = document.check(DataLevel::RawData, RAW_CHECK_ID).unwrap();
    assert_eq!(raw.execution_status(), Some(ExecutionStatus::Aborted));
}

#[tokio::test]
async fn test_unknown_profile_reports_failure() {
    let (_temp_dir, mut request) = create_request(1);
    request.profile_name = "Missing".to_string();

    let mut events = Vec::new();
    let outcome = IsolatedCheckExecutor::new(WORKER_EXE, request)
        .run(&mut |e: ExecutorEvent| events.push(e))
        .await
        .unwrap();

    assert_eq!(outcome.status, ExecutorStatus::Failed);
    assert!(outcome.document.is_none());
    assert_eq!(
        events,
        vec![
            ExecutorEvent::StatusChanged {
                status: ExecutorStatus::Failed
            },
            ExecutorEvent::Complete,
        ]
    );
}

#[tokio::test]
async fn test_worker_without_complete_is_failed() {
    let (_temp_dir, request) = create_request(1);
    // `qax --version` prints a line and exits without speaking the protocol.
    let executor = IsolatedCheckExecutor::new(WORKER_EXE, request).with_args(["--version"]);

    let mut events = Vec::new();
    let outcome = executor
        .run(&mut |e: ExecutorEvent| events.push(e))
        .await
        .unwrap();

    assert_eq!(outcome.status, ExecutorStatus::Failed);
    assert_eq!(
        events,
        vec![
            ExecutorEvent::StatusChanged {
                status: ExecutorStatus::Failed
            },
            ExecutorEvent::Complete,
        ]
    );
}

#[tokio::test]
async fn test_timeout_stops_worker() {
    let (_temp_dir, request) = slow_request(100, 50);
    let executor = IsolatedCheckExecutor::new(WORKER_EXE, request)
        .with_timeout(Some(Duration::from_millis(200)));

    let mut events = Vec::new();
    let outcome = timeout(
        Duration::from_secs(60),
        executor.run(&mut |e: ExecutorEvent| events.push(e)),
    )
    .await
    .expect("worker timed out")
    .unwrap();

    assert_eq!(outcome.status, ExecutorStatus::Stopped);
    assert_eq!(events.last(), Some(&ExecutorEvent::Complete));
    assert_eq!(events.iter().filter(|e| e.is_complete()).count(), 1);
    assert!(outcome.document.is_some());
}

#[cfg(unix)]
#[tokio::test]
async fn test_worker_ignoring_stop_is_killed() {
    let (_temp_dir, request) = create_request(1);
    // Never reads stdin and never answers.
    let executor = IsolatedCheckExecutor::new("/bin/sh", request)
        .with_args(["-c", "exec sleep 30"])
        .with_timeout(Some(Duration::from_millis(200)))
        .with_grace_period(Duration::ZERO);

    let mut events = Vec::new();
    let outcome = timeout(
        Duration::from_secs(20),
        executor.run(&mut |e: ExecutorEvent| events.push(e)),
    )
    .await
    .expect("worker was not killed")
    .unwrap();

    assert_eq!(outcome.status, ExecutorStatus::Failed);
    assert!(outcome.document.is_none());
    assert_eq!(
        events,
        vec![
            ExecutorEvent::StatusChanged {
                status: ExecutorStatus::Failed
            },
            ExecutorEvent::Complete,
        ]
    );
}

#[cfg(unix)]
#[tokio::test]
async fn test_last_snapshot_kept_when_worker_dies() {
    let (_temp_dir, request) = create_request(1);
    let snapshot = json!({
        "kind": "event",
        "event": {
            "type": "document_changed",
            "document": {
                "qa": {
                    "version": "0.1.4",
                    "raw_data": {
                        "checks": [
                            {
                                "info": {"id": "done", "name": "Done", "version": "1"},
                                "outputs": {"execution": {"status": "completed"}, "messages": []}
                            },
                            {
                                "info": {"id": "busy", "name": "Busy", "version": "1"},
                                "outputs": {"execution": {"status": "running"}, "messages": []}
                            }
                        ]
                    }
                }
            }
        }
    });
    // Reports one snapshot, then exits without a result or Complete.
    let script = format!("printf '%s\\n' '{}'", snapshot);
    let executor = IsolatedCheckExecutor::new("/bin/sh", request).with_args(["-c".to_string(), script]);

    let mut events = Vec::new();
    let outcome = executor
        .run(&mut |e: ExecutorEvent| events.push(e))
        .await
        .unwrap();

    assert_eq!(outcome.status, ExecutorStatus::Failed);
    assert_eq!(events.last(), Some(&ExecutorEvent::Complete));

    let document = outcome.document.expect("last snapshot should be returned");
    let done = document.check(DataLevel::RawData, "done").unwrap();
    assert_eq!(done.execution_status(), Some(ExecutionStatus::Completed));
    let busy = document.check(DataLevel::RawData, "busy").unwrap();
    assert_eq!(busy.execution_status(), Some(ExecutionStatus::Failed));
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_worker_runs_in_own_process_group() {
    let (_temp_dir, request) = create_request(1);
    // Completes the protocol only when its process group differs from the
    // host's, so a terminal interrupt reaches the host alone.
    let script = r#"own=$(awk '{print $5}' /proc/$$/stat)
parent=$(awk '{print $5}' /proc/$PPID/stat)
if [ "$own" != "$parent" ]; then
  printf '%s\n' '{"kind":"event","event":{"type":"status_changed","status":"complete"}}' '{"kind":"event","event":{"type":"complete"}}'
fi"#;
    let executor = IsolatedCheckExecutor::new("/bin/sh", request).with_args(["-c", script]);

    let outcome = executor.run(&mut |_: ExecutorEvent| {}).await.unwrap();
    assert_eq!(outcome.status, ExecutorStatus::Complete);
}
