use crate::models::{
    CheckReference, CheckState, DataLevel, ExecutionStatus, FileType, QaCheckOutputs, QaDocument,
    QaExecution, WILDCARD_EXTENSION,
};
use crate::plugins::builtin::{RAW_FILES_GROUP, SURVEY_DTMS_GROUP};
use crate::plugins::tool::{CheckTool, RunContext, RunError, SummaryField};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs;

pub const FILE_PRESENCE_CHECK_ID: &str = "3c1f2a5e-9d7b-4a64-8f0e-2b6d5c4e1a77";

const SUMMARY_SECTION: &str = "File presence";
const SUMMARY_EXISTS: &str = "Exists";
const SUMMARY_SIZE: &str = "Size (bytes)";

/// Per-file record stored in the check's output data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct FileRecord {
    path: String,
    exists: bool,
    size: Option<u64>,
}

/// Verifies that every input file exists and is not empty.
#[derive(Debug, Default)]
pub struct FilePresenceCheckTool;

impl FilePresenceCheckTool {
    pub fn new() -> Self {
        Self
    }

    fn inspect(path: &str) -> FileRecord {
        match fs::metadata(path) {
            Ok(meta) if meta.is_file() => FileRecord {
                path: path.to_string(),
                exists: true,
                size: Some(meta.len()),
            },
            _ => FileRecord {
                path: path.to_string(),
                exists: false,
                size: None,
            },
        }
    }

    fn records(document: &QaDocument) -> Vec<FileRecord> {
        document
            .check(DataLevel::RawData, FILE_PRESENCE_CHECK_ID)
            .and_then(|check| check.outputs.as_ref())
            .and_then(|outputs| outputs.data.get("files"))
            .and_then(|files| serde_json::from_value(files.clone()).ok())
            .unwrap_or_default()
    }
}

impl CheckTool for FilePresenceCheckTool {
    fn name(&self) -> &str {
        "File Presence"
    }

    fn description(&self) -> &str {
        "Checks that input files exist and are not empty"
    }

    fn checks(&self) -> Vec<CheckReference> {
        vec![
            CheckReference::new(
                FILE_PRESENCE_CHECK_ID,
                "File presence check",
                DataLevel::RawData,
                "1",
            )
            .with_description("Every input file exists and has content")
            .with_file_type(FileType::new("Any raw file", WILDCARD_EXTENSION, RAW_FILES_GROUP))
            .with_file_type(FileType::new("Any grid", WILDCARD_EXTENSION, SURVEY_DTMS_GROUP)),
        ]
    }

    fn run(&mut self, document: &mut QaDocument, ctx: &mut RunContext<'_>) -> Result<(), RunError> {
        let Some(check) = document.check(DataLevel::RawData, FILE_PRESENCE_CHECK_ID) else {
            tracing::debug!("File presence check not in document, nothing to do");
            return Ok(());
        };
        let paths: Vec<String> = check.inputs.files.iter().map(|f| f.path.clone()).collect();

        let start = Utc::now();
        let mut records = Vec::with_capacity(paths.len());
        let mut messages = Vec::new();

        for (index, path) in paths.iter().enumerate() {
            if ctx.should_stop() {
                return Ok(());
            }
            let record = Self::inspect(path);
            match record.size {
                None => messages.push(format!("{path} does not exist")),
                Some(0) => messages.push(format!("{path} is empty")),
                Some(_) => {}
            }
            records.push(record);
            ctx.report_progress((index + 1) as f32 / paths.len() as f32);
        }

        let check_state = if messages.is_empty() {
            CheckState::Pass
        } else {
            CheckState::Fail
        };
        let data = serde_json::to_value(&records)
            .map_err(|e| RunError::Failed(format!("Failed to serialize file records: {e}")))?;

        if let Some(check) = document.check_mut(DataLevel::RawData, FILE_PRESENCE_CHECK_ID) {
            check.outputs = Some(QaCheckOutputs {
                execution: QaExecution {
                    start: Some(start),
                    end: Some(Utc::now()),
                    ..QaExecution::new(ExecutionStatus::Completed)
                },
                messages,
                data: serde_json::json!({ "files": data }),
                check_state: Some(check_state),
                extra: Default::default(),
            });
        }
        ctx.report_progress(1.0);
        ctx.document_changed(document);
        Ok(())
    }

    fn summary_details(&self) -> Vec<SummaryField> {
        vec![
            SummaryField::new(SUMMARY_SECTION, SUMMARY_EXISTS),
            SummaryField::new(SUMMARY_SECTION, SUMMARY_SIZE),
        ]
    }

    fn summary_value(
        &self,
        field: &SummaryField,
        filename: &str,
        document: &QaDocument,
    ) -> Option<serde_json::Value> {
        if field.section != SUMMARY_SECTION {
            return None;
        }
        let record = Self::records(document)
            .into_iter()
            .find(|r| r.path == filename)?;

        match field.field.as_str() {
            SUMMARY_EXISTS => Some(record.exists.into()),
            SUMMARY_SIZE => record.size.map(Into::into),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{QaCheckInfo, QaInputFile};
    use crate::plugins::cancel::CancellationToken;
    use crate::plugins::tool::CheckToolOptions;
    use serde_json::json;
    use tempfile::TempDir;

    fn document_with(paths: &[String]) -> QaDocument {
        let mut document = QaDocument::new();
        let section = document.ensure_root().ensure_data_level(DataLevel::RawData);
        let (check, _) = section.upsert_check(QaCheckInfo {
            id: FILE_PRESENCE_CHECK_ID.to_string(),
            name: "File presence check".to_string(),
            version: "1".to_string(),
            ..Default::default()
        });
        for path in paths {
            check.inputs.files.push(QaInputFile::new(path.as_str(), RAW_FILES_GROUP));
        }
        document
    }

    fn run(document: &mut QaDocument) {
        let mut tool = FilePresenceCheckTool::new();
        let cancel = CancellationToken::new();
        let plugin_cancel = CancellationToken::new();
        let mut on_progress = |_: f32| {};
        let mut on_change = |_: &QaDocument| {};
        let mut ctx = RunContext::new(
            CheckToolOptions::new(),
            &cancel,
            &plugin_cancel,
            &mut on_progress,
            &mut on_change,
        );
        tool.run(document, &mut ctx).unwrap();
    }

    #[test]
    fn test_reports_missing_and_empty_files() {
        let temp_dir = TempDir::new().unwrap();
        let good = temp_dir.path().join("line.all");
        let empty = temp_dir.path().join("empty.all");
        fs::write(&good, b"ping").unwrap();
        fs::write(&empty, b"").unwrap();
        let missing = temp_dir.path().join("missing.all");

        let paths: Vec<String> = [&good, &empty, &missing]
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        let mut document = document_with(&paths);
        run(&mut document);

        let outputs = document
            .check(DataLevel::RawData, FILE_PRESENCE_CHECK_ID)
            .unwrap()
            .outputs
            .clone()
            .unwrap();
        assert_eq!(outputs.check_state, Some(CheckState::Fail));
        assert_eq!(outputs.messages.len(), 2);

        let tool = FilePresenceCheckTool::new();
        let size = SummaryField::new(SUMMARY_SECTION, SUMMARY_SIZE);
        let exists = SummaryField::new(SUMMARY_SECTION, SUMMARY_EXISTS);
        assert_eq!(tool.summary_value(&size, &paths[0], &document), Some(json!(4)));
        assert_eq!(tool.summary_value(&exists, &paths[2], &document), Some(json!(false)));
        assert_eq!(tool.summary_value(&size, &paths[2], &document), None);
        assert_eq!(tool.summary_value(&size, "/unknown", &document), None);
    }

    #[test]
    fn test_absent_check_is_noop() {
        let mut document = QaDocument::new();
        run(&mut document);
        assert_eq!(document, QaDocument::new());
    }
}
