use crate::models::{
    CheckReference, CheckState, DataLevel, ExecutionStatus, FileType, QaCheckOutputs, QaDocument,
    QaExecution, QaParam, WILDCARD_EXTENSION,
};
use crate::plugins::builtin::{RAW_FILES_GROUP, SURVEY_DTMS_GROUP};
use crate::plugins::tool::{CheckTool, RunContext, RunError};
use chrono::Utc;
use serde_json::json;
use std::thread;
use std::time::Duration;

pub const RAW_CHECK_ID: &str = "7761e08b-1380-46fa-a7eb-f1f41db38541";
pub const PRODUCTS_CHECK_ID: &str = "f0b1e7a6-5c0a-4b0e-9f3c-1c4a8f6d2b90";

/// Simulated check tool.
///
/// Inspects every input file of its two checks, sleeping `delay_ms`
/// milliseconds (run option) per file to stand in for real work.
#[derive(Debug, Default)]
pub struct ExampleCheckTool;

impl ExampleCheckTool {
    pub fn new() -> Self {
        Self
    }

    fn delay(ctx: &RunContext<'_>) -> Result<Duration, RunError> {
        match ctx.option("delay_ms") {
            None => Ok(Duration::ZERO),
            Some(value) => value
                .as_u64()
                .map(Duration::from_millis)
                .ok_or_else(|| RunError::InvalidOption {
                    name: "delay_ms".to_string(),
                    message: format!("expected a non-negative integer, got {value}"),
                }),
        }
    }
}

impl CheckTool for ExampleCheckTool {
    fn name(&self) -> &str {
        "Example Check Tool"
    }

    fn description(&self) -> &str {
        "Simulated check tool that inspects each input file"
    }

    fn checks(&self) -> Vec<CheckReference> {
        vec![
            CheckReference::new(RAW_CHECK_ID, "Example raw data check", DataLevel::RawData, "1")
                .with_description("Visits every raw sonar file")
                .with_file_type(FileType::new("Kongsberg all", "all", RAW_FILES_GROUP))
                .with_file_type(FileType::new("Generic Sensor Format", "gsf", RAW_FILES_GROUP))
                .with_default_param(QaParam::new("Threshold", 0.5)),
            CheckReference::new(
                PRODUCTS_CHECK_ID,
                "Example survey product check",
                DataLevel::SurveyProducts,
                "1",
            )
            .with_description("Visits every gridded product")
            .with_file_type(FileType::new("Any grid", WILDCARD_EXTENSION, SURVEY_DTMS_GROUP))
            .with_default_param(QaParam::new("Minimum depth", json!(null))),
        ]
    }

    fn run(&mut self, document: &mut QaDocument, ctx: &mut RunContext<'_>) -> Result<(), RunError> {
        let delay = Self::delay(ctx)?;
        let checks = self.checks();

        let present: Vec<(DataLevel, String, Vec<String>)> = checks
            .iter()
            .filter_map(|c| {
                document.check(c.data_level, &c.id).map(|node| {
                    let files = node.inputs.files.iter().map(|f| f.path.clone()).collect();
                    (c.data_level, c.id.clone(), files)
                })
            })
            .collect();

        let total_units: usize = present.iter().map(|(_, _, files)| files.len().max(1)).sum();
        let mut done = 0usize;

        for (level, check_id, files) in present {
            if ctx.should_stop() {
                return Ok(());
            }

            let start = Utc::now();
            if let Some(check) = document.check_mut(level, &check_id) {
                check.set_execution_status(ExecutionStatus::Running, None);
            }
            ctx.document_changed(document);

            let mut messages = Vec::new();
            for path in &files {
                if ctx.should_stop() {
                    return Ok(());
                }
                thread::sleep(delay);
                messages.push(format!("Inspected {path}"));
                done += 1;
                ctx.report_progress(done as f32 / total_units as f32);
            }

            let check_state = if files.is_empty() {
                messages.push("No input files".to_string());
                done += 1;
                ctx.report_progress(done as f32 / total_units as f32);
                CheckState::Warning
            } else {
                CheckState::Pass
            };

            let outputs = QaCheckOutputs {
                execution: QaExecution {
                    start: Some(start),
                    end: Some(Utc::now()),
                    ..QaExecution::new(ExecutionStatus::Completed)
                },
                messages,
                data: json!({ "files_inspected": files.len() }),
                check_state: Some(check_state),
                extra: Default::default(),
            };
            if let Some(check) = document.check_mut(level, &check_id) {
                check.outputs = Some(outputs);
            }
            ctx.document_changed(document);
        }

        Ok(())
    }
}
