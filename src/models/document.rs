//! Typed model of the QA JSON document.
//!
//! The document shape is owned by an external schema. This module models the
//! parts the orchestration layer reads and writes: the root `qa` object, one
//! section per data level, and the check nodes inside each section. Check
//! nodes are kept in an [`IndexMap`] keyed by check id so that
//! get-or-create is an idempotent upsert that keeps display order, while the
//! serialized form stays the schema's ordered `checks` array.

use anyhow::{Context, Result};
use camino::Utf8Path;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;

/// Schema version written into newly initialized documents.
pub const QA_SCHEMA_VERSION: &str = "0.1.4";

/// Unmodeled members of a document object.
pub type Extra = serde_json::Map<String, serde_json::Value>;

/// Survey data maturity level a check is organized under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataLevel {
    RawData,
    SurveyProducts,
    ChartAdequacy,
}

impl DataLevel {
    pub const ALL: [DataLevel; 3] = [
        DataLevel::RawData,
        DataLevel::SurveyProducts,
        DataLevel::ChartAdequacy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DataLevel::RawData => "raw_data",
            DataLevel::SurveyProducts => "survey_products",
            DataLevel::ChartAdequacy => "chart_adequacy",
        }
    }
}

impl fmt::Display for DataLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named parameter value, used both for check defaults and check inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QaParam {
    pub name: String,
    pub value: serde_json::Value,
}

impl QaParam {
    pub fn new(name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A file attached to a check, tagged with the file group it was chosen for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QaInputFile {
    pub path: String,
    pub file_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Fields this model does not know about, kept for round-trips.
    #[serde(flatten)]
    pub extra: Extra,
}

impl QaInputFile {
    pub fn new(path: impl Into<String>, file_type: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            file_type: file_type.into(),
            description: None,
            extra: Extra::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QaCheckInfo {
    pub id: String,
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<QaCheckGroup>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QaCheckGroup {
    pub id: String,
    pub name: String,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QaCheckInputs {
    #[serde(default)]
    pub files: Vec<QaInputFile>,
    #[serde(default)]
    pub params: Vec<QaParam>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Aborted,
}

impl ExecutionStatus {
    /// Queued and running checks have not reached a final state.
    pub fn is_pending(&self) -> bool {
        matches!(self, ExecutionStatus::Queued | ExecutionStatus::Running)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckState {
    Pass,
    Fail,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QaExecution {
    pub status: ExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

impl QaExecution {
    pub fn new(status: ExecutionStatus) -> Self {
        Self {
            status,
            start: None,
            end: None,
            error: None,
            extra: Extra::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QaCheckOutputs {
    pub execution: QaExecution,
    #[serde(default)]
    pub messages: Vec<String>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_state: Option<CheckState>,
    #[serde(flatten)]
    pub extra: Extra,
}

impl QaCheckOutputs {
    /// Outputs carrying only an execution status.
    pub fn with_status(status: ExecutionStatus) -> Self {
        Self {
            execution: QaExecution::new(status),
            messages: Vec::new(),
            data: serde_json::Value::Null,
            check_state: None,
            extra: Extra::new(),
        }
    }
}

/// A single check node in the document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QaCheck {
    pub info: QaCheckInfo,
    #[serde(default)]
    pub inputs: QaCheckInputs,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<QaCheckOutputs>,
    #[serde(flatten)]
    pub extra: Extra,
}

impl QaCheck {
    pub fn new(info: QaCheckInfo) -> Self {
        Self {
            info,
            inputs: QaCheckInputs::default(),
            outputs: None,
            extra: Extra::new(),
        }
    }

    pub fn execution_status(&self) -> Option<ExecutionStatus> {
        self.outputs.as_ref().map(|o| o.execution.status)
    }

    /// Replace the outputs with a bare execution status.
    pub fn set_execution_status(&mut self, status: ExecutionStatus, error: Option<String>) {
        let mut outputs = QaCheckOutputs::with_status(status);
        outputs.execution.error = error;
        self.outputs = Some(outputs);
    }
}

/// Checks of one data level.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataLevelSection {
    #[serde(with = "checks_as_list", default)]
    pub checks: IndexMap<String, QaCheck>,
    #[serde(flatten)]
    pub extra: Extra,
}

impl DataLevelSection {
    pub fn check(&self, id: &str) -> Option<&QaCheck> {
        self.checks.get(id)
    }

    pub fn check_mut(&mut self, id: &str) -> Option<&mut QaCheck> {
        self.checks.get_mut(id)
    }

    /// Get the check with `info.id`, inserting it at the end if absent.
    ///
    /// Returns the node and whether it was created.
    pub fn upsert_check(&mut self, info: QaCheckInfo) -> (&mut QaCheck, bool) {
        let created = !self.checks.contains_key(&info.id);
        let check = self
            .checks
            .entry(info.id.clone())
            .or_insert_with(|| QaCheck::new(info));
        (check, created)
    }
}

/// Root `qa` object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QaRoot {
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_data: Option<DataLevelSection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub survey_products: Option<DataLevelSection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chart_adequacy: Option<DataLevelSection>,
    #[serde(flatten)]
    pub extra: Extra,
}

impl QaRoot {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            raw_data: None,
            survey_products: None,
            chart_adequacy: None,
            extra: Extra::new(),
        }
    }

    fn slot(&self, level: DataLevel) -> &Option<DataLevelSection> {
        match level {
            DataLevel::RawData => &self.raw_data,
            DataLevel::SurveyProducts => &self.survey_products,
            DataLevel::ChartAdequacy => &self.chart_adequacy,
        }
    }

    fn slot_mut(&mut self, level: DataLevel) -> &mut Option<DataLevelSection> {
        match level {
            DataLevel::RawData => &mut self.raw_data,
            DataLevel::SurveyProducts => &mut self.survey_products,
            DataLevel::ChartAdequacy => &mut self.chart_adequacy,
        }
    }

    pub fn data_level(&self, level: DataLevel) -> Option<&DataLevelSection> {
        self.slot(level).as_ref()
    }

    pub fn data_level_mut(&mut self, level: DataLevel) -> Option<&mut DataLevelSection> {
        self.slot_mut(level).as_mut()
    }

    pub fn ensure_data_level(&mut self, level: DataLevel) -> &mut DataLevelSection {
        self.slot_mut(level).get_or_insert_with(DataLevelSection::default)
    }

    /// Populated data levels, in schema order.
    pub fn data_levels(&self) -> impl Iterator<Item = (DataLevel, &DataLevelSection)> {
        DataLevel::ALL
            .into_iter()
            .filter_map(|level| self.data_level(level).map(|section| (level, section)))
    }
}

/// The QA JSON document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QaDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qa: Option<QaRoot>,
    #[serde(flatten)]
    pub extra: Extra,
}

impl QaDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the root section, initializing it with the current schema version.
    pub fn ensure_root(&mut self) -> &mut QaRoot {
        self.qa.get_or_insert_with(|| QaRoot::new(QA_SCHEMA_VERSION))
    }

    pub fn data_level(&self, level: DataLevel) -> Option<&DataLevelSection> {
        self.qa.as_ref().and_then(|qa| qa.data_level(level))
    }

    pub fn check(&self, level: DataLevel, id: &str) -> Option<&QaCheck> {
        self.data_level(level).and_then(|section| section.check(id))
    }

    pub fn check_mut(&mut self, level: DataLevel, id: &str) -> Option<&mut QaCheck> {
        self.qa
            .as_mut()
            .and_then(|qa| qa.data_level_mut(level))
            .and_then(|section| section.check_mut(id))
    }

    /// Every check node, in data level then insertion order.
    pub fn checks(&self) -> impl Iterator<Item = (DataLevel, &QaCheck)> {
        self.qa.iter().flat_map(|qa| {
            qa.data_levels()
                .flat_map(|(level, section)| section.checks.values().map(move |c| (level, c)))
        })
    }

    /// Set every queued or running check to `status`, returning how many
    /// changed.
    pub fn finish_pending_checks(&mut self, status: ExecutionStatus, error: Option<&str>) -> usize {
        let Some(qa) = self.qa.as_mut() else {
            return 0;
        };
        let mut changed = 0;
        for level in DataLevel::ALL {
            let Some(section) = qa.data_level_mut(level) else {
                continue;
            };
            for check in section.checks.values_mut() {
                if check.execution_status().is_some_and(|s| s.is_pending()) {
                    check.set_execution_status(status, error.map(str::to_string));
                    changed += 1;
                }
            }
        }
        changed
    }

    /// Input file paths across all checks, first-seen order, no repeats.
    pub fn input_file_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = Vec::new();
        for (_, check) in self.checks() {
            for file in &check.inputs.files {
                if !paths.contains(&file.path) {
                    paths.push(file.path.clone());
                }
            }
        }
        paths
    }

    pub fn load(path: &Utf8Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read QA document: {}", path))?;
        let document = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse QA document: {}", path))?;
        tracing::debug!("Loaded QA document from {}", path);
        Ok(document)
    }

    pub fn save(&self, path: &Utf8Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize QA document")?;
        fs::write(path, json).with_context(|| format!("Failed to write QA document: {}", path))?;
        tracing::info!("Saved QA document to {}", path);
        Ok(())
    }
}

/// Serializes the id-keyed check map as the schema's ordered array.
mod checks_as_list {
    use super::QaCheck;
    use indexmap::IndexMap;
    use indexmap::map::Entry;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(checks: &IndexMap<String, QaCheck>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_seq(checks.values())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<IndexMap<String, QaCheck>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let list = Vec::<QaCheck>::deserialize(deserializer)?;
        let mut checks = IndexMap::with_capacity(list.len());
        for check in list {
            match checks.entry(check.info.id.clone()) {
                Entry::Occupied(entry) => {
                    return Err(D::Error::custom(format!("duplicate check id '{}'", entry.key())));
                }
                Entry::Vacant(entry) => {
                    entry.insert(check);
                }
            }
        }
        Ok(checks)
    }
}
