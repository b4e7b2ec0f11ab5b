//! Keeps a QA document in step with the check tools of a profile.
//!
//! The binder creates check nodes for declared checks, attaches user files
//! and parameters to the checks that accept them, and applies specification
//! presets. It never writes check outputs; those belong to the check tools and
//! the executor.
//!
//! Invalid combinations (unknown check ids, unsupported files) are silent
//! no-ops, logged at debug level.

use crate::models::{FileGroup, QaDocument, QaInputFile, QaParam, Specification};
use crate::plugins::CheckToolPlugin;
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A user-selected file and the file group it was attached under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAttachment {
    pub path: Utf8PathBuf,
    pub group: String,
}

impl FileAttachment {
    pub fn new(path: impl Into<Utf8PathBuf>, group: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            group: group.into(),
        }
    }
}

/// Ensure the document has a node for every check of `plugin`.
///
/// Initializes the root section and any missing data level. Existing nodes
/// are left untouched, so repeated calls add nothing. Returns the number of
/// nodes created.
pub fn update_qa_json(plugin: &CheckToolPlugin, document: &mut QaDocument) -> usize {
    let root = document.ensure_root();
    let mut created = 0;

    for check in plugin.checks() {
        let section = root.ensure_data_level(check.data_level);
        if section.upsert_check(check.to_info()).1 {
            created += 1;
        }
    }

    if created > 0 {
        tracing::debug!("Added {} checks for check tool '{}'", created, plugin.name());
    }
    created
}

/// Attach each file to every existing check of `plugin` that supports it.
///
/// Check nodes are not created here. Returns the number of attachments made.
pub fn update_qa_json_input_files(
    plugin: &CheckToolPlugin,
    document: &mut QaDocument,
    files: &[FileAttachment],
) -> usize {
    let mut attached = 0;

    for check_ref in plugin.checks() {
        let Some(check) = document.check_mut(check_ref.data_level, &check_ref.id) else {
            continue;
        };
        for file in files {
            if check_ref.supports_file(&file.path, &file.group) {
                check
                    .inputs
                    .files
                    .push(QaInputFile::new(file.path.as_str(), file.group.as_str()));
                attached += 1;
            }
        }
    }

    if attached < files.len() {
        tracing::debug!(
            "Check tool '{}' accepted {} attachments for {} files",
            plugin.name(),
            attached,
            files.len()
        );
    }
    attached
}

/// Append `params` to the input params of check `check_id`.
///
/// No-op (returns false) if `plugin` does not declare the check or the
/// document has no node for it.
pub fn update_qa_json_input_params(
    plugin: &CheckToolPlugin,
    document: &mut QaDocument,
    check_id: &str,
    params: &[QaParam],
) -> bool {
    let Some(check_ref) = plugin.check(check_id) else {
        return false;
    };
    match document.check_mut(check_ref.data_level, check_id) {
        Some(check) => {
            check.inputs.params.extend(params.iter().cloned());
            true
        }
        None => {
            tracing::debug!("Check {} not in document, params ignored", check_id);
            false
        }
    }
}

/// Reset the params of every present check of `plugin` to its defaults, then
/// overlay `specification`'s overrides.
///
/// An override replaces the value of a param with the same name or appends a
/// new param. Returns the number of checks updated.
pub fn apply_specification(
    plugin: &CheckToolPlugin,
    document: &mut QaDocument,
    specification: &Specification,
) -> usize {
    let mut updated = 0;

    for check_ref in plugin.checks() {
        let Some(check) = document.check_mut(check_ref.data_level, &check_ref.id) else {
            continue;
        };

        let mut params = check_ref.default_params.clone();
        for check_override in specification
            .checks
            .iter()
            .filter(|o| o.matches(&check_ref.id, &check_ref.name))
        {
            for param in &check_override.parameters {
                match params.iter_mut().find(|p| p.name == param.name) {
                    Some(existing) => existing.value = param.value.clone(),
                    None => params.push(QaParam::new(param.name.clone(), param.value.clone())),
                }
            }
        }

        check.inputs.params = params;
        updated += 1;
    }

    tracing::debug!(
        "Applied specification '{}' to {} checks of '{}'",
        specification.name,
        updated,
        plugin.name()
    );
    updated
}

/// The check tools of one profile, in profile order.
///
/// Each operation applies the single-plugin operation for every plugin in
/// order against the same document.
#[derive(Debug, Clone, Default)]
pub struct ProfilePlugins {
    plugins: Vec<Arc<CheckToolPlugin>>,
}

impl ProfilePlugins {
    pub fn new(plugins: Vec<Arc<CheckToolPlugin>>) -> Self {
        Self { plugins }
    }

    pub fn plugins(&self) -> &[Arc<CheckToolPlugin>] {
        &self.plugins
    }

    pub fn update_qa_json(&self, document: &mut QaDocument) -> usize {
        self.plugins
            .iter()
            .map(|plugin| update_qa_json(plugin, document))
            .sum()
    }

    pub fn update_qa_json_input_files(&self, document: &mut QaDocument, files: &[FileAttachment]) -> usize {
        self.plugins
            .iter()
            .map(|plugin| update_qa_json_input_files(plugin, document, files))
            .sum()
    }

    /// Append params to `check_id` in whichever plugin owns it.
    pub fn update_qa_json_input_params(
        &self,
        document: &mut QaDocument,
        check_id: &str,
        params: &[QaParam],
    ) -> bool {
        let mut applied = false;
        for plugin in &self.plugins {
            applied |= update_qa_json_input_params(plugin, document, check_id, params);
        }
        applied
    }

    pub fn apply_specification(&self, document: &mut QaDocument, specification: &Specification) -> usize {
        self.plugins
            .iter()
            .map(|plugin| apply_specification(plugin, document, specification))
            .sum()
    }

    /// File groups accepted across all plugins, merged by group name.
    pub fn file_groups(&self) -> Vec<FileGroup> {
        FileGroup::merge(self.plugins.iter().flat_map(|p| p.file_groups()))
    }

    /// Plugins with at least one check accepting `path` under `group`.
    pub fn plugins_for_file(&self, path: &Utf8Path, group: &str) -> Vec<Arc<CheckToolPlugin>> {
        self.plugins
            .iter()
            .filter(|p| p.accepts(path, group))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        CheckOverride, CheckReference, CheckSelector, CheckToolConfig, DataLevel, FileType,
        ParamOverride, QaCheckInputs,
    };
    use crate::plugins::{CheckTool, RunContext, RunError};
    use serde_json::json;

    struct Declared(Vec<CheckReference>);

    impl CheckTool for Declared {
        fn name(&self) -> &str {
            "Declared"
        }

        fn checks(&self) -> Vec<CheckReference> {
            self.0.clone()
        }

        fn run(&mut self, _: &mut QaDocument, _: &mut RunContext<'_>) -> Result<(), RunError> {
            Ok(())
        }
    }

    fn plugin(class_id: &str, checks: Vec<CheckReference>) -> Arc<CheckToolPlugin> {
        let config = CheckToolConfig {
            name: class_id.to_string(),
            description: String::new(),
            plugin_class: class_id.to_string(),
            icon: None,
        };
        Arc::new(CheckToolPlugin::new(Box::new(Declared(checks)), "Default", &config))
    }

    fn c1() -> CheckReference {
        CheckReference::new("c1", "Check one", DataLevel::RawData, "1")
            .with_file_type(FileType::new("BAG", "bag", "Survey DTMs"))
            .with_default_param(QaParam::new("threshold", 1))
            .with_default_param(QaParam::new("mode", "strict"))
    }

    #[test]
    fn test_update_qa_json_creates_only_declared_levels() {
        let tool = plugin("tests.a.A", vec![c1()]);
        let mut document = QaDocument::new();

        assert_eq!(update_qa_json(&tool, &mut document), 1);

        let value = serde_json::to_value(&document).unwrap();
        let checks = value["qa"]["raw_data"]["checks"].as_array().unwrap();
        assert_eq!(checks.len(), 1);
        assert_eq!(checks[0]["info"]["id"], "c1");
        assert!(value["qa"].get("survey_products").is_none());
        assert!(value["qa"].get("chart_adequacy").is_none());

        let check = document.check(DataLevel::RawData, "c1").unwrap();
        assert_eq!(check.inputs, QaCheckInputs::default());
        assert!(check.outputs.is_none());
    }

    #[test]
    fn test_update_qa_json_is_idempotent() {
        let tool = plugin("tests.a.A", vec![c1()]);
        let mut document = QaDocument::new();

        update_qa_json(&tool, &mut document);
        let once = document.clone();
        assert_eq!(update_qa_json(&tool, &mut document), 0);
        assert_eq!(document, once);
    }

    #[test]
    fn test_input_files_attach_only_supported() {
        let tool = plugin("tests.a.A", vec![c1()]);
        let mut document = QaDocument::new();
        update_qa_json(&tool, &mut document);

        let attached = update_qa_json_input_files(
            &tool,
            &mut document,
            &[FileAttachment::new("/x/file.bag", "Survey DTMs")],
        );
        assert_eq!(attached, 1);

        let value = serde_json::to_value(&document).unwrap();
        assert_eq!(
            value["qa"]["raw_data"]["checks"][0]["inputs"]["files"],
            json!([{"path": "/x/file.bag", "file_type": "Survey DTMs"}])
        );

        let before = document.clone();
        let attached = update_qa_json_input_files(
            &tool,
            &mut document,
            &[FileAttachment::new("/x/file.tif", "Survey DTMs")],
        );
        assert_eq!(attached, 0);
        assert_eq!(document, before);
    }

    #[test]
    fn test_input_files_never_create_checks() {
        let tool = plugin("tests.a.A", vec![c1()]);
        let mut document = QaDocument::new();

        let attached = update_qa_json_input_files(
            &tool,
            &mut document,
            &[FileAttachment::new("/x/file.bag", "Survey DTMs")],
        );
        assert_eq!(attached, 0);
        assert!(document.qa.is_none());
    }

    #[test]
    fn test_file_attaches_to_every_supporting_check() {
        let c2 = CheckReference::new("c2", "Check two", DataLevel::SurveyProducts, "1")
            .with_file_type(FileType::new("Any", "*", "Survey DTMs"));
        let tool = plugin("tests.a.A", vec![c1(), c2]);
        let mut document = QaDocument::new();
        update_qa_json(&tool, &mut document);

        let attached = update_qa_json_input_files(
            &tool,
            &mut document,
            &[FileAttachment::new("/x/file.bag", "Survey DTMs")],
        );
        assert_eq!(attached, 2);
    }

    #[test]
    fn test_input_params() {
        let tool = plugin("tests.a.A", vec![c1()]);
        let other = plugin("tests.b.B", vec![CheckReference::new("c9", "Nine", DataLevel::RawData, "1")]);
        let mut document = QaDocument::new();
        update_qa_json(&tool, &mut document);
        update_qa_json(&other, &mut document);

        let params = [QaParam::new("threshold", 3)];
        assert!(update_qa_json_input_params(&tool, &mut document, "c1", &params));
        assert!(!update_qa_json_input_params(&tool, &mut document, "c9", &params));
        assert!(!update_qa_json_input_params(&tool, &mut document, "missing", &params));

        assert_eq!(document.check(DataLevel::RawData, "c1").unwrap().inputs.params.len(), 1);
        assert!(document.check(DataLevel::RawData, "c9").unwrap().inputs.params.is_empty());
    }

    #[test]
    fn test_apply_specification() {
        let tool = plugin("tests.a.A", vec![c1()]);
        let mut document = QaDocument::new();
        update_qa_json(&tool, &mut document);

        let spec = Specification {
            name: "Order 1a".to_string(),
            description: String::new(),
            checks: vec![
                CheckOverride {
                    check: CheckSelector::Name("Check one".to_string()),
                    parameters: vec![
                        ParamOverride { name: "threshold".to_string(), value: json!(0.25) },
                        ParamOverride { name: "extra".to_string(), value: json!(true) },
                    ],
                },
                CheckOverride {
                    check: CheckSelector::Id("unknown".to_string()),
                    parameters: vec![ParamOverride { name: "x".to_string(), value: json!(1) }],
                },
            ],
        };

        assert_eq!(apply_specification(&tool, &mut document, &spec), 1);
        let params = &document.check(DataLevel::RawData, "c1").unwrap().inputs.params;
        assert_eq!(
            params,
            &vec![
                QaParam::new("threshold", 0.25),
                QaParam::new("mode", "strict"),
                QaParam::new("extra", true),
            ]
        );
    }

    #[test]
    fn test_profile_plugins_shared_data_level() {
        let a = plugin("tests.a.A", vec![c1()]);
        let b = plugin(
            "tests.b.B",
            vec![
                CheckReference::new("c2", "Two", DataLevel::RawData, "1")
                    .with_file_type(FileType::new("BAG", "bag", "Survey DTMs"))
                    .with_file_type(FileType::new("all", "all", "Raw Files")),
            ],
        );
        let profile = ProfilePlugins::new(vec![a, b]);
        let mut document = QaDocument::new();

        assert_eq!(profile.update_qa_json(&mut document), 2);
        assert_eq!(profile.update_qa_json(&mut document), 0);

        let ids: Vec<_> = document
            .data_level(DataLevel::RawData)
            .unwrap()
            .checks
            .keys()
            .cloned()
            .collect();
        assert_eq!(ids, vec!["c1", "c2"]);

        let groups = profile.file_groups();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].name, "Survey DTMs");
        assert_eq!(groups[0].file_types.len(), 1);

        let routed = profile.plugins_for_file(Utf8Path::new("/x/l.all"), "Raw Files");
        assert_eq!(routed.len(), 1);
        assert_eq!(routed[0].class_id(), "tests.b.B");
    }
}
