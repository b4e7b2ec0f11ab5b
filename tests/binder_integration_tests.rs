//! Integration tests for the QA document binder
//!
//! These tests verify, from profile documents on disk through to the JSON
//! written back out:
//! - Check node creation and idempotence
//! - File attachment filtered by supported file types
//! - Specification presets
//! - Saving and reloading documents

use camino::{Utf8Path, Utf8PathBuf};
use qax::binder::{self, FileAttachment};
use qax::models::QaParam;
use qax::plugins::builtin::example::{PRODUCTS_CHECK_ID, RAW_CHECK_ID};
use qax::plugins::builtin::{EXAMPLE_CLASS_ID, RAW_FILES_GROUP, SURVEY_DTMS_GROUP};
use qax::{ConfigModel, DataLevel, PluginCatalog, PluginRegistry, ProfilePlugins, QaDocument};
use serde_json::json;
use std::fs;
use tempfile::TempDir;

const PROFILE_YAML: &str = r#"
name: Default
checkTools:
  - name: Tool A
    pluginClass: qax.plugins.example.ExampleCheckTool
  - name: Presence
    pluginClass: qax.plugins.file_presence.FilePresenceCheckTool
specifications:
  - name: Strict
    checks:
      - checkId: 7761e08b-1380-46fa-a7eb-f1f41db38541
        parameters:
          - name: Threshold
            value: 0.1
          - name: Beams
            value: 256
"#;

fn load_profile_plugins() -> (TempDir, ConfigModel, ProfilePlugins) {
    let temp_dir = TempDir::new().unwrap();
    let config_path = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
    fs::write(config_path.join("default.yaml"), PROFILE_YAML).unwrap();

    let config = ConfigModel::load(&config_path).unwrap();
    let registry = PluginRegistry::load(&config, &PluginCatalog::builtin());
    let plugins = ProfilePlugins::new(registry.get_profile_plugins(config.profile("Default").unwrap()));
    (temp_dir, config, plugins)
}

#[test]
fn test_single_plugin_populates_only_its_levels() {
    let (_temp_dir, config, _) = load_profile_plugins();
    let registry = PluginRegistry::load(&config, &PluginCatalog::builtin());
    let tool_a = registry.get_plugin("Default", EXAMPLE_CLASS_ID).unwrap();

    let mut document = QaDocument::new();
    binder::update_qa_json(&tool_a, &mut document);

    let value = serde_json::to_value(&document).unwrap();
    assert_eq!(value["qa"]["raw_data"]["checks"][0]["info"]["id"], RAW_CHECK_ID);
    assert_eq!(value["qa"]["survey_products"]["checks"][0]["info"]["id"], PRODUCTS_CHECK_ID);
    assert!(value["qa"].get("chart_adequacy").is_none());
    assert_eq!(value["qa"]["version"], qax::models::QA_SCHEMA_VERSION);
}

#[test]
fn test_profile_update_is_idempotent() {
    let (_temp_dir, _config, plugins) = load_profile_plugins();
    let mut document = QaDocument::new();

    assert_eq!(plugins.update_qa_json(&mut document), 3);
    let once = document.checks().count();
    assert_eq!(plugins.update_qa_json(&mut document), 0);
    assert_eq!(document.checks().count(), once);

    // Both tools share the raw_data level without duplicating it.
    assert_eq!(document.data_level(DataLevel::RawData).unwrap().checks.len(), 2);
}

#[test]
fn test_files_routed_by_group_and_extension() {
    let (_temp_dir, _config, plugins) = load_profile_plugins();
    let mut document = QaDocument::new();
    plugins.update_qa_json(&mut document);

    let attached = plugins.update_qa_json_input_files(
        &mut document,
        &[
            FileAttachment::new("/survey/line1.all", RAW_FILES_GROUP),
            FileAttachment::new("/survey/line1.xyz", RAW_FILES_GROUP),
            FileAttachment::new("/survey/grid.bag", SURVEY_DTMS_GROUP),
        ],
    );
    // line1.all: example raw + presence; line1.xyz: presence only;
    // grid.bag: example products + presence.
    assert_eq!(attached, 5);

    let raw = document.check(DataLevel::RawData, RAW_CHECK_ID).unwrap();
    let paths: Vec<_> = raw.inputs.files.iter().map(|f| f.path.as_str()).collect();
    assert_eq!(paths, vec!["/survey/line1.all"]);

    let products = document.check(DataLevel::SurveyProducts, PRODUCTS_CHECK_ID).unwrap();
    assert_eq!(
        serde_json::to_value(&products.inputs.files).unwrap(),
        json!([{"path": "/survey/grid.bag", "file_type": "Survey DTMs"}])
    );

    let routed = plugins.plugins_for_file(Utf8Path::new("/survey/line1.xyz"), RAW_FILES_GROUP);
    assert_eq!(routed.len(), 1);
    assert_eq!(routed[0].name(), "Presence");
}

#[test]
fn test_specification_and_params() {
    let (_temp_dir, config, plugins) = load_profile_plugins();
    let spec = config.profile("Default").unwrap().specification("Strict").unwrap();
    let mut document = QaDocument::new();
    plugins.update_qa_json(&mut document);

    assert_eq!(plugins.apply_specification(&mut document, spec), 3);
    let raw = document.check(DataLevel::RawData, RAW_CHECK_ID).unwrap();
    assert_eq!(
        raw.inputs.params,
        vec![QaParam::new("Threshold", 0.1), QaParam::new("Beams", 256)]
    );

    // Products check keeps its defaults.
    let products = document.check(DataLevel::SurveyProducts, PRODUCTS_CHECK_ID).unwrap();
    assert_eq!(products.inputs.params.len(), 1);

    assert!(plugins.update_qa_json_input_params(
        &mut document,
        RAW_CHECK_ID,
        &[QaParam::new("Operator", "survey team")]
    ));
    assert!(!plugins.update_qa_json_input_params(&mut document, "unknown-check", &[]));
    assert_eq!(document.check(DataLevel::RawData, RAW_CHECK_ID).unwrap().inputs.params.len(), 3);
}

#[test]
fn test_save_and_reload() {
    let (temp_dir, _config, plugins) = load_profile_plugins();
    let path = Utf8PathBuf::try_from(temp_dir.path().join("qa.json")).unwrap();

    let mut document = QaDocument::new();
    plugins.update_qa_json(&mut document);
    plugins.update_qa_json_input_files(&mut document, &[FileAttachment::new("/survey/line1.gsf", RAW_FILES_GROUP)]);
    document.save(&path).unwrap();

    let reloaded = QaDocument::load(&path).unwrap();
    assert_eq!(reloaded, document);
    assert_eq!(reloaded.input_file_paths(), vec!["/survey/line1.gsf"]);
}
