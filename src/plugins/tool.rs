use crate::models::{CheckReference, CheckToolConfig, FileGroup, QaDocument};
use crate::plugins::cancel::CancellationToken;
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

/// Run-time options handed to a check tool for one run.
pub type CheckToolOptions = IndexMap<String, serde_json::Value>;

/// Errors a check tool may return from [`CheckTool::run`].
#[derive(Error, Debug)]
pub enum RunError {
    #[error("Invalid option '{name}': {message}")]
    InvalidOption { name: String, message: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Failed(String),
}

/// A (section, field) pair a check tool can fill in a cross-file summary.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SummaryField {
    pub section: String,
    pub field: String,
}

impl SummaryField {
    pub fn new(section: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            section: section.into(),
            field: field.into(),
        }
    }
}

/// Capabilities handed to a check tool while it runs.
pub struct RunContext<'a> {
    options: CheckToolOptions,
    suite_cancel: &'a CancellationToken,
    plugin_cancel: &'a CancellationToken,
    progress: &'a mut dyn FnMut(f32),
    document_changed: &'a mut dyn FnMut(&QaDocument),
    last_progress: f32,
}

impl<'a> RunContext<'a> {
    pub fn new(
        options: CheckToolOptions,
        suite_cancel: &'a CancellationToken,
        plugin_cancel: &'a CancellationToken,
        progress: &'a mut dyn FnMut(f32),
        document_changed: &'a mut dyn FnMut(&QaDocument),
    ) -> Self {
        Self {
            options,
            suite_cancel,
            plugin_cancel,
            progress,
            document_changed,
            last_progress: 0.0,
        }
    }

    pub fn options(&self) -> &CheckToolOptions {
        &self.options
    }

    pub fn option(&self, name: &str) -> Option<&serde_json::Value> {
        self.options.get(name)
    }

    /// Report progress in `[0, 1]`.
    ///
    /// Values are clamped, and a value below the last reported one is
    /// ignored so observers only ever see non-decreasing progress.
    pub fn report_progress(&mut self, fraction: f32) {
        if fraction.is_nan() {
            return;
        }
        let fraction = fraction.clamp(0.0, 1.0);
        if fraction < self.last_progress {
            return;
        }
        self.last_progress = fraction;
        (self.progress)(fraction);
    }

    /// Tell the host that `document` was mutated.
    pub fn document_changed(&mut self, document: &QaDocument) {
        (self.document_changed)(document);
    }

    /// True once the suite or this check tool has been asked to stop.
    pub fn should_stop(&self) -> bool {
        self.suite_cancel.is_cancelled() || self.plugin_cancel.is_cancelled()
    }
}

/// Contract every check tool implementation satisfies.
///
/// `run` iterates the tool's own checks over the document. It must poll
/// [`RunContext::should_stop`] at least once per unit of work and return
/// promptly when it is true, and it writes each check's outputs in one step
/// so a stopped run never leaves a half-written check.
pub trait CheckTool: Send {
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// Checks this tool implements. Must be deterministic.
    fn checks(&self) -> Vec<CheckReference>;

    fn run(&mut self, document: &mut QaDocument, ctx: &mut RunContext<'_>) -> Result<(), RunError>;

    fn summary_details(&self) -> Vec<SummaryField> {
        Vec::new()
    }

    fn summary_value(
        &self,
        _field: &SummaryField,
        _filename: &str,
        _document: &QaDocument,
    ) -> Option<serde_json::Value> {
        None
    }
}

/// A loaded check tool bound to the profile that registered it.
///
/// Name, description and icon come from the profile's check tool entry when
/// set there, otherwise from the implementation. The declared checks are read
/// once at load time.
pub struct CheckToolPlugin {
    profile_name: String,
    class_id: String,
    name: String,
    description: String,
    icon: Option<String>,
    checks: Vec<CheckReference>,
    options: Mutex<CheckToolOptions>,
    cancel: CancellationToken,
    tool: Mutex<Box<dyn CheckTool>>,
}

impl std::fmt::Debug for CheckToolPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckToolPlugin")
            .field("profile_name", &self.profile_name)
            .field("class_id", &self.class_id)
            .field("name", &self.name)
            .field("checks", &self.checks.len())
            .finish()
    }
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl CheckToolPlugin {
    pub fn new(tool: Box<dyn CheckTool>, profile_name: &str, config: &CheckToolConfig) -> Self {
        let name = if config.name.is_empty() {
            tool.name().to_string()
        } else {
            config.name.clone()
        };
        let description = if config.description.is_empty() {
            tool.description().to_string()
        } else {
            config.description.clone()
        };
        let icon = config.icon.clone().filter(|icon| !icon.is_empty());

        Self {
            profile_name: profile_name.to_string(),
            class_id: config.plugin_class.clone(),
            name,
            description,
            icon,
            checks: tool.checks(),
            options: Mutex::new(CheckToolOptions::new()),
            cancel: CancellationToken::new(),
            tool: Mutex::new(tool),
        }
    }

    pub fn profile_name(&self) -> &str {
        &self.profile_name
    }

    pub fn class_id(&self) -> &str {
        &self.class_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn icon(&self) -> Option<&str> {
        self.icon.as_deref()
    }

    pub fn checks(&self) -> &[CheckReference] {
        &self.checks
    }

    pub fn check(&self, check_id: &str) -> Option<&CheckReference> {
        self.checks.iter().find(|c| c.id == check_id)
    }

    pub fn owns_check(&self, check_id: &str) -> bool {
        self.check(check_id).is_some()
    }

    pub fn options(&self) -> CheckToolOptions {
        lock(&self.options).clone()
    }

    pub fn set_options(&self, options: CheckToolOptions) {
        *lock(&self.options) = options;
    }

    /// Ask a running `run` to return. Safe to call at any time.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// File groups accepted by any of this tool's checks.
    pub fn file_groups(&self) -> Vec<FileGroup> {
        FileGroup::merge(self.checks.iter().flat_map(|c| c.file_groups()))
    }

    /// True if any check of this tool accepts `path` under `group`.
    pub fn accepts(&self, path: &Utf8Path, group: &str) -> bool {
        self.checks.iter().any(|c| c.supports_file(path, group))
    }

    /// Run the implementation against `document`.
    ///
    /// Clears a stop request left over from an earlier run before starting.
    pub fn run<'a>(
        &'a self,
        document: &mut QaDocument,
        suite_cancel: &'a CancellationToken,
        progress: &'a mut dyn FnMut(f32),
        document_changed: &'a mut dyn FnMut(&QaDocument),
    ) -> Result<(), RunError> {
        self.cancel.reset();
        let mut ctx = RunContext::new(
            self.options(),
            suite_cancel,
            &self.cancel,
            progress,
            document_changed,
        );

        let mut tool = lock(&self.tool);
        tool.run(document, &mut ctx)
    }

    pub fn summary_details(&self) -> Vec<SummaryField> {
        lock(&self.tool).summary_details()
    }

    pub fn summary_value(
        &self,
        field: &SummaryField,
        filename: &str,
        document: &QaDocument,
    ) -> Option<serde_json::Value> {
        lock(&self.tool).summary_value(field, filename, document)
    }
}
