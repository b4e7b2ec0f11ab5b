use crate::plugins::tool::CheckTool;
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, LazyLock};
use thiserror::Error;

/// `module.path.ClassName`: at least one module segment and a class name.
static CLASS_ID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)+$")
        .expect("Invalid plugin class regex")
});

/// Constructs a fresh check tool implementation.
pub type CheckToolFactory = Arc<dyn Fn() -> Box<dyn CheckTool> + Send + Sync>;

/// Reasons a plugin class identifier cannot be resolved.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PluginLoadError {
    #[error("Check tool has no plugin class identifier")]
    MissingClassIdentifier,

    #[error("Invalid plugin class identifier '{0}': expected module.path.ClassName")]
    InvalidClassIdentifier(String),

    #[error("Plugin module '{module}' not found")]
    ModuleNotFound { module: String },

    #[error("Plugin class '{class}' not found in module '{module}'")]
    ClassNotFound { module: String, class: String },
}

/// Split `module.path.ClassName` into its module path and class name.
pub fn split_class_id(class_id: &str) -> Result<(&str, &str), PluginLoadError> {
    if class_id.trim().is_empty() {
        return Err(PluginLoadError::MissingClassIdentifier);
    }
    if !CLASS_ID_PATTERN.is_match(class_id) {
        return Err(PluginLoadError::InvalidClassIdentifier(class_id.to_string()));
    }
    // The pattern guarantees at least one dot.
    match class_id.rsplit_once('.') {
        Some(parts) => Ok(parts),
        None => Err(PluginLoadError::InvalidClassIdentifier(class_id.to_string())),
    }
}

/// Statically registered check tool implementations, keyed by module path
/// and class name.
///
/// This is the extension point for new check tools: register a factory under
/// a class identifier and reference that identifier from a profile.
#[derive(Clone, Default)]
pub struct PluginCatalog {
    modules: BTreeMap<String, BTreeMap<String, CheckToolFactory>>,
}

impl fmt::Debug for PluginCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.class_ids()).finish()
    }
}

impl PluginCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog holding the check tools shipped with QAX.
    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        crate::plugins::builtin::register(&mut catalog);
        catalog
    }

    /// Register `factory` under `class_id`, replacing any earlier entry.
    pub fn register<F>(&mut self, class_id: &str, factory: F) -> Result<(), PluginLoadError>
    where
        F: Fn() -> Box<dyn CheckTool> + Send + Sync + 'static,
    {
        let (module, class) = split_class_id(class_id)?;
        self.modules
            .entry(module.to_string())
            .or_default()
            .insert(class.to_string(), Arc::new(factory));
        tracing::debug!("Registered check tool class {}", class_id);
        Ok(())
    }

    pub fn resolve(&self, class_id: &str) -> Result<CheckToolFactory, PluginLoadError> {
        let (module, class) = split_class_id(class_id)?;
        let classes = self
            .modules
            .get(module)
            .ok_or_else(|| PluginLoadError::ModuleNotFound {
                module: module.to_string(),
            })?;
        classes
            .get(class)
            .cloned()
            .ok_or_else(|| PluginLoadError::ClassNotFound {
                module: module.to_string(),
                class: class.to_string(),
            })
    }

    pub fn class_ids(&self) -> Vec<String> {
        self.modules
            .iter()
            .flat_map(|(module, classes)| classes.keys().map(move |class| format!("{module}.{class}")))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CheckReference, QaDocument};
    use crate::plugins::tool::{RunContext, RunError};

    struct Empty;

    impl CheckTool for Empty {
        fn name(&self) -> &str {
            "Empty"
        }

        fn checks(&self) -> Vec<CheckReference> {
            Vec::new()
        }

        fn run(&mut self, _: &mut QaDocument, _: &mut RunContext<'_>) -> Result<(), RunError> {
            Ok(())
        }
    }

    #[test]
    fn test_split_class_id() {
        assert_eq!(split_class_id("a.b.C").unwrap(), ("a.b", "C"));
        assert_eq!(split_class_id(""), Err(PluginLoadError::MissingClassIdentifier));
        assert!(matches!(
            split_class_id("NoModule"),
            Err(PluginLoadError::InvalidClassIdentifier(_))
        ));
        assert!(matches!(
            split_class_id("bad..path"),
            Err(PluginLoadError::InvalidClassIdentifier(_))
        ));
    }

    #[test]
    fn test_resolve_distinguishes_failures() {
        let mut catalog = PluginCatalog::new();
        catalog
            .register("tests.empty.Empty", || Box::new(Empty))
            .unwrap();

        assert!(catalog.resolve("tests.empty.Empty").is_ok());
        assert_eq!(
            catalog.resolve("tests.other.Empty").err(),
            Some(PluginLoadError::ModuleNotFound {
                module: "tests.other".to_string()
            })
        );
        assert_eq!(
            catalog.resolve("tests.empty.Missing").err(),
            Some(PluginLoadError::ClassNotFound {
                module: "tests.empty".to_string(),
                class: "Missing".to_string()
            })
        );
    }

    #[test]
    fn test_register_rejects_invalid_identifier() {
        let mut catalog = PluginCatalog::new();
        assert!(catalog.register("Empty", || Box::new(Empty)).is_err());
        assert!(catalog.class_ids().is_empty());
    }

    #[test]
    fn test_builtin_catalog() {
        let ids = PluginCatalog::builtin().class_ids();
        assert!(ids.contains(&"qax.plugins.example.ExampleCheckTool".to_string()));
        assert!(ids.contains(&"qax.plugins.file_presence.FilePresenceCheckTool".to_string()));
    }
}
