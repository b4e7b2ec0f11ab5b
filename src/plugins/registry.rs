use crate::config::ConfigModel;
use crate::models::Profile;
use crate::plugins::catalog::{PluginCatalog, PluginLoadError};
use crate::plugins::tool::CheckToolPlugin;
use std::sync::{Arc, RwLock};

static GLOBAL_REGISTRY: RwLock<Option<Arc<PluginRegistry>>> = RwLock::new(None);

/// A check tool entry that could not be loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct PluginLoadFailure {
    pub profile: String,
    pub check_tool: String,
    pub plugin_class: String,
    pub error: PluginLoadError,
}

/// Loaded check tool instances, one per (profile, plugin class) pair.
///
/// Loading is best effort per check tool: an entry whose class cannot be
/// resolved is recorded in [`failures`](Self::failures) and the remaining
/// entries still load.
#[derive(Debug, Default)]
pub struct PluginRegistry {
    plugins: Vec<Arc<CheckToolPlugin>>,
    failures: Vec<PluginLoadFailure>,
}

impl PluginRegistry {
    pub fn load(config: &ConfigModel, catalog: &PluginCatalog) -> Self {
        let mut registry = Self::default();

        for profile in config.profiles() {
            for tool_config in &profile.check_tools {
                if registry
                    .get_plugin(&profile.name, &tool_config.plugin_class)
                    .is_some()
                {
                    tracing::warn!(
                        "Profile '{}' lists plugin class {} more than once; keeping the first",
                        profile.name,
                        tool_config.plugin_class
                    );
                    continue;
                }

                match catalog.resolve(&tool_config.plugin_class) {
                    Ok(factory) => {
                        let plugin = CheckToolPlugin::new(factory(), &profile.name, tool_config);
                        tracing::debug!(
                            "Loaded check tool '{}' ({}) for profile '{}' with {} checks",
                            plugin.name(),
                            plugin.class_id(),
                            profile.name,
                            plugin.checks().len()
                        );
                        registry.plugins.push(Arc::new(plugin));
                    }
                    Err(error) => {
                        tracing::warn!(
                            "Failed to load check tool '{}' for profile '{}': {}",
                            tool_config.name,
                            profile.name,
                            error
                        );
                        registry.failures.push(PluginLoadFailure {
                            profile: profile.name.clone(),
                            check_tool: tool_config.name.clone(),
                            plugin_class: tool_config.plugin_class.clone(),
                            error,
                        });
                    }
                }
            }
        }

        tracing::info!(
            "Plugin registry loaded: {} check tools, {} failures",
            registry.plugins.len(),
            registry.failures.len()
        );
        registry
    }

    /// Load and install as the process-wide registry, replacing any earlier
    /// one.
    pub fn load_global(config: &ConfigModel, catalog: &PluginCatalog) -> Arc<Self> {
        let registry = Arc::new(Self::load(config, catalog));
        let mut slot = GLOBAL_REGISTRY.write().unwrap_or_else(|e| e.into_inner());
        *slot = Some(Arc::clone(&registry));
        registry
    }

    pub fn global() -> Option<Arc<Self>> {
        GLOBAL_REGISTRY
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn plugins(&self) -> &[Arc<CheckToolPlugin>] {
        &self.plugins
    }

    pub fn failures(&self) -> &[PluginLoadFailure] {
        &self.failures
    }

    /// Exact lookup by profile name and plugin class. `None` if absent.
    pub fn get_plugin(&self, profile_name: &str, plugin_class: &str) -> Option<Arc<CheckToolPlugin>> {
        self.plugins
            .iter()
            .find(|p| p.profile_name() == profile_name && p.class_id() == plugin_class)
            .cloned()
    }

    /// Plugins of `profile` in its declared check tool order, skipping any
    /// that failed to load. A plugin class listed twice is returned once.
    pub fn get_profile_plugins(&self, profile: &Profile) -> Vec<Arc<CheckToolPlugin>> {
        let mut plugins: Vec<Arc<CheckToolPlugin>> = Vec::new();
        for tool in &profile.check_tools {
            if plugins.iter().any(|p| p.class_id() == tool.plugin_class) {
                continue;
            }
            if let Some(plugin) = self.get_plugin(&profile.name, &tool.plugin_class) {
                plugins.push(plugin);
            }
        }
        plugins
    }
}
