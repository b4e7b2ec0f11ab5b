use serde::{Deserialize, Serialize};

/// Profile document, one per configuration file.
///
/// Profiles are organization-specific sets of check tools plus optional
/// specification presets that override default check parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub name: String,

    #[serde(default)]
    pub description: String,

    pub check_tools: Vec<CheckToolConfig>,

    #[serde(default)]
    pub specifications: Vec<Specification>,
}

impl Profile {
    pub fn check_tool(&self, plugin_class: &str) -> Option<&CheckToolConfig> {
        self.check_tools
            .iter()
            .find(|tool| tool.plugin_class == plugin_class)
    }

    pub fn specification(&self, name: &str) -> Option<&Specification> {
        self.specifications.iter().find(|spec| spec.name == name)
    }
}

/// A check tool registered to a profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckToolConfig {
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Fully-qualified plugin class identifier, `module.path.ClassName`.
    #[serde(default)]
    pub plugin_class: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

/// Named preset of default parameter overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Specification {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub checks: Vec<CheckOverride>,
}

/// How a check override selects its check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckSelector {
    #[serde(rename = "checkId")]
    Id(String),
    #[serde(rename = "checkName")]
    Name(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckOverride {
    #[serde(flatten)]
    pub check: CheckSelector,

    #[serde(default)]
    pub parameters: Vec<ParamOverride>,
}

impl CheckOverride {
    /// True when this override targets the check with `id` / `name`.
    ///
    /// An id selector only matches ids; a name selector only matches names.
    pub fn matches(&self, id: &str, name: &str) -> bool {
        match &self.check {
            CheckSelector::Id(check_id) => check_id == id,
            CheckSelector::Name(check_name) => check_name == name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamOverride {
    pub name: String,
    pub value: serde_json::Value,
}
