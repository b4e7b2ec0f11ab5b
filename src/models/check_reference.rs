use crate::models::document::{DataLevel, QaCheckInfo, QaParam};
use crate::models::file_types::{FileGroup, FileType};
use camino::Utf8Path;
use serde::{Deserialize, Serialize};

/// Identity and input contract of one check, without its implementation.
///
/// The `id` is the document key for the check and must stay stable across
/// releases of the check tool that declares it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckReference {
    pub id: String,
    pub name: String,
    pub data_level: DataLevel,
    #[serde(default)]
    pub description: Option<String>,
    pub version: String,
    #[serde(default)]
    pub supported_file_types: Vec<FileType>,
    #[serde(default)]
    pub default_params: Vec<QaParam>,
}

impl CheckReference {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        data_level: DataLevel,
        version: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            data_level,
            description: None,
            version: version.into(),
            supported_file_types: Vec::new(),
            default_params: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_file_type(mut self, file_type: FileType) -> Self {
        self.supported_file_types.push(file_type);
        self
    }

    pub fn with_default_param(mut self, param: QaParam) -> Self {
        self.default_params.push(param);
        self
    }

    /// True if any declared file type accepts `path` under `group`.
    pub fn supports_file(&self, path: &Utf8Path, group: &str) -> bool {
        self.supported_file_types
            .iter()
            .any(|ft| ft.supports(path, group))
    }

    pub fn file_groups(&self) -> Vec<FileGroup> {
        FileGroup::from_file_types(&self.supported_file_types)
    }

    /// The `info` block written for this check in a QA document.
    pub fn to_info(&self) -> QaCheckInfo {
        QaCheckInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            version: self.version.clone(),
            description: self.description.clone(),
            ..Default::default()
        }
    }
}
