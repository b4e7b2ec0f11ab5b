use camino::Utf8Path;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Extension value that matches any file.
pub const WILDCARD_EXTENSION: &str = "*";

/// A kind of input file a check accepts.
///
/// File types are matched by extension and by the file group the user
/// attached the file under (e.g. "Survey DTMs", "Raw Files").
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileType {
    pub name: String,
    pub extension: String,
    pub group: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

impl FileType {
    pub fn new(name: impl Into<String>, extension: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            extension: extension.into(),
            group: group.into(),
            icon: None,
        }
    }

    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }

    /// True when `path` has this type's extension (or this type is the
    /// wildcard) and `group` is this type's group.
    ///
    /// The extension comparison is case-sensitive. A path without an
    /// extension has the empty extension.
    pub fn supports(&self, path: &Utf8Path, group: &str) -> bool {
        let extension = path.extension().unwrap_or("");
        let extension_matches =
            self.extension == WILDCARD_EXTENSION || self.extension == extension;

        extension_matches && self.group == group
    }

    fn identity(&self) -> (&str, &str, &str) {
        (&self.name, &self.extension, &self.group)
    }
}

/// An ordered collection of file types sharing a group name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileGroup {
    pub name: String,
    pub file_types: Vec<FileType>,
}

impl FileGroup {
    /// Build a group, dropping repeated (name, extension, group) entries.
    pub fn new(name: impl Into<String>, file_types: Vec<FileType>) -> Self {
        let mut group = Self {
            name: name.into(),
            file_types: Vec::with_capacity(file_types.len()),
        };
        for file_type in file_types {
            group.push(file_type);
        }
        group
    }

    /// Append a file type unless an identical one is already present.
    pub fn push(&mut self, file_type: FileType) -> bool {
        let duplicate = self
            .file_types
            .iter()
            .any(|existing| existing.identity() == file_type.identity());
        if !duplicate {
            self.file_types.push(file_type);
        }
        !duplicate
    }

    pub fn supports(&self, path: &Utf8Path, group: &str) -> bool {
        self.file_types.iter().any(|ft| ft.supports(path, group))
    }

    /// Combine groups that share a name, regardless of which check tool
    /// declared them.
    ///
    /// Groups keep the order in which their name was first seen, and file
    /// types inside a merged group keep first-seen order with duplicates
    /// removed.
    pub fn merge<I>(groups: I) -> Vec<FileGroup>
    where
        I: IntoIterator<Item = FileGroup>,
    {
        let mut merged: IndexMap<String, FileGroup> = IndexMap::new();

        for group in groups {
            let target = merged
                .entry(group.name.clone())
                .or_insert_with(|| FileGroup::new(group.name.clone(), Vec::new()));
            for file_type in group.file_types {
                target.push(file_type);
            }
        }

        merged.into_values().collect()
    }

    /// Group a flat list of file types by their `group` field.
    pub fn from_file_types<'a, I>(file_types: I) -> Vec<FileGroup>
    where
        I: IntoIterator<Item = &'a FileType>,
    {
        Self::merge(
            file_types
                .into_iter()
                .map(|ft| FileGroup::new(ft.group.clone(), vec![ft.clone()])),
        )
    }
}
