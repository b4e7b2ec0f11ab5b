//! Data models for QAX.
//!
//! This module contains the core data structures shared by the configuration
//! loader, the plugin registry, the document binder and the executors:
//! - [`Profile`]: A profile document (check tools + specification presets)
//! - [`FileType`] / [`FileGroup`]: Which input files a check accepts
//! - [`CheckReference`]: Identity and input contract of one check
//! - [`QaDocument`]: Typed view of the QA JSON document
//!
//! # Architecture Note
//!
//! Models are plain serde types. They carry no plugin code, so a profile or a
//! document can be parsed, compared and shipped across the worker process
//! boundary without loading any check tool.

pub mod check_reference;
pub mod document;
pub mod file_types;
pub mod profile;

pub use check_reference::CheckReference;
pub use document::{
    CheckState, DataLevel, DataLevelSection, ExecutionStatus, QA_SCHEMA_VERSION, QaCheck,
    QaCheckInfo, QaCheckInputs, QaCheckOutputs, QaDocument, QaExecution, QaInputFile, QaParam,
    QaRoot,
};
pub use file_types::{FileGroup, FileType, WILDCARD_EXTENSION};
pub use profile::{CheckOverride, CheckSelector, CheckToolConfig, ParamOverride, Profile, Specification};
