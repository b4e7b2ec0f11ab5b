// QAX - Quality assurance checks for hydrographic survey data
//
// This is the library crate containing the configuration model, the check tool
// plugin architecture, the QA document binder and the executors.
// The binary crate (main.rs) provides the command line entry point and the
// isolated worker.

pub mod binder;
pub mod config;
pub mod executor;
pub mod logging;
pub mod models;
pub mod plugins;
pub mod settings;
pub mod summary;
pub mod worker;

// Re-export commonly used types for convenience
pub use binder::{FileAttachment, ProfilePlugins};
pub use config::{ConfigError, ConfigModel};
pub use executor::isolated::{IsolatedCheckExecutor, IsolatedOutcome, WorkerError, WorkerRequest};
pub use executor::{CheckExecutor, EventSink, ExecutorEvent, ExecutorStatus};
pub use models::{CheckReference, DataLevel, FileGroup, FileType, Profile, QaDocument};
pub use plugins::{CheckTool, CheckToolPlugin, PluginCatalog, PluginRegistry};
pub use settings::QaxSettings;
pub use summary::SummaryTable;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
