//! Check tools shipped with QAX.
//!
//! These do not implement survey QA algorithms. They give the binary and the
//! isolated worker something real to load and run, and they double as
//! reference implementations of the [`CheckTool`](crate::plugins::CheckTool)
//! contract.

pub mod example;
pub mod file_presence;

pub use example::ExampleCheckTool;
pub use file_presence::FilePresenceCheckTool;

use crate::plugins::catalog::PluginCatalog;

pub const EXAMPLE_CLASS_ID: &str = "qax.plugins.example.ExampleCheckTool";
pub const FILE_PRESENCE_CLASS_ID: &str = "qax.plugins.file_presence.FilePresenceCheckTool";

/// Input file group for raw sonar data.
pub const RAW_FILES_GROUP: &str = "Raw Files";

/// Input file group for gridded survey products.
pub const SURVEY_DTMS_GROUP: &str = "Survey DTMs";

pub(crate) fn register(catalog: &mut PluginCatalog) {
    let builtins: [(&str, fn() -> Box<dyn crate::plugins::CheckTool>); 2] = [
        (EXAMPLE_CLASS_ID, || Box::new(ExampleCheckTool::new())),
        (FILE_PRESENCE_CLASS_ID, || Box::new(FilePresenceCheckTool::new())),
    ];

    for (class_id, factory) in builtins {
        if let Err(e) = catalog.register(class_id, factory) {
            tracing::error!("Failed to register builtin check tool {}: {}", class_id, e);
        }
    }
}
