//! Check tool plugin architecture.
//!
//! - [`CheckTool`]: The contract every check tool implementation satisfies
//! - [`CheckToolPlugin`]: A loaded implementation bound to its profile, with
//!   run-time options and a stop flag
//! - [`PluginCatalog`]: Static registration of implementations by class
//!   identifier (`module.path.ClassName`)
//! - [`PluginRegistry`]: Resolves every profile's check tools against a
//!   catalog, one instance per (profile, class) pair
//!
//! Implementations are registered in a catalog instead of being loaded
//! dynamically. A worker process builds its own registry from the same
//! catalog, so nothing here crosses a process boundary.

pub mod builtin;
pub mod cancel;
pub mod catalog;
pub mod registry;
pub mod tool;

pub use cancel::CancellationToken;
pub use catalog::{CheckToolFactory, PluginCatalog, PluginLoadError, split_class_id};
pub use registry::{PluginLoadFailure, PluginRegistry};
pub use tool::{CheckTool, CheckToolOptions, CheckToolPlugin, RunContext, RunError, SummaryField};
