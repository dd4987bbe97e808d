//! Extension plane — declarative install/uninstall under governance.
//!
//! Extensions arrive as zip packages carrying a manifest, commands, and an
//! install plan. Plans are third-party data: the engine executes only a
//! closed whitelist of step types, validates the whole plan before the
//! first step runs, and never hands the author code execution on the host
//! outside the runner/sandbox restrictions.

pub mod engine;
pub mod host;
pub mod manifest;
pub mod package;
pub mod plan;
pub mod store;

pub use engine::{InstallEngine, InstallOutcome, ProgressEvent};
pub use host::ExtensionHost;
pub use manifest::{ExtensionManifest, Permission, Platform};
pub use plan::{Condition, InstallPlan, InstallStep};
pub use store::{ExtensionStatus, ExtensionStore};
