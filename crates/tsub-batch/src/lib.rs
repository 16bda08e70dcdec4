//! # tsub-batch
//!
//! Fan-out of TRExFitter steps into HTCondor jobs.
//!
//! - [`bundle`], [`policy`], [`plan`]: from scanned configs to work units.
//! - [`emit`], [`manifest`]: job table, wrapper script, submit description.
//! - [`workspace`], [`select`], [`submit`]: work-directory state and submission.
//! - [`retry`], [`sync`], [`merge`]: after-the-run tooling.

#![warn(clippy::all)]

pub mod bundle;
pub mod emit;
pub mod manifest;
pub mod merge;
pub mod plan;
pub mod policy;
pub mod retry;
pub mod select;
pub mod submit;
pub mod sync;
pub mod workspace;

pub use bundle::{SystBundle, bundle_systematics};
pub use emit::{ArtifactPaths, JobTable, SubmitDescriptor, WrapperScript, write_artifacts};
pub use manifest::Manifest;
pub use plan::{Inventory, WorkUnit, build_inventory, plan};
pub use policy::{EffectivePolicy, RequestedPolicy, SplitRequest, resolve_policy};
pub use workspace::{WorkDir, WorkspaceState};
