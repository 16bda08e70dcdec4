//! # tsub-config
//!
//! Reader for the line-based TRExFitter config dialect.
//!
//! - [`document`]: tokenizer and byte-preserving document tree.
//! - [`scan`]: region / systematic inventory with bounded include recursion.
//! - [`integrate`]: staging configs into a work directory with atomic path rewriting.

#![warn(clippy::all)]

pub mod document;
pub mod integrate;
pub mod scan;

pub use document::{ConfigDocument, Entry, Line, LineKind};
pub use integrate::{Integrator, RewritePlan, cached_configs, config_name};
pub use scan::{ConfigInventory, DEFAULT_LHSCAN_STEPS, MAX_INCLUDE_DEPTH, ScanMode};
