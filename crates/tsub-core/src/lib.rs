//! # tsub-core
//!
//! Error taxonomy and shared value types for the trexsub crates.

#![warn(clippy::all)]

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{ActionSet, EXCLUSIVE_ACTIONS, Granularity};
