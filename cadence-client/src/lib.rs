//! Client for the Cadence workflow coordinator.
//!
//! This crate provides the caller-side interface for starting workflows,
//! sending ordinary and synchronous signals, querying workflow state and
//! retrieving results.

pub mod client;
pub mod handle;
pub mod options;

pub use client::*;
pub use handle::*;
pub use options::*;
