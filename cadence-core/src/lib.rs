//! Core types and utilities for the Cadence workflow coordinator.
//!
//! This crate provides the foundational types, error handling, and
//! payload encoding used throughout the workspace.

pub mod encoded;
pub mod error;
pub mod types;

pub use encoded::*;
pub use error::*;
pub use types::*;
