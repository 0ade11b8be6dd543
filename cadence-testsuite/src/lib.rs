//! Testing utilities for Cadence workflows and activities.
//!
//! This crate provides an in-process test environment for workflows and
//! activities, driven through the same client surface callers use.

pub mod suite;

pub use suite::*;
