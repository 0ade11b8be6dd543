//! Cadence worker implementation.
//!
//! This crate hosts workflow and activity implementations in-process: it
//! keeps the registries, drives one task per workflow instance, routes
//! signals and queries to it, and replays recorded histories.

pub mod executor;
pub mod registry;
pub mod worker;

pub use executor::*;
pub use registry::*;
pub use worker::*;
