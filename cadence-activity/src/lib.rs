//! Activity authoring SDK for Cadence.
//!
//! This crate provides the activity context and the [`ActivityInvoker`]
//! seam through which workflow logic reaches out-of-process work.

pub mod context;
pub mod invoker;

pub use context::*;
pub use invoker::*;
