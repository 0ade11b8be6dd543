//! Workflow authoring SDK for Cadence.
//!
//! This crate provides the API for implementing workflows: durable sleep,
//! activity execution, signal queues, synchronous signals with replies,
//! query handlers, and staged processes with cancellation.

pub mod cancellation;
pub mod context;
pub mod future;
pub mod gateway;
pub mod history;
pub mod queue;
pub mod signal;
pub mod state_machine;

pub use cancellation::*;
pub use context::*;
pub use future::*;
pub use gateway::*;
pub use history::*;
pub use queue::*;
pub use signal::*;
pub use state_machine::*;
