//! Sample workflows.

pub mod hello;
pub mod order;

pub use hello::*;
pub use order::*;
