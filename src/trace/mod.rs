//! Trace entity model.
//!
//! The reconstruction passes turn raw events into three entity sets: tasks,
//! CPUs and probes. Each entity is looked up by an explicit key type rather
//! than by scanning for a structurally equal value.
//!
//! # Module Organization
//!
//! - [`models`]: entity structs and their keys
//! - [`constants`]: event tags, sentinels and the dump-line patterns

pub mod constants;
pub mod models;

// Re-export commonly used types
pub use models::*;
