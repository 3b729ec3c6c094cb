//! Shared domain types for the driftwatch project.

pub mod config;
pub mod events;
pub mod frame;
pub mod geometry;
pub mod telemetry;

mod errors;

pub use errors::{DriftwatchError, Result};
