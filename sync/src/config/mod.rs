//! Configuration objects for the sync engine.
//!
//! This module contains re-exported configurations that are needed by the engine.

// Re-exports.
pub use config::shared::*;
