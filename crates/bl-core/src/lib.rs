//! bl-core: shared types, IDs, errors, configuration, and event system.
//!
//! This crate is the foundational dependency for the other bl-* crates,
//! providing the media model consumed by the buffer orchestrator (content
//! types, type signatures, segment references), a unified error type, the
//! orchestrator configuration, and a broadcast event bus for diagnostics.

pub mod config;
pub mod error;
pub mod events;
pub mod ids;
pub mod media;

// Re-export the most commonly used items at the crate root.
pub use error::{Error, Result, Severity};
pub use ids::*;
pub use media::*;
