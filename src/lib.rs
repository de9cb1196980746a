//! Bufferline - segmented media buffer orchestration
//!
//! The library crate exposes the command-line tooling (config loading,
//! segment inspection, scripted simulation) for integration testing. The
//! orchestrator itself lives in `bl-buffer`.

pub mod config;
pub mod inspect;
pub mod simulate;

pub use bl_buffer::{BufferOrchestrator, MemoryPlatform};
