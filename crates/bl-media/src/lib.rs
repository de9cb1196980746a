//! bl-media: minimal container readers for segment timestamp extraction.
//!
//! The buffer orchestrator needs an authoritative decode timestamp from the
//! segments it appends so it can reconcile them against manifest timing. This
//! crate reads exactly that, plus the ID3 metadata carried by packed audio.
//!
//! # Modules
//!
//! - [`mp4`] - ISO BMFF box navigation: `mdhd` timescale, `tfdt` decode time, protected sample entries
//! - [`ts`] - MPEG-2 transport stream first PES PTS
//! - [`id3`] - ID3v2 frames from packed audio segments
//! - [`container`] - Mime type classification and extraction dispatch

pub mod container;
pub mod error;
pub mod id3;
pub mod mp4;
pub mod ts;

// Re-export commonly used items at the crate root.
pub use container::{extract_metadata, extract_start_time, ContainerFormat};
pub use error::{Error, Result};
pub use id3::Id3Frame;
