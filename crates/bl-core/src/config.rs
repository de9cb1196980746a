//! Orchestrator configuration types.
//!
//! The top-level [`Config`] struct carries the buffer orchestrator settings
//! and the latencies used by the in-memory platform backend. Every section
//! defaults sensibly so a completely empty `{}` document is valid.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::error::Result;
use crate::Error;

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub buffer: BufferConfig,
    pub simulation: SimulationConfig,
}

impl Config {
    /// Deserialize a `Config` from a JSON string.
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str)
            .map_err(|e| Error::Validation(format!("config parse error: {e}")))
    }

    /// Load configuration from a JSON file path, falling back to defaults if
    /// the path is `None` or the file does not exist.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_json(&contents).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse config file {}: {e}", path.display());
                Self::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config file at {}; using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        let buffer = &self.buffer;

        if buffer.offset_tolerance_secs.is_nan() || buffer.offset_tolerance_secs <= 0.0 {
            warnings.push(format!(
                "buffer.offset_tolerance_secs is {}; every append will re-apply the offset",
                buffer.offset_tolerance_secs
            ));
        } else if buffer.offset_tolerance_secs > 1.0 {
            warnings.push(format!(
                "buffer.offset_tolerance_secs is {}s; real drift will go uncorrected",
                buffer.offset_tolerance_secs
            ));
        }

        if buffer.small_gap_limit_secs < 0.0 {
            warnings.push("buffer.small_gap_limit_secs is negative".into());
        }

        if buffer.codec_switching_strategy == CodecSwitchingStrategy::Smooth
            && !buffer.in_place_switch_supported
        {
            warnings.push(
                "codec_switching_strategy is smooth but in_place_switch_supported is false; \
                 every codec switch will reset"
                    .into(),
            );
        }

        if self.simulation.segment_duration_ms == 0 {
            warnings.push("simulation.segment_duration_ms is 0; appends buffer nothing".into());
        }

        if self.simulation.append_latency_ms > 10_000 {
            warnings.push(format!(
                "simulation.append_latency_ms is {}ms",
                self.simulation.append_latency_ms
            ));
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// How a codec change on an existing buffer is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CodecSwitchingStrategy {
    /// Change the buffer type in place when the platform allows it.
    #[default]
    Smooth,
    /// Always tear down and recreate the session.
    Reload,
}

impl fmt::Display for CodecSwitchingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Smooth => write!(f, "smooth"),
            Self::Reload => write!(f, "reload"),
        }
    }
}

/// Buffer orchestrator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    pub codec_switching_strategy: CodecSwitchingStrategy,
    /// Platform quirk switch: set to `false` on platforms whose in-place type
    /// change is known to be unreliable.
    #[serde(default = "default_true")]
    pub in_place_switch_supported: bool,
    /// Split muxed audio+video tracks into separate buffers. Codec switches
    /// on split content always reset.
    pub split_muxed_content: bool,
    /// Divergence (seconds) below which a container-derived offset is ignored.
    #[serde(default = "default_offset_tolerance")]
    pub offset_tolerance_secs: f64,
    /// Gap (seconds) after the buffered end still treated as buffered.
    #[serde(default = "default_small_gap_limit")]
    pub small_gap_limit_secs: f64,
    /// Forward ID3 frames found in raw audio segments to the metadata callback.
    #[serde(default = "default_true")]
    pub forward_metadata: bool,
}

fn default_true() -> bool {
    true
}

fn default_offset_tolerance() -> f64 {
    0.001
}

fn default_small_gap_limit() -> f64 {
    0.5
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            codec_switching_strategy: CodecSwitchingStrategy::default(),
            in_place_switch_supported: true,
            split_muxed_content: false,
            offset_tolerance_secs: default_offset_tolerance(),
            small_gap_limit_secs: default_small_gap_limit(),
            forward_metadata: true,
        }
    }
}

/// Latencies used by the in-memory platform backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub append_latency_ms: u64,
    pub remove_latency_ms: u64,
    pub session_open_latency_ms: u64,
    /// Presentation duration credited to each appended media segment.
    pub segment_duration_ms: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            append_latency_ms: 20,
            remove_latency_ms: 5,
            session_open_latency_ms: 10,
            segment_duration_ms: 2_000,
        }
    }
}
