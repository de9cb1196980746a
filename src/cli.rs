use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "bufferline")]
#[command(author, version, about = "Segmented media buffer orchestration tools")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Inspect a media segment and display what the orchestrator reads from it
    Inspect {
        /// Segment file to inspect
        #[arg(required = true)]
        file: PathBuf,

        /// Mime type of the segment (sniffed when omitted)
        #[arg(long)]
        mime: Option<String>,

        /// Track timescale for MP4 media segments
        #[arg(long)]
        timescale: Option<u32>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Play a scripted session against the in-memory platform
    Simulate {
        /// Number of audio and video segments to append
        #[arg(short, long, default_value = "5")]
        segments: u32,

        /// Manifest flavour driving offset correction
        #[arg(long, value_enum, default_value = "dash")]
        manifest: Manifest,

        /// Place segments in append order instead of by timestamp
        #[arg(long)]
        sequence_mode: bool,

        /// Switch the video codec before this segment
        #[arg(long)]
        switch_at: Option<u32>,

        /// Codecs to switch video to
        #[arg(long, default_value = "hvc1.1.6.L93.90")]
        switch_codecs: String,

        /// Container time of the first segment, in seconds
        #[arg(long, default_value = "0")]
        container_start: f64,

        /// Leave the stream open at the end
        #[arg(long)]
        no_end_of_stream: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum Manifest {
    Dash,
    Hls,
    Mss,
}

impl From<Manifest> for bl_core::ManifestKind {
    fn from(manifest: Manifest) -> Self {
        match manifest {
            Manifest::Dash => Self::Dash,
            Manifest::Hls => Self::Hls,
            Manifest::Mss => Self::Mss,
        }
    }
}
