mod cli;

use bufferline::{config, inspect, simulate};

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use std::path::Path;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "bufferline=trace,bl_buffer=trace,bl_media=debug,bl_core=debug".to_string()
        } else {
            "bufferline=info,bl_buffer=warn,bl_media=warn,bl_core=warn".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Inspect {
            file,
            mime,
            timescale,
            json,
        } => inspect_file(&file, mime.as_deref(), timescale, json),
        Commands::Simulate {
            segments,
            manifest,
            sequence_mode,
            switch_at,
            switch_codecs,
            container_start,
            no_end_of_stream,
            json,
        } => {
            let scenario = simulate::Scenario {
                segments,
                manifest: manifest.into(),
                sequence_mode,
                switch_at,
                switch_codecs,
                container_start,
                end_of_stream: !no_end_of_stream,
            };
            let config = config::load_config_or_default(cli.config.as_deref())?;
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(run_simulation(&scenario, &config, json))
        }
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("bufferline {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn inspect_file(file: &Path, mime: Option<&str>, timescale: Option<u32>, json: bool) -> Result<()> {
    if !file.exists() {
        anyhow::bail!("File does not exist: {:?}", file);
    }
    let data = std::fs::read(file).with_context(|| format!("Failed to read {:?}", file))?;
    let report = inspect::inspect_segment(&data, mime, timescale)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("File: {}", file.display());
    println!("Format: {}", report.format);
    println!("Size: {} bytes", report.size);
    if report.init_segment {
        println!("Init segment: yes");
    }
    if let Some(timescale) = report.timescale {
        println!("Timescale: {}", timescale);
    }
    if let Some(encrypted) = report.encrypted {
        println!("Encrypted: {}", if encrypted { "yes" } else { "no" });
    }
    match report.start_time {
        Some(start) => println!("Start time: {:.6}s", start),
        None if !report.init_segment => println!("Start time: unknown"),
        None => {}
    }
    if !report.id3_frames.is_empty() {
        println!("\nID3 frames: {}", report.id3_frames.len());
        for (i, frame) in report.id3_frames.iter().enumerate() {
            print!("  [{}] {} ({} bytes)", i, frame.id, frame.size);
            if let Some(ref value) = frame.value {
                print!(" {}", value);
            }
            println!();
        }
    }

    Ok(())
}

async fn run_simulation(
    scenario: &simulate::Scenario,
    config: &config::Config,
    json: bool,
) -> Result<()> {
    tracing::info!(segments = scenario.segments, manifest = %scenario.manifest, "Starting simulation");
    let report = simulate::run(scenario, config).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Platform calls: {}", report.calls.len());
    for call in &report.calls {
        println!("  {}", call);
    }

    println!("\nBuffered:");
    for (content_type, ranges) in &report.buffered {
        let ranges: Vec<String> = ranges
            .iter()
            .map(|(start, end)| format!("[{:.3}, {:.3})", start, end))
            .collect();
        print!("  {}: {}", content_type, ranges.join(" "));
        if let Some(offset) = report.timestamp_offsets.get(content_type) {
            print!(" (offset {:.3})", offset);
        }
        println!();
    }

    println!("\nResets: {}", report.resets);
    println!("Ended: {}", if report.ended { "yes" } else { "no" });
    println!("Events: {}", report.events.len());

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            config
        }
        None => {
            println!("No config file specified, using defaults");
            config::Config::default()
        }
    };

    let buffer = &config.buffer;
    println!("  Codec switching: {}", buffer.codec_switching_strategy);
    println!("  In-place switch supported: {}", buffer.in_place_switch_supported);
    println!("  Split muxed content: {}", buffer.split_muxed_content);
    println!("  Offset tolerance: {}s", buffer.offset_tolerance_secs);
    println!("  Small gap limit: {}s", buffer.small_gap_limit_secs);
    println!("  Forward metadata: {}", buffer.forward_metadata);

    let warnings = config.validate();
    if !warnings.is_empty() {
        println!("\nWarnings:");
        for warning in warnings {
            println!("  - {}", warning);
        }
    }

    Ok(())
}
