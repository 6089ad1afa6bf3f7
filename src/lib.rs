//! clipcast - capture device video, then trim and re-export clips.
//!
//! This is the library crate behind the `clipcast` binary. It provides the
//! capture and lazy-encode pipeline, the trim/export engine, and the
//! command-line front-end that drives them.

pub mod capture;
pub mod cli;
pub mod commands;
pub mod config;
pub mod export;
pub mod recorder;
pub mod utils;

use clap::Parser;
use cli::{Cli, Commands, ExportArgs, RecordArgs};
use config::Settings;
use serde::Serialize;
use std::io::Write;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utils::error::{AppResult, ErrorResponse};

/// Initialize tracing. `RUST_LOG` takes precedence over the defaults.
pub fn init_logging(verbose: bool) {
    let default = if verbose { "clipcast=debug" } else { "clipcast=info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Parse arguments and run the requested command
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    tracing::info!("Starting clipcast v{}", env!("CARGO_PKG_VERSION"));

    let json = cli.json;
    match dispatch(cli).await {
        Ok(()) => Ok(()),
        Err(e) if json => {
            let response = ErrorResponse::from(e);
            println!("{}", serde_json::to_string(&response)?);
            anyhow::bail!(response.message)
        }
        Err(e) => Err(e.into()),
    }
}

async fn dispatch(cli: Cli) -> AppResult<()> {
    let settings = Settings::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Commands::Record(args) => {
            let output = run_record(&settings, args).await?;
            if cli.json {
                print_json(&output)?;
            } else {
                match &output.path {
                    Some(path) if output.finalized => println!(
                        "Saved {} ({} frames, {:.2}s, {} dropped)",
                        path.display(),
                        output.frames.encoded,
                        output.duration_ms / 1000.0,
                        output.frames.dropped()
                    ),
                    _ => println!("No frames were recorded"),
                }
            }
        }
        Commands::Export(args) => {
            let outcome = run_export(&settings, args, cli.json).await?;
            if cli.json {
                print_json(&outcome)?;
            } else {
                eprintln!();
                println!(
                    "Exported {} ({}, {:.2}s..{:.2}s)",
                    outcome.output.display(),
                    outcome.resolution,
                    outcome.trim.start(),
                    outcome.trim.end()
                );
            }
        }
        Commands::Probe(args) => {
            let info = commands::export::probe(&settings, &args.input).await?;
            if cli.json {
                print_json(&info)?;
            } else {
                println!("Duration: {:.3}s", info.duration);
                match &info.video {
                    Some(video) => println!(
                        "Video:    {}x{} {} @ {:.2}fps, rotated {}°",
                        video.width,
                        video.height,
                        video.codec,
                        video.frame_rate,
                        video.orientation.degrees()
                    ),
                    None => println!("Video:    none"),
                }
                println!("Audio:    {}", if info.has_audio { "yes" } else { "no" });
            }
        }
        Commands::Devices => {
            let devices = commands::recording::list_devices();
            if cli.json {
                print_json(&devices)?;
            } else {
                for device in devices {
                    println!("{}\t{}", device.id, device.name);
                }
            }
        }
    }
    Ok(())
}

async fn run_record(settings: &Settings, args: RecordArgs) -> AppResult<recorder::RecordingOutput> {
    let frame_rate = args.fps.unwrap_or(settings.recording.frame_rate).max(1);

    #[cfg(feature = "camera")]
    let device = match args.camera {
        Some(id) => commands::recording::DeviceChoice::Camera(Some(id)),
        None => commands::recording::pattern(args.pattern_size, frame_rate, args.warmup),
    };
    #[cfg(not(feature = "camera"))]
    let device = commands::recording::pattern(args.pattern_size, frame_rate, args.warmup);

    let options = commands::recording::RecordOptions {
        output: args.output,
        bitrate: args.bitrate.unwrap_or(settings.recording.bitrate),
        frame_rate,
        duration: args
            .seconds
            .filter(|s| s.is_finite() && *s > 0.0)
            .map(Duration::from_secs_f64),
        device,
    };

    if options.duration.is_none() {
        eprintln!("Recording... press Ctrl-C to stop");
    }
    commands::recording::record(settings, options, ctrl_c()).await
}

async fn run_export(settings: &Settings, args: ExportArgs, json: bool) -> AppResult<export::ExportOutcome> {
    let options = commands::export::ExportOptions {
        source: args.input,
        output: args.output,
        start: args.start,
        end: args.end,
        resolution: args.size,
        frame_rate: args.fps,
        bitrate: args.mbps,
    };

    let on_progress = move |progress: export::ExportProgress| {
        if json {
            if let Ok(line) = serde_json::to_string(&progress) {
                println!("{}", line);
            }
        } else {
            eprint!("\rExporting... {:>3.0}%", progress.fraction * 100.0);
            let _ = std::io::stderr().flush();
        }
    };
    commands::export::export(settings, options, on_progress, ctrl_c()).await
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

fn print_json<T: Serialize>(value: &T) -> AppResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
