//! Command-line argument definitions

use crate::capture::Resolution;
use crate::export::{ExportBitrate, ExportFrameRate, ExportResolution};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "clipcast", version, about = "Record device video and export trimmed clips")]
pub struct Cli {
    /// Settings file (JSON)
    #[arg(long, global = true, env = "CLIPCAST_CONFIG")]
    pub config: Option<PathBuf>,

    /// Debug logging for this crate
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Record from a capture device
    Record(RecordArgs),
    /// Trim and re-encode a clip
    Export(ExportArgs),
    /// Show what a video file contains
    Probe(ProbeArgs),
    /// List capture devices
    Devices,
}

/// Arguments for the record command
#[derive(Args, Debug)]
pub struct RecordArgs {
    /// Output file path
    #[arg(short, long)]
    pub output: PathBuf,

    /// Stop after this many seconds (default: until Ctrl-C)
    #[arg(short, long)]
    pub seconds: Option<f64>,

    /// Bitrate in bits per second (default from settings)
    #[arg(long)]
    pub bitrate: Option<u32>,

    /// Output frame rate (default from settings)
    #[arg(long)]
    pub fps: Option<u32>,

    /// Camera index or identifier
    #[cfg(feature = "camera")]
    #[arg(long)]
    pub camera: Option<String>,

    /// Test pattern size
    #[arg(long, value_name = "WIDTHxHEIGHT")]
    pub pattern_size: Option<Resolution>,

    /// Test pattern frames emitted before geometry is known
    #[arg(long, default_value = "3")]
    pub warmup: u32,
}

/// Arguments for the export command
#[derive(Args, Debug)]
pub struct ExportArgs {
    /// Source video
    #[arg(short, long)]
    pub input: PathBuf,

    /// Output file path
    #[arg(short, long)]
    pub output: PathBuf,

    /// Trim start in seconds
    #[arg(short, long, default_value = "0")]
    pub start: f64,

    /// Trim end in seconds (default: end of source)
    #[arg(short, long)]
    pub end: Option<f64>,

    /// Target size: a preset name or WIDTHxHEIGHT
    #[arg(long, default_value = "1080p-portrait")]
    pub size: ExportResolution,

    /// Frame rate: 24, 30 or 60
    #[arg(long, default_value = "30", value_parser = parse_frame_rate)]
    pub fps: ExportFrameRate,

    /// Bitrate in Mbps: 6, 10, 12 or 20
    #[arg(long, default_value = "10", value_parser = parse_bitrate)]
    pub mbps: ExportBitrate,
}

/// Arguments for the probe command
#[derive(Args, Debug)]
pub struct ProbeArgs {
    /// Video file to inspect
    pub input: PathBuf,
}

fn parse_frame_rate(s: &str) -> Result<ExportFrameRate, String> {
    let fps: u32 = s.parse().map_err(|_| format!("'{}' is not a number", s))?;
    ExportFrameRate::try_from(fps)
}

fn parse_bitrate(s: &str) -> Result<ExportBitrate, String> {
    let mbps: u32 = s.parse().map_err(|_| format!("'{}' is not a number", s))?;
    ExportBitrate::try_from(mbps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_export() {
        let cli = Cli::parse_from([
            "clipcast", "--json", "export", "-i", "in.mp4", "-o", "out.mp4", "--start", "1.5",
            "--size", "display-6.7", "--fps", "60", "--mbps", "20",
        ]);
        assert!(cli.json);
        match cli.command {
            Commands::Export(args) => {
                assert_eq!(args.start, 1.5);
                assert_eq!(args.end, None);
                assert_eq!(args.size, ExportResolution::Display67);
                assert_eq!(args.fps, ExportFrameRate::Fps60);
                assert_eq!(args.mbps, ExportBitrate::Mbps20);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_rejects_unsupported_frame_rate() {
        let result = Cli::try_parse_from([
            "clipcast", "export", "-i", "in.mp4", "-o", "out.mp4", "--fps", "25",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_record() {
        let cli = Cli::parse_from([
            "clipcast", "record", "-o", "take.mp4", "--seconds", "2", "--pattern-size", "640x480",
        ]);
        match cli.command {
            Commands::Record(args) => {
                assert_eq!(args.seconds, Some(2.0));
                assert_eq!(args.pattern_size, Some(Resolution::new(640, 480)));
                assert_eq!(args.warmup, 3);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
