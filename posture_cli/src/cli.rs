//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "posture", version, about = "Posture engine CLI")]
pub struct Cli {
    /// Path to an optional engine config TOML
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Emit JSON lines on stdout (logs go to stderr)
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace)
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info")]
    pub log_level: String,

    /// Optional log file (JSON lines, daily rotation)
    #[arg(long = "log-file", value_name = "FILE")]
    pub log_file: Option<PathBuf>,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Replay recorded detector frames (JSONL) through the pipeline
    Replay {
        /// Frames file; `-` reads stdin
        #[arg(long, value_name = "FILE")]
        frames: PathBuf,

        /// SQLite database for daily logs and calibration records
        #[arg(long, value_name = "FILE")]
        db: Option<PathBuf>,

        /// User whose active calibration is loaded/saved
        #[arg(long, default_value = "default")]
        user: String,

        /// Run a calibration session over the replayed frames
        #[arg(long, action = ArgAction::SetTrue)]
        calibrate: bool,

        /// Pace frames by their recorded timestamps instead of replaying
        /// as fast as possible
        #[arg(long, action = ArgAction::SetTrue)]
        realtime: bool,
    },

    /// Run the pipeline on synthetic frames
    Synth {
        /// Scenario profile to generate
        #[arg(long, value_enum, default_value_t = Profile::Clean)]
        profile: Profile,

        /// Length of the stream in seconds
        #[arg(long, default_value_t = 10)]
        seconds: u32,

        /// Frame rate of the stream
        #[arg(long, default_value_t = 10)]
        fps: u32,

        /// SQLite database for daily logs
        #[arg(long, value_name = "FILE")]
        db: Option<PathBuf>,
    },

    /// Print recent daily aggregates and the current streak
    Summary {
        /// SQLite database to read
        #[arg(long, value_name = "FILE")]
        db: PathBuf,

        /// How many days to list
        #[arg(long, default_value_t = 14)]
        days: usize,
    },
}

/// Synthetic stream profiles.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum Profile {
    /// Upright posture throughout
    Clean,
    /// Slump after two seconds
    Slump,
    /// Slump, then recover
    Recovery,
    /// Walk away mid-stream
    Absence,
}
