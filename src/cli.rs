//! Command-line interface for dtmfpipe
//!
//! Provides argument parsing using clap derive macros.

use crate::audio::{RawProfile, SampleEncoding};
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use std::time::Duration;

/// Decode DTMF tones from audio files and streams
#[derive(Parser, Debug)]
#[command(
    name = "dtmfpipe",
    version,
    about = "Decode DTMF tones from audio files and streams"
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Suppress log output (quiet mode)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose output (-v: debug, -vv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Parse a duration string.
///
/// Supports any duration format accepted by `humantime`: bare numbers (seconds),
/// single-unit (`30s`, `500ms`, `2m`), and compound (`1m30s`).
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    // Bare number → seconds
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(s).map_err(|e| e.to_string())
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Decode a file, URI or stdin ("-") and print the symbols
    Decode {
        /// Path or URI of the audio, or "-" to read it from stdin
        source: String,

        /// Input type: raw, mp3, wav or ogg
        #[arg(long, short = 'f', value_name = "FORMAT")]
        format: String,

        /// How long to wait for the demodulator to drain (e.g. 30s, 1m)
        #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
        timeout: Option<Duration>,
    },

    /// Decode audio streamed on stdin, printing symbols as they arrive
    Stream {
        /// Input type: raw, mp3, wav or ogg
        #[arg(long, short = 'f', value_name = "FORMAT")]
        format: String,

        #[command(flatten)]
        raw: RawArgs,

        /// Print one JSON event per line
        #[arg(long)]
        json: bool,
    },

    /// Check that the transcoder and demodulator are installed
    Check,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

/// Source PCM description for `--format raw`
#[derive(clap::Args, Debug, Clone, Default)]
pub struct RawArgs {
    /// Sample rate in Hz (default: 44100)
    #[arg(long, value_name = "HZ")]
    pub rate: Option<u32>,

    /// Sample encoding (default: signed-integer)
    #[arg(long, value_enum, value_name = "ENCODING")]
    pub encoding: Option<SampleEncoding>,

    /// Bits per sample (default: 8)
    #[arg(long, value_name = "BITS")]
    pub bits: Option<u16>,

    /// Channel count (default: 1)
    #[arg(long, value_name = "N")]
    pub channels: Option<u16>,
}

impl RawArgs {
    /// `None` when no flag was given, otherwise the defaults with the given flags applied.
    pub fn profile(&self) -> Option<RawProfile> {
        if self.rate.is_none()
            && self.encoding.is_none()
            && self.bits.is_none()
            && self.channels.is_none()
        {
            return None;
        }
        let defaults = RawProfile::default();
        Some(RawProfile {
            sample_rate: self.rate.unwrap_or(defaults.sample_rate),
            encoding: self.encoding.unwrap_or(defaults.encoding),
            channels: self.channels.unwrap_or(defaults.channels),
            bits: self.bits.unwrap_or(defaults.bits),
        })
    }
}
