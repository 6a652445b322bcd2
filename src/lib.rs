//! dtmfpipe - DTMF tone decoding through external tools
//!
//! A transcoder (sox) converts any supported input to raw PCM and writes it
//! into a FIFO; a long-lived demodulator (multimon-ng) reads the FIFO and
//! reports the tones it hears. [`Orchestrator`] ties the two together.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod decoder;
pub mod defaults;
pub mod diagnostics;
pub mod error;
pub mod process;
pub(crate) mod sys;

// Decoding
pub use decoder::{DecodeMode, DecoderEvent, Orchestrator, StreamDecoder};

// Audio descriptions
pub use audio::{AudioFormat, DecodeSource, RawProfile, SampleEncoding};

// Error handling
pub use error::{DtmfError, Result};

// Config
pub use config::Config;

/// Crate version, suffixed with `+<commit>` when the build saw a git hash.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
