//! Error types for dtmfpipe.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DtmfError {
    // Configuration errors
    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // External tool errors
    #[error("Required tool not available: {binary} ({reason})")]
    DependencyMissing { binary: String, reason: String },

    #[error("Failed to spawn {program}: {message}")]
    Spawn { program: String, message: String },

    // Decode request errors
    #[error("Invalid input type: {format} (expected raw, mp3, wav or ogg)")]
    InvalidFormat { format: String },

    #[error("Transcoder is busy")]
    Busy,

    #[error("Transcoder is not started")]
    NotStarted,

    #[error("Pipe name required")]
    MissingPipe,

    #[error("Transcoder exited with {}", describe_code(.code))]
    TranscoderFailed { code: Option<i32> },

    #[error("Demodulator exited with {} before the input was decoded", describe_code(.code))]
    DemodulatorFailed { code: Option<i32> },

    #[error("Demodulator did not drain within {waited_ms} ms")]
    DecodeTimeout { waited_ms: u64 },

    #[error("Decode aborted: demodulator was stopped")]
    DecodeAborted,

    // Named pipe errors
    #[error("Failed to create pipe at {path}: {message}")]
    PipeCreation { path: String, message: String },

    #[error("Failed to remove pipe at {path}: {message}")]
    PipeRemoval { path: String, message: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

fn describe_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("code {}", code),
        None => "no exit code (killed by signal)".to_string(),
    }
}

pub type Result<T> = std::result::Result<T, DtmfError>;
