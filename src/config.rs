use crate::defaults;
use crate::error::{DtmfError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub demodulator: DemodulatorConfig,
    pub transcoder: TranscoderConfig,
    pub pipe: PipeConfig,
    pub decode: DecodeConfig,
}

/// External demodulator invocation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DemodulatorConfig {
    pub program: String,
    /// Arguments before the pipe path
    pub args: Vec<String>,
    pub probe_args: Vec<String>,
    pub probe_marker: String,
    /// Prefix that marks a decoded-symbol line
    pub marker: String,
}

/// External transcoder invocation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TranscoderConfig {
    pub program: String,
    /// Arguments placed before the generated ones
    pub args: Vec<String>,
    pub probe_args: Vec<String>,
    pub probe_marker: String,
}

/// Named pipe placement
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct PipeConfig {
    /// Directory for generated pipe names (default: system temp dir)
    pub dir: Option<PathBuf>,
    /// Fixed pipe path instead of a generated one
    pub path: Option<PathBuf>,
}

/// Decode timing and channel sizes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DecodeConfig {
    pub drain_timeout_ms: u64,
    pub probe_timeout_ms: u64,
    pub event_capacity: usize,
}

fn owned(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

impl Default for DemodulatorConfig {
    fn default() -> Self {
        Self {
            program: defaults::DEMODULATOR_PROGRAM.to_string(),
            args: owned(defaults::DEMODULATOR_ARGS),
            probe_args: owned(defaults::DEMODULATOR_PROBE_ARGS),
            probe_marker: defaults::DEMODULATOR_PROBE_MARKER.to_string(),
            marker: defaults::SYMBOL_MARKER.to_string(),
        }
    }
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            program: defaults::TRANSCODER_PROGRAM.to_string(),
            args: Vec::new(),
            probe_args: owned(defaults::TRANSCODER_PROBE_ARGS),
            probe_marker: defaults::TRANSCODER_PROBE_MARKER.to_string(),
        }
    }
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            drain_timeout_ms: defaults::DRAIN_TIMEOUT_MS,
            probe_timeout_ms: defaults::PROBE_TIMEOUT_MS,
            event_capacity: defaults::EVENT_CAPACITY,
        }
    }
}

impl DecodeConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    /// Saturates at `u64::MAX` milliseconds.
    pub fn set_drain_timeout(&mut self, timeout: Duration) {
        self.drain_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

impl PipeConfig {
    /// Directory generated pipe names are rooted in.
    pub fn dir(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Invalid TOML is still an error.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Err(DtmfError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(Self::default())
            }
            Err(DtmfError::Io(e)) => Err(DtmfError::ConfigParse {
                message: format!("cannot read {}: {}", path.display(), e),
            }),
            other => other,
        }
    }

    /// Reject values the process supervisors cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.demodulator.program.trim().is_empty() {
            return Err(invalid("demodulator.program", "must not be empty"));
        }
        if self.transcoder.program.trim().is_empty() {
            return Err(invalid("transcoder.program", "must not be empty"));
        }
        if self.demodulator.marker.is_empty() {
            return Err(invalid("demodulator.marker", "must not be empty"));
        }
        if self.decode.drain_timeout_ms == 0 {
            return Err(invalid("decode.drain_timeout_ms", "must be positive"));
        }
        if self.decode.probe_timeout_ms == 0 {
            return Err(invalid("decode.probe_timeout_ms", "must be positive"));
        }
        if self.decode.event_capacity == 0 {
            return Err(invalid("decode.event_capacity", "must be positive"));
        }
        Ok(())
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - DTMFPIPE_DEMODULATOR → demodulator.program
    /// - DTMFPIPE_TRANSCODER → transcoder.program
    /// - DTMFPIPE_PIPE_DIR → pipe.dir
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(program) = std::env::var("DTMFPIPE_DEMODULATOR")
            && !program.is_empty()
        {
            self.demodulator.program = program;
        }

        if let Ok(program) = std::env::var("DTMFPIPE_TRANSCODER")
            && !program.is_empty()
        {
            self.transcoder.program = program;
        }

        if let Ok(dir) = std::env::var("DTMFPIPE_PIPE_DIR")
            && !dir.is_empty()
        {
            self.pipe.dir = Some(PathBuf::from(dir));
        }

        self
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/dtmfpipe/config.toml on Linux
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("dtmfpipe")
            .join("config.toml")
    }
}

fn invalid(key: &str, message: &str) -> DtmfError {
    DtmfError::ConfigInvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}
