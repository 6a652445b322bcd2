//! Input formats and PCM profiles understood by the transcoder.

use crate::defaults;
use crate::error::{DtmfError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Container/codec of a decode source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Raw,
    Mp3,
    Wav,
    Ogg,
}

impl AudioFormat {
    pub const ALL: [AudioFormat; 4] = [
        AudioFormat::Raw,
        AudioFormat::Mp3,
        AudioFormat::Wav,
        AudioFormat::Ogg,
    ];

    /// Type token passed to the transcoder's `-t` option.
    pub fn as_str(self) -> &'static str {
        match self {
            AudioFormat::Raw => "raw",
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Wav => "wav",
            AudioFormat::Ogg => "ogg",
        }
    }

    pub fn is_raw(self) -> bool {
        self == AudioFormat::Raw
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AudioFormat {
    type Err = DtmfError;

    fn from_str(s: &str) -> Result<Self> {
        let lowered = s.trim().to_ascii_lowercase();
        AudioFormat::ALL
            .into_iter()
            .find(|format| format.as_str() == lowered)
            .ok_or_else(|| DtmfError::InvalidFormat {
                format: s.to_string(),
            })
    }
}

/// Sample encoding of raw PCM, spelled the way sox spells it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
#[serde(rename_all = "kebab-case")]
pub enum SampleEncoding {
    #[default]
    SignedInteger,
    UnsignedInteger,
    FloatingPoint,
    ALaw,
    ULaw,
}

impl SampleEncoding {
    pub fn as_str(self) -> &'static str {
        match self {
            SampleEncoding::SignedInteger => "signed-integer",
            SampleEncoding::UnsignedInteger => "unsigned-integer",
            SampleEncoding::FloatingPoint => "floating-point",
            SampleEncoding::ALaw => "a-law",
            SampleEncoding::ULaw => "u-law",
        }
    }
}

impl fmt::Display for SampleEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Description of headerless PCM audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawProfile {
    pub sample_rate: u32,
    pub encoding: SampleEncoding,
    pub channels: u16,
    pub bits: u16,
}

impl Default for RawProfile {
    /// Profile assumed for raw sources when the caller gives none.
    fn default() -> Self {
        Self {
            sample_rate: defaults::RAW_SAMPLE_RATE,
            encoding: SampleEncoding::SignedInteger,
            channels: defaults::RAW_CHANNELS,
            bits: defaults::RAW_BITS,
        }
    }
}

impl RawProfile {
    /// The fixed profile written into the pipe for the demodulator.
    pub fn target() -> Self {
        Self {
            sample_rate: defaults::TARGET_SAMPLE_RATE,
            encoding: SampleEncoding::SignedInteger,
            channels: defaults::TARGET_CHANNELS,
            bits: defaults::TARGET_BITS,
        }
    }

    /// Transcoder format options describing this profile, without the `-t raw` type.
    pub fn to_args(&self) -> Vec<String> {
        vec![
            "-r".to_string(),
            self.sample_rate.to_string(),
            "-e".to_string(),
            self.encoding.as_str().to_string(),
            "-b".to_string(),
            self.bits.to_string(),
            "-c".to_string(),
            self.channels.to_string(),
        ]
    }
}
