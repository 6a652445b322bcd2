//! Audio source descriptions handed to the transcoder.

pub mod format;

pub use format::{AudioFormat, RawProfile, SampleEncoding};

/// Where a one-shot decode reads its audio from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeSource {
    /// File path or URI the transcoder opens itself.
    Path(String),
    /// In-memory audio written to the transcoder's stdin.
    Buffer(Vec<u8>),
}

impl DecodeSource {
    pub fn is_buffer(&self) -> bool {
        matches!(self, DecodeSource::Buffer(_))
    }
}

impl From<&str> for DecodeSource {
    fn from(path: &str) -> Self {
        DecodeSource::Path(path.to_string())
    }
}

impl From<Vec<u8>> for DecodeSource {
    fn from(bytes: Vec<u8>) -> Self {
        DecodeSource::Buffer(bytes)
    }
}
