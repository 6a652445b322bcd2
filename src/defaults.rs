//! Default configuration constants for dtmfpipe.
//!
//! Shared between the config layer, the process supervisors and the CLI so
//! the external tool contracts are spelled out in one place.

/// Demodulator binary (multimon-ng; the classic `multimon` accepts the same flags).
pub const DEMODULATOR_PROGRAM: &str = "multimon-ng";

/// Demodulator flags: quiet, DTMF-only, raw input. The pipe path is appended.
pub const DEMODULATOR_ARGS: &[&str] = &["-v", "0", "-q", "-a", "DTMF", "-t", "raw"];

/// Arguments used to make the demodulator print its list of demodulators.
pub const DEMODULATOR_PROBE_ARGS: &[&str] = &["-h"];

/// Substring the demodulator's probe output must contain.
pub const DEMODULATOR_PROBE_MARKER: &str = "DTMF";

/// Prefix of a decoded-symbol line on the demodulator's stdout.
pub const SYMBOL_MARKER: &str = "DTMF: ";

/// Transcoder binary.
pub const TRANSCODER_PROGRAM: &str = "sox";

/// Arguments used to make the transcoder identify itself.
pub const TRANSCODER_PROBE_ARGS: &[&str] = &["--version"];

/// Substring the transcoder's probe output must contain.
pub const TRANSCODER_PROBE_MARKER: &str = "SoX";

/// Sample rate the demodulator expects on the pipe.
pub const TARGET_SAMPLE_RATE: u32 = 22050;

/// Bit depth the demodulator expects on the pipe (signed integer PCM).
pub const TARGET_BITS: u16 = 16;

/// Channel count the demodulator expects on the pipe.
pub const TARGET_CHANNELS: u16 = 1;

/// Source sample rate assumed for raw input when none is given.
pub const RAW_SAMPLE_RATE: u32 = 44100;

/// Source bit depth assumed for raw input when none is given.
pub const RAW_BITS: u16 = 8;

/// Source channel count assumed for raw input when none is given.
pub const RAW_CHANNELS: u16 = 1;

/// Prefix for generated FIFO names in the temp directory.
pub const PIPE_PREFIX: &str = "dtmf_pipe_";

/// Permission bits for created FIFOs.
pub const PIPE_MODE: u32 = 0o600;

/// How long a buffered decode waits for the demodulator to drain after the
/// transcoder finished.
pub const DRAIN_TIMEOUT_MS: u64 = 30_000;

/// How long a dependency probe may run before the tool is considered broken.
pub const PROBE_TIMEOUT_MS: u64 = 5_000;

/// Capacity of the symbol broadcast channel per subscriber.
pub const EVENT_CAPACITY: usize = 1024;

/// Chunk size used when the CLI forwards stdin to a stream decoder.
pub const STREAM_CHUNK_BYTES: usize = 4096;
