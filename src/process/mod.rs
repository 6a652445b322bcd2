//! Supervision of the two external tools and the FIFO that connects them.
//!
//! The transcoder writes raw PCM into the pipe, the demodulator reads it and
//! prints one line per detected tone.

pub mod demodulator;
pub mod pipe;
pub mod transcoder;

pub use demodulator::{Demodulator, DemodulatorEvent, DemodulatorStatus};
pub use pipe::PipeResource;
pub use transcoder::{TranscodeOutcome, Transcoder, TranscoderStatus};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

/// Forward a child's stderr to the debug log, one record per non-empty line.
pub(crate) async fn log_stderr<R>(program: String, stderr: R)
where
    R: AsyncRead + Unpin,
{
    let mut segments = BufReader::new(stderr).split(b'\n');
    loop {
        match segments.next_segment().await {
            Ok(Some(raw)) => {
                if let Some(line) = clean_line(&raw) {
                    tracing::debug!(program = %program, "{}", line);
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(program = %program, "stderr read failed: {}", e);
                break;
            }
        }
    }
}

/// Decode one raw output line: lossy UTF-8, trimmed, `None` when blank.
pub(crate) fn clean_line(raw: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(raw);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
