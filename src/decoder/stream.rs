//! Caller-fed decode: audio arrives in chunks, symbols go to subscribers.

use crate::decoder::events::{Collector, Progress, progress};
use crate::decoder::orchestrator::{PipeLease, await_drain, settle};
use crate::error::{DtmfError, Result};
use crate::process::{Transcoder, TranscoderStatus};
use std::time::Duration;

/// A running stream transcode that owns the shared pipe.
///
/// Other requests queue until [`StreamDecoder::finish`] returns or the
/// decoder is dropped. Dropping it without finishing kills the transcoder.
pub struct StreamDecoder {
    transcoder: Transcoder,
    collector: Collector,
    drain_timeout: Duration,
    lease: PipeLease,
}

impl StreamDecoder {
    pub(crate) fn new(
        transcoder: Transcoder,
        collector: Collector,
        drain_timeout: Duration,
        lease: PipeLease,
    ) -> Self {
        Self {
            transcoder,
            collector,
            drain_timeout,
            lease,
        }
    }

    /// Feeds one chunk of input audio.
    ///
    /// Fails once the demodulator has gone away, since nothing would read
    /// the pipe any more.
    pub async fn write(&mut self, chunk: &[u8]) -> Result<()> {
        self.check_demodulator()?;
        self.transcoder.write(chunk).await
    }

    pub fn status(&self) -> TranscoderStatus {
        self.transcoder.status()
    }

    /// Ends the input, waits for the transcoder and then for the demodulator
    /// to drain the pipe. The pipe is released afterwards in every case, and
    /// after a failure the demodulator session is ended first.
    pub async fn finish(self) -> Result<()> {
        let Self {
            mut transcoder,
            mut collector,
            drain_timeout,
            lease,
        } = self;
        let result = drain(&mut transcoder, &mut collector, drain_timeout).await;
        settle(result, &mut transcoder, lease).await
    }

    /// Discards symbols queued so far (subscribers already got them) and
    /// reports an early demodulator exit or abort.
    fn check_demodulator(&mut self) -> Result<()> {
        while let Some(event) = self.collector.try_recv() {
            if progress(event)? == Progress::Drained {
                return Err(DtmfError::DemodulatorFailed { code: Some(0) });
            }
        }
        Ok(())
    }
}

async fn drain(
    transcoder: &mut Transcoder,
    collector: &mut Collector,
    drain_timeout: Duration,
) -> Result<()> {
    transcoder.finish().await?.into_result()?;
    await_drain(collector, drain_timeout).await
}
