//! Single entry point: owns the demodulator, runs one transcoder per request.

use crate::audio::{AudioFormat, DecodeSource, RawProfile};
use crate::config::Config;
use crate::decoder::events::{Collector, DecoderEvent, EventRouter, Progress, progress, route_events};
use crate::decoder::stream::StreamDecoder;
use crate::diagnostics;
use crate::error::{DtmfError, Result};
use crate::process::{Demodulator, DemodulatorStatus, Transcoder, pipe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard, broadcast, mpsc};
use tokio::time::Instant;

/// How `decode` hands back its symbols.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeMode {
    /// Return as soon as the transcoder is running; symbols only reach subscribers.
    FireAndForget,
    /// Wait for the input to be fully decoded and return the concatenated symbols.
    Buffered,
}

type SharedDemodulator = Arc<Mutex<Option<Demodulator>>>;

/// Exclusive use of the shared pipe, held until a request reaches its terminal state.
///
/// Dropping it releases the pipe. A request that failed calls
/// [`PipeLease::abandon`] instead so the next one starts from a clean pipe.
pub(crate) struct PipeLease {
    demodulator: SharedDemodulator,
    pipe_path: PathBuf,
    _slot: OwnedMutexGuard<()>,
}

impl PipeLease {
    pub(crate) fn pipe_path(&self) -> &Path {
        &self.pipe_path
    }

    /// Ends the demodulator session this request used, then releases the pipe.
    ///
    /// Whatever that session still had to report stays tagged with it, so
    /// the next request never sees it.
    pub(crate) async fn abandon(self) {
        if let Some(demodulator) = self.demodulator.lock().await.as_mut() {
            demodulator.stop().await;
        }
        pipe::remove_stray_file(&self.pipe_path);
    }
}

/// Decoder front end shared by any number of concurrent callers.
///
/// Requests are admitted one at a time in arrival order, so transcoder
/// writes never interleave in the pipe. Each request gets a demodulator
/// session of its own.
pub struct Orchestrator {
    config: Config,
    demodulator: SharedDemodulator,
    admission: Arc<Mutex<()>>,
    router: Arc<EventRouter>,
}

impl Orchestrator {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let router = Arc::new(EventRouter::new(
            config.demodulator.marker.clone(),
            config.decode.event_capacity,
        ));
        Ok(Self {
            config,
            demodulator: Arc::new(Mutex::new(None)),
            admission: Arc::new(Mutex::new(())),
            router,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Symbol and end events for as long as the receiver is kept.
    pub fn subscribe(&self) -> broadcast::Receiver<DecoderEvent> {
        self.router.subscribe()
    }

    /// Demodulator state; `Idle` before the first request.
    pub async fn demodulator_status(&self) -> DemodulatorStatus {
        match self.demodulator.lock().await.as_ref() {
            Some(demodulator) => demodulator.status(),
            None => DemodulatorStatus::Idle,
        }
    }

    /// Decodes a path/URI or an in-memory buffer.
    ///
    /// Returns `Some(symbols)` in [`DecodeMode::Buffered`], `None` otherwise.
    pub async fn decode(
        &self,
        source: DecodeSource,
        format: &str,
        mode: DecodeMode,
    ) -> Result<Option<String>> {
        let format: AudioFormat = format.parse()?;
        let slot = Arc::clone(&self.admission).lock_owned().await;
        tracing::debug!(
            format = %format,
            buffer = source.is_buffer(),
            mode = ?mode,
            "decode request admitted"
        );
        let (lease, collector) = self.attach(slot).await?;

        let started = Transcoder::new(&self.config.transcoder, lease.pipe_path()).and_then(
            |mut transcoder| {
                match source {
                    DecodeSource::Path(path) => transcoder.decode_path(&path, format)?,
                    DecodeSource::Buffer(bytes) => transcoder.decode_buffer(bytes, format)?,
                }
                Ok(transcoder)
            },
        );
        let mut transcoder = match started {
            Ok(transcoder) => transcoder,
            Err(e) => {
                lease.abandon().await;
                return Err(e);
            }
        };

        let drain_timeout = self.config.decode.drain_timeout();
        match mode {
            DecodeMode::Buffered => {
                let result = collect_symbols(&mut transcoder, collector, drain_timeout).await;
                settle(result, &mut transcoder, lease).await.map(Some)
            }
            DecodeMode::FireAndForget => {
                tokio::spawn(async move {
                    let result = collect_symbols(&mut transcoder, collector, drain_timeout).await;
                    if let Err(e) = settle(result, &mut transcoder, lease).await {
                        tracing::warn!("background decode failed: {}", e);
                    }
                });
                Ok(None)
            }
        }
    }

    /// [`Orchestrator::decode`] for a file path or URI.
    pub async fn decode_uri(
        &self,
        uri: &str,
        format: &str,
        mode: DecodeMode,
    ) -> Result<Option<String>> {
        self.decode(DecodeSource::Path(uri.to_string()), format, mode)
            .await
    }

    /// [`Orchestrator::decode`] for in-memory audio.
    pub async fn decode_buffer(
        &self,
        bytes: Vec<u8>,
        format: &str,
        mode: DecodeMode,
    ) -> Result<Option<String>> {
        self.decode(DecodeSource::Buffer(bytes), format, mode).await
    }

    /// Starts a transcoder fed by the caller; symbols arrive on [`Orchestrator::subscribe`].
    ///
    /// The returned decoder holds the pipe until it is finished or dropped.
    pub async fn create_stream_decoder(
        &self,
        format: &str,
        profile: Option<RawProfile>,
    ) -> Result<StreamDecoder> {
        let format: AudioFormat = format.parse()?;
        let slot = Arc::clone(&self.admission).lock_owned().await;
        let (lease, collector) = self.attach(slot).await?;

        let started = Transcoder::new(&self.config.transcoder, lease.pipe_path()).and_then(
            |mut transcoder| {
                transcoder.start_stream(format, profile)?;
                Ok(transcoder)
            },
        );
        match started {
            Ok(transcoder) => Ok(StreamDecoder::new(
                transcoder,
                collector,
                self.config.decode.drain_timeout(),
                lease,
            )),
            Err(e) => {
                lease.abandon().await;
                Err(e)
            }
        }
    }

    /// Kills the demodulator and fails every pending request with
    /// [`DtmfError::DecodeAborted`]. No end event is published.
    pub async fn stop(&self) {
        if let Some(demodulator) = self.demodulator.lock().await.as_mut() {
            demodulator.stop().await;
        }
        self.router.abort_collectors();
    }

    /// Starts a fresh demodulator session for the request holding `slot`.
    ///
    /// The collector is registered before the process exists, so even an
    /// exit during startup reaches it. The demodulator is created on first
    /// use, after checking dependencies.
    async fn attach(&self, slot: OwnedMutexGuard<()>) -> Result<(PipeLease, Collector)> {
        let mut guard = self.demodulator.lock().await;
        if guard.is_none() {
            diagnostics::require_tools(&self.config).await?;
            let (events_tx, events_rx) = mpsc::unbounded_channel();
            tokio::spawn(route_events(events_rx, Arc::clone(&self.router)));
            *guard = Some(Demodulator::new(
                self.config.demodulator.clone(),
                &self.config.pipe,
                events_tx,
            ));
        }
        let Some(demodulator) = guard.as_mut() else {
            return Err(DtmfError::Other("demodulator unavailable".to_string()));
        };

        if demodulator.status() == DemodulatorStatus::Running {
            tracing::debug!("ending a demodulator session no request owns");
            demodulator.stop().await;
        }
        let mut collector = self.router.collect(demodulator.next_session());
        demodulator.start().await?;
        let pipe_path = demodulator.pipe_path().map(Path::to_path_buf);
        drop(guard);

        match pipe_path {
            Some(pipe_path) if pipe::is_fifo(&pipe_path) => Ok((
                PipeLease {
                    demodulator: Arc::clone(&self.demodulator),
                    pipe_path,
                    _slot: slot,
                },
                collector,
            )),
            _ => Err(startup_failure(&mut collector, self.config.decode.drain_timeout()).await),
        }
    }
}

/// Error for a demodulator that exited before a transcoder could attach.
async fn startup_failure(collector: &mut Collector, timeout: Duration) -> DtmfError {
    match await_drain(collector, timeout).await {
        Ok(()) => DtmfError::DemodulatorFailed { code: Some(0) },
        Err(e) => e,
    }
}

/// Releases the pipe after a request's last step; a failure also kills the
/// transcoder and ends the demodulator session first.
pub(crate) async fn settle<T>(
    result: Result<T>,
    transcoder: &mut Transcoder,
    lease: PipeLease,
) -> Result<T> {
    if result.is_err() {
        transcoder.cancel().await;
        lease.abandon().await;
    }
    result
}

/// Accumulates symbols until the transcoder finished and the demodulator
/// drained its input, which it reports as an end event after the last symbol.
async fn collect_symbols(
    transcoder: &mut Transcoder,
    mut collector: Collector,
    drain_timeout: Duration,
) -> Result<String> {
    let mut symbols = String::new();
    let mut finished = false;
    let mut drained = false;
    let mut deadline: Option<Instant> = None;

    let wait = transcoder.wait();
    tokio::pin!(wait);

    while !(finished && drained) {
        tokio::select! {
            outcome = &mut wait, if !finished => {
                outcome?.into_result()?;
                finished = true;
                deadline = Some(deadline_after(drain_timeout));
            }
            event = collector.recv(), if !drained => match progress(event)? {
                Progress::Symbol(symbol) => symbols.push_str(&symbol),
                Progress::Drained => drained = true,
            },
            _ = sleep_until(deadline) => return Err(drain_timed_out(drain_timeout)),
        }
    }
    Ok(symbols)
}

/// Waits for the end event of a pipe whose writer already finished.
pub(crate) async fn await_drain(collector: &mut Collector, drain_timeout: Duration) -> Result<()> {
    let deadline = deadline_after(drain_timeout);
    loop {
        let event = tokio::time::timeout_at(deadline, collector.recv())
            .await
            .map_err(|_| drain_timed_out(drain_timeout))?;
        if progress(event)? == Progress::Drained {
            return Ok(());
        }
    }
}

fn drain_timed_out(drain_timeout: Duration) -> DtmfError {
    DtmfError::DecodeTimeout {
        waited_ms: u64::try_from(drain_timeout.as_millis()).unwrap_or(u64::MAX),
    }
}

/// `now + timeout`, capped at a year for timeouts too large to represent.
fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .unwrap_or_else(|| now + Duration::from_secs(365 * 24 * 60 * 60))
}

/// Sleeps until `deadline`, or forever when there is none yet.
async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
