//! Short-lived transcoder process that writes raw PCM into the shared pipe.
//!
//! One instance runs one operation at a time: a path decode, a buffer
//! decode, or a stream decode fed through [`Transcoder::write`]. The process
//! exit decides the outcome; the instance is `Idle` again afterwards.

use crate::audio::{AudioFormat, RawProfile};
use crate::config::TranscoderConfig;
use crate::error::{DtmfError, Result};
use crate::process::log_stderr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::{ChildStdin, Command};
use tokio::sync::{oneshot, watch};

/// Source token telling the transcoder to read its stdin.
const STDIN_SOURCE: &str = "-";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscoderStatus {
    Idle,
    Busy,
}

/// How a transcoder process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscodeOutcome {
    /// Exit code 0: everything was flushed into the pipe.
    Finished,
    /// Non-zero exit or killed by a signal.
    Failed { code: Option<i32> },
}

impl TranscodeOutcome {
    pub fn into_result(self) -> Result<()> {
        match self {
            TranscodeOutcome::Finished => Ok(()),
            TranscodeOutcome::Failed { code } => Err(DtmfError::TranscoderFailed { code }),
        }
    }
}

pub struct Transcoder {
    program: String,
    leading_args: Vec<String>,
    pipe_path: PathBuf,
    status: Arc<watch::Sender<TranscoderStatus>>,
    stdin: Option<ChildStdin>,
    outcome: Option<oneshot::Receiver<TranscodeOutcome>>,
    /// Dropping it kills a process that is still running.
    abort: Option<oneshot::Sender<()>>,
}

impl Transcoder {
    /// Creates an idle transcoder writing into `pipe_path`.
    pub fn new(config: &TranscoderConfig, pipe_path: &Path) -> Result<Self> {
        if pipe_path.as_os_str().is_empty() {
            return Err(DtmfError::MissingPipe);
        }
        let (status, _) = watch::channel(TranscoderStatus::Idle);
        Ok(Self {
            program: config.program.clone(),
            leading_args: config.args.clone(),
            pipe_path: pipe_path.to_path_buf(),
            status: Arc::new(status),
            stdin: None,
            outcome: None,
            abort: None,
        })
    }

    pub fn status(&self) -> TranscoderStatus {
        *self.status.borrow()
    }

    pub fn pipe_path(&self) -> &Path {
        &self.pipe_path
    }

    /// Transcodes a file path or URI into the pipe.
    pub fn decode_path(&mut self, source: &str, format: AudioFormat) -> Result<()> {
        self.ensure_idle()?;
        let args = build_args(format, source, None, &self.pipe_path);
        self.spawn(args, false)?;
        Ok(())
    }

    /// Transcodes in-memory audio; the bytes are written to stdin in the
    /// background and stdin is closed afterwards.
    pub fn decode_buffer(&mut self, bytes: Vec<u8>, format: AudioFormat) -> Result<()> {
        self.ensure_idle()?;
        let args = build_args(format, STDIN_SOURCE, None, &self.pipe_path);
        let Some(mut stdin) = self.spawn(args, true)? else {
            return Err(DtmfError::NotStarted);
        };
        tokio::spawn(async move {
            // A failing transcoder closes its stdin early; its exit code reports why.
            if let Err(e) = stdin.write_all(&bytes).await {
                tracing::debug!("transcoder input write failed: {}", e);
            } else if let Err(e) = stdin.shutdown().await {
                tracing::debug!("transcoder input close failed: {}", e);
            }
        });
        Ok(())
    }

    /// Starts a transcode fed by later [`Transcoder::write`] calls.
    ///
    /// For raw input `profile` describes the source PCM
    /// ([`RawProfile::default`] when `None`); other formats ignore it.
    pub fn start_stream(&mut self, format: AudioFormat, profile: Option<RawProfile>) -> Result<()> {
        self.ensure_idle()?;
        let args = build_args(format, STDIN_SOURCE, profile, &self.pipe_path);
        self.stdin = self.spawn(args, true)?;
        Ok(())
    }

    /// Forwards bytes to a running stream transcode.
    pub async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        if self.status() != TranscoderStatus::Busy {
            return Err(DtmfError::NotStarted);
        }
        let stdin = self.stdin.as_mut().ok_or(DtmfError::NotStarted)?;
        stdin.write_all(bytes).await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Closes the input (if any) and waits for the process to exit.
    pub async fn finish(&mut self) -> Result<TranscodeOutcome> {
        if let Some(mut stdin) = self.stdin.take()
            && let Err(e) = stdin.shutdown().await
        {
            tracing::debug!("transcoder input close failed: {}", e);
        }
        self.wait().await
    }

    /// Waits for the current operation's process to exit.
    pub async fn wait(&mut self) -> Result<TranscodeOutcome> {
        let outcome = self.outcome.take().ok_or(DtmfError::NotStarted)?;
        outcome
            .await
            .map_err(|_| DtmfError::Other("transcoder supervisor dropped".to_string()))
    }

    /// Kills a running process and returns once it has been reaped.
    ///
    /// No-op when nothing is running.
    pub async fn cancel(&mut self) {
        self.stdin = None;
        let mut status = self.status.subscribe();
        self.abort = None;
        if status
            .wait_for(|s| *s == TranscoderStatus::Idle)
            .await
            .is_err()
        {
            tracing::debug!(program = %self.program, "transcoder watcher already gone");
        }
    }

    fn ensure_idle(&self) -> Result<()> {
        match self.status() {
            TranscoderStatus::Idle => Ok(()),
            TranscoderStatus::Busy => Err(DtmfError::Busy),
        }
    }

    /// Spawns the process and its exit watcher; returns stdin when piped.
    fn spawn(&mut self, args: Vec<String>, piped_stdin: bool) -> Result<Option<ChildStdin>> {
        tracing::debug!(program = %self.program, args = ?args, "spawning transcoder");
        let mut child = Command::new(&self.program)
            .args(&self.leading_args)
            .args(&args)
            .stdin(if piped_stdin {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| DtmfError::Spawn {
                program: self.program.clone(),
                message: e.to_string(),
            })?;

        let stdin = child.stdin.take();
        let stderr = child.stderr.take();
        let program = self.program.clone();
        let status = Arc::clone(&self.status);
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let (abort_tx, mut abort_rx) = oneshot::channel::<()>();

        status.send_replace(TranscoderStatus::Busy);
        self.outcome = Some(outcome_rx);
        self.abort = Some(abort_tx);

        tokio::spawn(async move {
            let stderr_task = stderr.map(|stderr| tokio::spawn(log_stderr(program.clone(), stderr)));
            let exit = tokio::select! {
                exit = child.wait() => exit,
                _ = &mut abort_rx => {
                    tracing::debug!(program = %program, "killing abandoned transcoder");
                    if let Err(e) = child.start_kill() {
                        tracing::warn!(program = %program, "failed to kill transcoder: {}", e);
                    }
                    child.wait().await
                }
            };
            let outcome = match exit {
                Ok(exit) if exit.success() => TranscodeOutcome::Finished,
                Ok(exit) => TranscodeOutcome::Failed { code: exit.code() },
                Err(e) => {
                    tracing::warn!(program = %program, "failed to reap transcoder: {}", e);
                    TranscodeOutcome::Failed { code: None }
                }
            };
            if let Some(task) = stderr_task {
                let _ = task.await;
            }
            match outcome {
                TranscodeOutcome::Finished => tracing::debug!(program = %program, "transcode finished"),
                TranscodeOutcome::Failed { code } => {
                    tracing::warn!(program = %program, code = ?code, "transcode failed")
                }
            }
            status.send_replace(TranscoderStatus::Idle);
            let _ = outcome_tx.send(outcome);
        });

        Ok(stdin)
    }
}

/// Transcoder argv: `[input options] -t <format> <source>` followed by the
/// fixed raw output profile and the pipe path.
pub fn build_args(
    format: AudioFormat,
    source: &str,
    profile: Option<RawProfile>,
    pipe_path: &Path,
) -> Vec<String> {
    let mut args = vec!["-q".to_string()];
    if format.is_raw() {
        args.extend(profile.unwrap_or_default().to_args());
    }
    args.push("-t".to_string());
    args.push(format.as_str().to_string());
    args.push(source.to_string());

    args.push("-t".to_string());
    args.push("raw".to_string());
    args.extend(RawProfile::target().to_args());
    args.push(pipe_path.display().to_string());
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::SampleEncoding;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Transcoder config running a shell script through `sh`.
    fn script_config(dir: &TempDir, body: &str) -> TranscoderConfig {
        let path = dir.path().join("fake-sox.sh");
        std::fs::write(&path, body).unwrap();
        TranscoderConfig {
            program: "sh".to_string(),
            args: vec![path.display().to_string()],
            ..TranscoderConfig::default()
        }
    }

    /// Copies stdin (or the source argument) into the last argument.
    const COPY_SCRIPT: &str = r#"
state=0
for a in "$@"; do
  case $state in
    0) [ "$a" = "-t" ] && state=1 ;;
    1) state=2 ;;
    2) src="$a"; state=3 ;;
  esac
  out="$a"
done
if [ "$src" = "-" ]; then cat > "$out"; else cat "$src" > "$out"; fi
"#;

    async fn wait_outcome(transcoder: &mut Transcoder) -> TranscodeOutcome {
        tokio::time::timeout(Duration::from_secs(5), transcoder.wait())
            .await
            .expect("transcoder did not exit")
            .expect("outcome")
    }

    #[test]
    fn build_args_for_file_source() {
        let args = build_args(AudioFormat::Wav, "tones.wav", None, Path::new("/tmp/p"));
        assert_eq!(
            args,
            vec![
                "-q", "-t", "wav", "tones.wav", "-t", "raw", "-r", "22050", "-e",
                "signed-integer", "-b", "16", "-c", "1", "/tmp/p"
            ]
        );
    }

    #[test]
    fn build_args_raw_defaults_source_profile() {
        let args = build_args(AudioFormat::Raw, "-", None, Path::new("/tmp/p"));
        assert_eq!(
            &args[..12],
            &[
                "-q", "-r", "44100", "-e", "signed-integer", "-b", "8", "-c", "1", "-t", "raw",
                "-"
            ]
        );
        assert_eq!(&args[12..14], &["-t", "raw"]);
        assert_eq!(args.last().map(String::as_str), Some("/tmp/p"));
    }

    #[test]
    fn build_args_raw_custom_profile() {
        let profile = RawProfile {
            sample_rate: 8000,
            encoding: SampleEncoding::ULaw,
            channels: 2,
            bits: 8,
        };
        let args = build_args(AudioFormat::Raw, "-", Some(profile), Path::new("/tmp/p"));
        assert_eq!(
            &args[1..9],
            &["-r", "8000", "-e", "u-law", "-b", "8", "-c", "2"]
        );
    }

    #[test]
    fn build_args_non_raw_ignores_profile() {
        let with = build_args(AudioFormat::Mp3, "-", Some(RawProfile::default()), Path::new("/p"));
        let without = build_args(AudioFormat::Mp3, "-", None, Path::new("/p"));
        assert_eq!(with, without);
    }

    #[test]
    fn empty_pipe_name_is_rejected() {
        let result = Transcoder::new(&TranscoderConfig::default(), Path::new(""));
        assert!(matches!(result, Err(DtmfError::MissingPipe)));
    }

    #[tokio::test]
    async fn decode_path_copies_source_and_finishes() {
        let dir = TempDir::new().unwrap();
        let config = script_config(&dir, COPY_SCRIPT);
        let source = dir.path().join("in.wav");
        let out = dir.path().join("out.raw");
        std::fs::write(&source, b"audio").unwrap();

        let mut transcoder = Transcoder::new(&config, &out).unwrap();
        transcoder
            .decode_path(&source.display().to_string(), AudioFormat::Wav)
            .unwrap();
        assert_eq!(transcoder.status(), TranscoderStatus::Busy);

        assert_eq!(wait_outcome(&mut transcoder).await, TranscodeOutcome::Finished);
        assert_eq!(transcoder.status(), TranscoderStatus::Idle);
        assert_eq!(std::fs::read(&out).unwrap(), b"audio");
    }

    #[tokio::test]
    async fn decode_buffer_writes_stdin_and_closes_it() {
        let dir = TempDir::new().unwrap();
        let config = script_config(&dir, COPY_SCRIPT);
        let out = dir.path().join("out.raw");

        let mut transcoder = Transcoder::new(&config, &out).unwrap();
        transcoder
            .decode_buffer(b"buffered bytes".to_vec(), AudioFormat::Ogg)
            .unwrap();

        assert_eq!(wait_outcome(&mut transcoder).await, TranscodeOutcome::Finished);
        assert_eq!(std::fs::read(&out).unwrap(), b"buffered bytes");
    }

    #[tokio::test]
    async fn second_operation_while_busy_fails() {
        let dir = TempDir::new().unwrap();
        let config = script_config(&dir, "sleep 1");
        let out = dir.path().join("out.raw");

        let mut transcoder = Transcoder::new(&config, &out).unwrap();
        transcoder.decode_path("a.wav", AudioFormat::Wav).unwrap();

        assert!(matches!(
            transcoder.decode_path("b.wav", AudioFormat::Wav),
            Err(DtmfError::Busy)
        ));
        assert!(matches!(
            transcoder.decode_buffer(vec![1, 2], AudioFormat::Wav),
            Err(DtmfError::Busy)
        ));
        assert!(matches!(
            transcoder.start_stream(AudioFormat::Raw, None),
            Err(DtmfError::Busy)
        ));

        // The first operation is unaffected
        assert_eq!(wait_outcome(&mut transcoder).await, TranscodeOutcome::Finished);
    }

    #[tokio::test]
    async fn nonzero_exit_is_failure_and_returns_to_idle() {
        let dir = TempDir::new().unwrap();
        let config = script_config(&dir, "echo 'sox FAIL formats: no handler' >&2\nexit 2");
        let out = dir.path().join("out.raw");

        let mut transcoder = Transcoder::new(&config, &out).unwrap();
        transcoder.decode_path("missing.mp3", AudioFormat::Mp3).unwrap();

        let outcome = wait_outcome(&mut transcoder).await;
        assert_eq!(outcome, TranscodeOutcome::Failed { code: Some(2) });
        assert!(matches!(
            outcome.into_result(),
            Err(DtmfError::TranscoderFailed { code: Some(2) })
        ));
        assert_eq!(transcoder.status(), TranscoderStatus::Idle);

        // Idle again, so another operation may start
        transcoder.decode_path("again.mp3", AudioFormat::Mp3).unwrap();
        assert_eq!(
            wait_outcome(&mut transcoder).await,
            TranscodeOutcome::Failed { code: Some(2) }
        );
    }

    #[tokio::test]
    async fn write_before_start_is_not_started() {
        let mut transcoder =
            Transcoder::new(&TranscoderConfig::default(), Path::new("/tmp/p")).unwrap();
        assert!(matches!(
            transcoder.write(b"chunk").await,
            Err(DtmfError::NotStarted)
        ));
        assert!(matches!(transcoder.wait().await, Err(DtmfError::NotStarted)));
    }

    #[tokio::test]
    async fn stream_writes_chunks_until_finish() {
        let dir = TempDir::new().unwrap();
        let config = script_config(&dir, COPY_SCRIPT);
        let out = dir.path().join("out.raw");

        let mut transcoder = Transcoder::new(&config, &out).unwrap();
        transcoder.start_stream(AudioFormat::Raw, None).unwrap();
        transcoder.write(b"chunk-1 ").await.unwrap();
        transcoder.write(b"chunk-2").await.unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(5), transcoder.finish())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome, TranscodeOutcome::Finished);
        assert_eq!(std::fs::read(&out).unwrap(), b"chunk-1 chunk-2");

        // Finished stream no longer accepts input
        assert!(matches!(
            transcoder.write(b"late").await,
            Err(DtmfError::NotStarted)
        ));
    }

    #[tokio::test]
    async fn cancel_kills_and_reaps_the_process() {
        let dir = TempDir::new().unwrap();
        let config = script_config(&dir, "exec sleep 30");
        let out = dir.path().join("out.raw");

        let mut transcoder = Transcoder::new(&config, &out).unwrap();
        transcoder.decode_path("a.wav", AudioFormat::Wav).unwrap();
        tokio::time::timeout(Duration::from_secs(5), transcoder.cancel())
            .await
            .expect("cancel did not return");
        assert_eq!(transcoder.status(), TranscoderStatus::Idle);

        // Idle again, and cancelling an idle transcoder is a no-op
        transcoder.cancel().await;
        transcoder.decode_path("b.wav", AudioFormat::Wav).unwrap();
        transcoder.cancel().await;
        assert_eq!(transcoder.status(), TranscoderStatus::Idle);
    }

    #[tokio::test]
    async fn dropping_a_busy_transcoder_kills_it() {
        let dir = TempDir::new().unwrap();
        let config = script_config(&dir, "exec sleep 30");
        let out = dir.path().join("out.raw");

        let mut transcoder = Transcoder::new(&config, &out).unwrap();
        transcoder.decode_path("a.wav", AudioFormat::Wav).unwrap();
        let mut status = transcoder.status.subscribe();
        drop(transcoder);

        tokio::time::timeout(
            Duration::from_secs(5),
            status.wait_for(|s| *s == TranscoderStatus::Idle),
        )
        .await
        .expect("abandoned transcoder kept running")
        .unwrap();
    }

    #[tokio::test]
    async fn missing_program_is_spawn_error() {
        let config = TranscoderConfig {
            program: "/nonexistent/dtmfpipe-sox".to_string(),
            ..TranscoderConfig::default()
        };
        let mut transcoder = Transcoder::new(&config, Path::new("/tmp/p")).unwrap();
        assert!(matches!(
            transcoder.decode_path("a.wav", AudioFormat::Wav),
            Err(DtmfError::Spawn { .. })
        ));
        assert_eq!(transcoder.status(), TranscoderStatus::Idle);
    }
}
