use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use dtmfpipe::audio::RawProfile;
use dtmfpipe::cli::{Cli, Commands};
use dtmfpipe::config::Config;
use dtmfpipe::diagnostics::{CheckResult, check_dependencies};
use dtmfpipe::{DecodeMode, DecoderEvent, Orchestrator, defaults};
use owo_colors::OwoColorize;
use std::io::Write;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

const PRINTER_GRACE: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.quiet, cli.verbose);
    tracing::debug!("dtmfpipe {}", dtmfpipe::version_string());

    match cli.command {
        Commands::Decode {
            source,
            format,
            timeout,
        } => {
            let mut config = load_config(cli.config.as_deref())?;
            if let Some(timeout) = timeout {
                config.decode.set_drain_timeout(timeout);
            }
            handle_decode(config, &source, &format).await?;
        }
        Commands::Stream { format, raw, json } => {
            let config = load_config(cli.config.as_deref())?;
            handle_stream(config, &format, raw.profile(), json).await?;
        }
        Commands::Check => {
            let config = load_config(cli.config.as_deref())?;
            if !handle_check(&config).await {
                std::process::exit(1);
            }
        }
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "dtmfpipe", &mut std::io::stdout());
        }
    }

    Ok(())
}

/// Log to stderr; `RUST_LOG` wins over the -q/-v flags.
fn init_logging(quiet: bool, verbose: u8) {
    let level = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("dtmfpipe={}", level)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Load configuration from file or use defaults.
///
/// Priority order:
/// 1. Custom config path from CLI (--config)
/// 2. Default config path (~/.config/dtmfpipe/config.toml)
/// 3. Built-in defaults with environment variable overrides
fn load_config(custom_path: Option<&std::path::Path>) -> Result<Config> {
    let config = match custom_path {
        Some(path) => Config::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => Config::load_or_default(&Config::default_path())?,
    };
    Ok(config.with_env_overrides())
}

/// Buffered decode of a path, URI or stdin; prints the symbol string.
async fn handle_decode(config: Config, source: &str, format: &str) -> Result<()> {
    let orchestrator = Orchestrator::new(config)?;
    let symbols = if source == "-" {
        let mut bytes = Vec::new();
        tokio::io::stdin()
            .read_to_end(&mut bytes)
            .await
            .context("failed to read audio from stdin")?;
        orchestrator
            .decode_buffer(bytes, format, DecodeMode::Buffered)
            .await?
    } else {
        orchestrator
            .decode_uri(source, format, DecodeMode::Buffered)
            .await?
    };
    orchestrator.stop().await;

    println!("{}", symbols.unwrap_or_default());
    Ok(())
}

/// Feeds stdin into a stream decoder and prints symbols as they arrive.
async fn handle_stream(
    config: Config,
    format: &str,
    profile: Option<RawProfile>,
    json: bool,
) -> Result<()> {
    let orchestrator = Orchestrator::new(config)?;
    let events = orchestrator.subscribe();
    let mut decoder = orchestrator.create_stream_decoder(format, profile).await?;
    let mut printer = tokio::spawn(print_events(events, json));

    let feed = async {
        let mut stdin = tokio::io::stdin();
        let mut chunk = vec![0u8; defaults::STREAM_CHUNK_BYTES];
        loop {
            let n = stdin.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            decoder.write(&chunk[..n]).await?;
        }
        anyhow::Ok(())
    };

    let interrupted = tokio::select! {
        fed = feed => {
            fed?;
            false
        }
        _ = tokio::signal::ctrl_c() => true,
    };

    let finished = if interrupted {
        tracing::info!("interrupted");
        drop(decoder);
        Ok(())
    } else {
        decoder.finish().await
    };
    orchestrator.stop().await;
    // The end event may still be in flight after the drain completed.
    if tokio::time::timeout(PRINTER_GRACE, &mut printer).await.is_err() {
        printer.abort();
    }
    if !json {
        println!();
    }
    finished?;
    Ok(())
}

/// Prints events until the demodulator reports its end.
async fn print_events(mut events: broadcast::Receiver<DecoderEvent>, json: bool) {
    loop {
        match events.recv().await {
            Ok(event) => {
                if json {
                    match event.to_json() {
                        Ok(line) => println!("{}", line),
                        Err(e) => tracing::warn!("failed to encode event: {}", e),
                    }
                } else if let DecoderEvent::Symbol { symbol } = &event {
                    print!("{}", symbol);
                    let _ = std::io::stdout().flush();
                }
                if matches!(event, DecoderEvent::End { .. }) {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!("dropped {} events", n);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Prints the dependency report; `false` when a tool is unusable.
async fn handle_check(config: &Config) -> bool {
    println!("Checking system dependencies...\n");
    let mut all_ok = true;
    for (tool, result) in check_dependencies(config).await {
        print!("{} ({}): ", tool.program, tool.role);
        match result {
            CheckResult::Ok => println!("{}", "✓ OK".green()),
            CheckResult::NotFound => {
                all_ok = false;
                println!("{}", "✗ NOT FOUND".red());
                println!("  Install: sudo apt install {}  (Debian/Ubuntu)", package_hint(&tool.program));
            }
            CheckResult::Warning(message) => {
                all_ok = false;
                println!("{} {}", "⚠ WARNING:".yellow(), message);
            }
        }
    }
    all_ok
}

fn package_hint(program: &str) -> &str {
    match program {
        defaults::DEMODULATOR_PROGRAM => "multimon-ng",
        defaults::TRANSCODER_PROGRAM => "sox libsox-fmt-mp3",
        other => other,
    }
}
