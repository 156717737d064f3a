//! `murmur`: speak text from stdin incrementally into a WAV file.
//!
//! ```text
//! stdin lines ──push──► SpeechSession ──AudioStream──► WavSink (16-bit PCM)
//!        EOF ──flush──┘        ▲
//!                Ctrl-C ──cancel
//! ```

mod output;
mod settings;

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use murmur_core::{
    CancellationToken, HttpSynthesizer, SessionStatus, SpeechSession, StubSynthesizer,
    SynthHandle, SynthServer,
};
use tracing::{error, info, warn};

use output::WavSink;
use settings::{load_settings, CliSettings};

#[derive(Debug, Default)]
struct Args {
    config: Option<PathBuf>,
    stub: bool,
    server_url: Option<String>,
    spawn_server: Option<String>,
    narration: bool,
    prefetch: Option<usize>,
    output: Option<PathBuf>,
    print_events: bool,
}

const USAGE: &str = "Usage: murmur [--config <settings.json>] [--stub] \\
  [--server <url> | --spawn-server <command>] [--narration] \\
  [--prefetch <n>] [--output <out.wav>] [--print-events]";

fn parse_args() -> Result<Args, String> {
    let mut args = Args::default();

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--config" => {
                let Some(v) = it.next() else {
                    return Err("missing value for --config".into());
                };
                args.config = Some(PathBuf::from(v));
            }
            "--stub" => args.stub = true,
            "--server" => {
                let Some(v) = it.next() else {
                    return Err("missing value for --server".into());
                };
                args.server_url = Some(v);
            }
            "--spawn-server" => {
                let Some(v) = it.next() else {
                    return Err("missing value for --spawn-server".into());
                };
                args.spawn_server = Some(v);
            }
            "--narration" => args.narration = true,
            "--prefetch" => {
                let Some(v) = it.next() else {
                    return Err("missing value for --prefetch".into());
                };
                let n = v
                    .parse::<usize>()
                    .map_err(|_| "invalid value for --prefetch".to_string())?;
                args.prefetch = Some(n.clamp(1, 16));
            }
            "--output" | "-o" => {
                let Some(v) = it.next() else {
                    return Err("missing value for --output".into());
                };
                args.output = Some(PathBuf::from(v));
            }
            "--print-events" => args.print_events = true,
            "--help" | "-h" => {
                println!("{USAGE}");
                std::process::exit(0);
            }
            other => return Err(format!("unknown argument: {other}")),
        }
    }

    if args.server_url.is_some() && args.spawn_server.is_some() {
        return Err("--server and --spawn-server are mutually exclusive".into());
    }
    Ok(args)
}

fn apply_args(settings: &mut CliSettings, args: &Args) {
    if args.narration {
        settings.session.narration_mode = true;
    }
    if let Some(n) = args.prefetch {
        settings.session.prefetch_buffer_size = n;
    }
    if let Some(url) = &args.server_url {
        settings.server_url = url.clone();
        settings.server.command.clear();
    }
    if let Some(cmd) = &args.spawn_server {
        settings.server = settings.server.clone().with_command_line(cmd);
    }
    if let Some(out) = &args.output {
        settings.output_path = out.clone();
    }
    settings.normalize();
}

/// Backend plus whatever must stay alive alongside it.
struct Backend {
    handle: SynthHandle,
    _server: Option<SynthServer>,
}

fn build_backend(settings: &CliSettings, stub: bool) -> Result<Backend> {
    if stub {
        info!("using stub synthesizer");
        return Ok(Backend {
            handle: SynthHandle::new(StubSynthesizer::new()),
            _server: None,
        });
    }

    let server = if settings.server.command.is_empty() {
        None
    } else {
        info!(
            command = ?settings.server.command,
            port = settings.server.port,
            "starting synthesis server"
        );
        Some(SynthServer::spawn(&settings.server)?)
    };
    let url = server
        .as_ref()
        .map(SynthServer::url)
        .unwrap_or_else(|| settings.server_url.clone());

    let synth = HttpSynthesizer::new(url, Duration::from_secs(settings.request_timeout_secs))?;
    info!(url = synth.base_url(), "using HTTP synthesizer");
    Ok(Backend {
        handle: SynthHandle::new(synth),
        _server: server,
    })
}

/// Feed stdin into the session line by line, flushing at EOF.
///
/// Runs on a detached thread: a blocked stdin read must not keep the
/// process alive after cancellation.
fn spawn_stdin_feeder(session: Arc<SpeechSession>, cancel: CancellationToken) {
    let spawned = thread::Builder::new()
        .name("murmur-stdin".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                if cancel.is_cancelled() {
                    return;
                }
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        warn!(error = %e, "stdin read failed; flushing what we have");
                        break;
                    }
                };
                if let Err(e) = session.push(&format!("{line}\n")) {
                    warn!(error = %e, "session stopped accepting text");
                    return;
                }
            }
            if let Err(e) = session.flush() {
                warn!(error = %e, "flush rejected");
            }
        });
    if let Err(e) = spawned {
        error!(error = %e, "failed to spawn stdin reader");
    }
}

fn spawn_event_printer(session: &SpeechSession) {
    let mut status_rx = session.subscribe_status();
    let mut segment_rx = session.subscribe_segments();

    tokio::spawn(async move {
        loop {
            let line = tokio::select! {
                ev = status_rx.recv() => match ev {
                    Ok(ev) => serde_json::to_string(&ev),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(_) => break,
                },
                ev = segment_rx.recv() => match ev {
                    Ok(ev) => serde_json::to_string(&ev),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(_) => break,
                },
            };
            match line {
                Ok(line) => eprintln!("{line}"),
                Err(e) => warn!(error = %e, "event serialization failed"),
            }
        }
    });
}

async fn run(args: Args) -> Result<()> {
    let mut settings = match &args.config {
        Some(path) => load_settings(path),
        None => CliSettings::default(),
    };
    apply_args(&mut settings, &args);

    let stub = args.stub;
    let backend_settings = settings.clone();
    // Server startup and the health check block.
    let backend = tokio::task::spawn_blocking(move || -> Result<Backend> {
        let backend = build_backend(&backend_settings, stub)?;
        backend.handle.warm_up().context("backend warm-up failed")?;
        Ok(backend)
    })
    .await??;

    let config = settings.session.clone().with_env_overrides();
    info!(
        prefetch = config.prefetch_buffer_size,
        max_chars = config.max_chars,
        first_chunk_max_chars = config.first_chunk_max_chars,
        narration = config.narration_mode,
        "session config"
    );
    let session = Arc::new(SpeechSession::new(config, backend.handle.clone())?);
    let cancel = CancellationToken::new();

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received; cancelling session");
                cancel.cancel();
            }
        });
    }
    if args.print_events {
        spawn_event_printer(&session);
    }

    let stream = session.stream(cancel.clone())?;
    spawn_stdin_feeder(Arc::clone(&session), cancel.clone());

    let output_path = settings.output_path.clone();
    let sink = tokio::task::spawn_blocking(move || -> Result<WavSink> {
        let started = Instant::now();
        let mut sink = WavSink::new(output_path);
        let mut first = true;
        for item in stream {
            let chunk = item?;
            if first && !chunk.is_empty() {
                info!(
                    latency_ms = started.elapsed().as_millis() as u64,
                    "first audio received"
                );
                first = false;
            }
            sink.write(&chunk)?;
        }
        Ok(sink)
    })
    .await??;

    let diag = session.diagnostics_snapshot();
    let status = session.status();
    let duration = sink.duration_secs();
    let path = sink.path().to_path_buf();
    match sink.finish()? {
        Some(written) => info!(
            path = %written.display(),
            duration_secs = duration,
            segments = diag.segments_ready,
            ?status,
            "audio written"
        ),
        None => info!(path = %path.display(), ?status, "no audio produced"),
    }

    drop(backend);
    if status == SessionStatus::Cancelled {
        std::process::exit(130);
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("murmur=info,murmur_core=info")
            }),
        )
        .init();

    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{e}\n{USAGE}");
            std::process::exit(2);
        }
    };

    if let Err(e) = run(args).await {
        error!(error = %e, "murmur failed");
        eprintln!("murmur failed: {e:#}");
        std::process::exit(1);
    }
}
