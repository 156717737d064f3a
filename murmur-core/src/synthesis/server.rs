//! `SynthServer`: keeps a TTS HTTP server subprocess warm for the session.
//!
//! ## Startup
//!
//! ```text
//! spawn <program> <args…> --port <port> [--ref-audio p] [--ref-text t] [--quantize 4|8]
//!     └─► stdout line "READY"   → server accepts /synthesize
//!     └─► other stdout/stderr   → forwarded to tracing (debug)
//!     └─► exit / timeout        → SpeechError::ServerStartup
//! ```
//!
//! The child is killed when the `SynthServer` is dropped.

use std::ffi::OsString;
use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::Duration;

use crossbeam_channel::RecvTimeoutError;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Result, SpeechError};

pub const DEFAULT_SERVER_PORT: u16 = 18_230;
const READY_LINE: &str = "READY";

/// How to launch the server process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct SynthServerConfig {
    /// Program plus leading arguments, e.g. `["python3", "server/tts_server.py"]`.
    pub command: Vec<String>,
    pub port: u16,
    /// Reference voice sample for voice-cloning engines.
    pub ref_audio: Option<PathBuf>,
    /// Transcript of `ref_audio`.
    pub ref_text: Option<String>,
    /// Weight quantization in bits; the server accepts 4 or 8.
    pub quantize: Option<u8>,
    /// Model download + warm-up can take minutes on first run.
    pub startup_timeout_secs: u64,
}

impl Default for SynthServerConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            port: DEFAULT_SERVER_PORT,
            ref_audio: None,
            ref_text: None,
            quantize: None,
            startup_timeout_secs: 120,
        }
    }
}

impl SynthServerConfig {
    /// Split a shell-style command line on whitespace.
    pub fn with_command_line(mut self, command_line: &str) -> Self {
        self.command = command_line.split_whitespace().map(str::to_string).collect();
        self
    }

    /// Flags appended after `command`.
    ///
    /// # Errors
    /// `SpeechError::InvalidConfig` for a quantization other than 4 or 8.
    pub fn launch_args(&self) -> Result<Vec<OsString>> {
        let mut args: Vec<OsString> = vec!["--port".into(), self.port.to_string().into()];
        if let Some(ref_audio) = &self.ref_audio {
            args.push("--ref-audio".into());
            args.push(ref_audio.clone().into_os_string());
        }
        if let Some(ref_text) = &self.ref_text {
            args.push("--ref-text".into());
            args.push(ref_text.into());
        }
        match self.quantize {
            None => {}
            Some(bits @ (4 | 8)) => {
                args.push("--quantize".into());
                args.push(bits.to_string().into());
            }
            Some(other) => {
                return Err(SpeechError::InvalidConfig(format!(
                    "quantize must be 4 or 8, got {other}"
                )));
            }
        }
        Ok(args)
    }
}

/// A running server subprocess.
pub struct SynthServer {
    child: Child,
    port: u16,
}

impl SynthServer {
    /// Spawn the server and block until it prints `READY`.
    ///
    /// # Errors
    /// - `SpeechError::ServerStartup` if the command is empty, the process exits
    ///   before signalling readiness, or the startup timeout elapses.
    /// - `SpeechError::Io` if the process cannot be spawned.
    pub fn spawn(config: &SynthServerConfig) -> Result<Self> {
        let Some((program, args)) = config.command.split_first() else {
            return Err(SpeechError::ServerStartup("empty server command".into()));
        };

        let mut command = Command::new(program);
        command
            .args(args)
            .args(config.launch_args()?)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        info!(program = %program, port = config.port, "starting synthesis server");
        let mut child = command.spawn()?;

        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<()>(1);
        if let Some(stdout) = child.stdout.take() {
            forward_lines("stdout", stdout, Some(ready_tx));
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines("stderr", stderr, None);
        }

        let timeout = Duration::from_secs(config.startup_timeout_secs.max(1));
        match ready_rx.recv_timeout(timeout) {
            Ok(()) => {
                info!(port = config.port, "synthesis server ready");
                Ok(Self {
                    child,
                    port: config.port,
                })
            }
            Err(RecvTimeoutError::Timeout) => {
                let _ = child.kill();
                let _ = child.wait();
                Err(SpeechError::ServerStartup(format!(
                    "no {READY_LINE} signal within {}s",
                    timeout.as_secs()
                )))
            }
            Err(RecvTimeoutError::Disconnected) => {
                let status = child.wait()?;
                Err(SpeechError::ServerStartup(format!(
                    "server exited before ready ({status})"
                )))
            }
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Base URL for `HttpSynthesizer`.
    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }
}

impl Drop for SynthServer {
    fn drop(&mut self) {
        if let Err(e) = self.child.kill() {
            warn!(error = %e, "failed to kill synthesis server");
        }
        let _ = self.child.wait();
        info!(port = self.port, "synthesis server stopped");
    }
}

/// Forward a child pipe to tracing on a detached thread; signal `ready` on `READY`.
fn forward_lines<R: Read + Send + 'static>(
    stream: &'static str,
    pipe: R,
    ready: Option<crossbeam_channel::Sender<()>>,
) {
    thread::spawn(move || {
        let mut ready = ready;
        for line in BufReader::new(pipe).lines() {
            let Ok(line) = line else {
                break;
            };
            if line.trim() == READY_LINE {
                if let Some(tx) = ready.take() {
                    let _ = tx.try_send(());
                }
                continue;
            }
            debug!(stream, "{line}");
        }
    });
}
