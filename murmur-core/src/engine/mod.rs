//! `SpeechSession`: one incremental text-to-speech session.
//!
//! ## Lifecycle
//!
//! ```text
//! SpeechSession::new()
//!     └─► push(fragment)*   → text appended, producer woken
//!     └─► stream(cancel)    → producer thread spawned, AudioStream returned
//!     └─► flush()           → input closed; remaining segments become ready
//!         └─► AudioStream drained → Done | Failed | Cancelled
//! ```
//!
//! `push`/`flush` may be called before or after `stream()`, from any thread.
//! Misuse (a second `stream()`, text after `flush()` or after the session
//! finished) returns an error instead of being ignored.
//!
//! ## Threading
//!
//! ```text
//! caller ──push/flush──► TextAccumulator ──change signal──► producer thread
//!                                                              │ synthesize
//!                                                              ▼
//! caller ◄──Iterator──── AudioStream ◄──bounded queue (prefetch depth)
//! ```
//!
//! The producer runs on a dedicated OS thread because synthesis backends are
//! blocking (HTTP, subprocess, in-process inference).

pub mod accumulator;
pub mod cancel;
pub mod producer;
pub mod stream;

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, OnceLock,
};
use std::thread;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::{
    buffering::{create_prefetch_queue, DEFAULT_PREFETCH},
    error::{Result, SpeechError},
    ipc::events::{SegmentEvent, SessionStatus, SessionStatusEvent},
    synthesis::SynthHandle,
    text::narration::{NarrationMarkers, DEFAULT_END_MARKER, DEFAULT_START_MARKER},
};

use accumulator::TextAccumulator;
use cancel::CancellationToken;
use producer::{DiagnosticsSnapshot, SessionDiagnostics};
use stream::AudioStream;

/// Broadcast channel capacity: 256 events buffered for slow subscribers.
const BROADCAST_CAP: usize = 256;

/// Upper bound for the `MURMUR_PREFETCH` override.
const MAX_ENV_PREFETCH: usize = 16;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Configuration for `SpeechSession`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct SessionConfig {
    /// Prefetch queue capacity in audio chunks. Default: 2.
    pub prefetch_buffer_size: usize,
    /// Segment length limit after the first segment (chars). Default: 135.
    pub max_chars: usize,
    /// Limit for the first segment, kept short for low time-to-first-audio.
    /// Default: 60.
    pub first_chunk_max_chars: usize,
    /// Speak only text inside narration markers. Default: false.
    pub narration_mode: bool,
    pub narration_start: String,
    pub narration_end: String,
    /// Strip markdown syntax before chunking. Default: false.
    pub normalize_markdown: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            prefetch_buffer_size: DEFAULT_PREFETCH,
            max_chars: 135,
            first_chunk_max_chars: 60,
            narration_mode: false,
            narration_start: DEFAULT_START_MARKER.into(),
            narration_end: DEFAULT_END_MARKER.into(),
            normalize_markdown: false,
        }
    }
}

impl SessionConfig {
    /// # Errors
    /// `SpeechError::InvalidConfig` for zero sizes or empty narration markers.
    pub fn validate(&self) -> Result<()> {
        if self.prefetch_buffer_size == 0 {
            return Err(SpeechError::InvalidConfig(
                "prefetchBufferSize must be at least 1".into(),
            ));
        }
        if self.max_chars == 0 || self.first_chunk_max_chars == 0 {
            return Err(SpeechError::InvalidConfig(
                "maxChars and firstChunkMaxChars must be at least 1".into(),
            ));
        }
        if self.narration_mode
            && (self.narration_start.trim().is_empty() || self.narration_end.trim().is_empty())
        {
            return Err(SpeechError::InvalidConfig(
                "narration markers must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// Apply `MURMUR_PREFETCH` (clamped to 1..=16) if set.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(depth) = env_prefetch_override() {
            self.prefetch_buffer_size = depth;
        }
        self
    }

    /// Marker pair when narration mode is on.
    pub fn narration_markers(&self) -> Option<NarrationMarkers> {
        self.narration_mode
            .then(|| NarrationMarkers::new(&self.narration_start, &self.narration_end))
    }
}

fn env_prefetch_override() -> Option<usize> {
    static PREFETCH: OnceLock<Option<usize>> = OnceLock::new();
    *PREFETCH.get_or_init(|| {
        std::env::var("MURMUR_PREFETCH")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .map(|v| v.clamp(1, MAX_ENV_PREFETCH))
    })
}

/// The pipeline handle for one logical speech session.
///
/// `SpeechSession` is `Send + Sync`; share it behind an `Arc` when the text
/// source and the audio consumer live on different threads.
pub struct SpeechSession {
    id: u64,
    config: SessionConfig,
    synth: SynthHandle,
    accumulator: Arc<TextAccumulator>,
    /// Set by the first `stream()` call.
    stream_taken: AtomicBool,
    /// Canonical producer status (written by the producer thread).
    status: Arc<Mutex<SessionStatus>>,
    status_tx: broadcast::Sender<SessionStatusEvent>,
    segment_tx: broadcast::Sender<SegmentEvent>,
    diagnostics: Arc<SessionDiagnostics>,
}

impl SpeechSession {
    /// Create a session. Nothing runs until `stream()` is called.
    ///
    /// # Errors
    /// `SpeechError::InvalidConfig` if `config` fails validation.
    pub fn new(config: SessionConfig, synth: SynthHandle) -> Result<Self> {
        config.validate()?;
        let (status_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (segment_tx, _) = broadcast::channel(BROADCAST_CAP);
        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        debug!(session_id = id, ?config, "session created");

        Ok(Self {
            id,
            config,
            synth,
            accumulator: Arc::new(TextAccumulator::new()),
            stream_taken: AtomicBool::new(false),
            status: Arc::new(Mutex::new(SessionStatus::Idle)),
            status_tx,
            segment_tx,
            diagnostics: Arc::new(SessionDiagnostics::default()),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Append a text fragment.
    ///
    /// # Errors
    /// - `SpeechError::SessionFinished` once the stream reached a terminal state.
    /// - `SpeechError::InputClosed` after `flush()`.
    pub fn push(&self, fragment: &str) -> Result<()> {
        self.ensure_not_finished()?;
        self.accumulator.push(fragment)
    }

    /// Mark end of input.
    ///
    /// # Errors
    /// Same conditions as [`push`](Self::push).
    pub fn flush(&self) -> Result<()> {
        self.ensure_not_finished()?;
        self.accumulator.flush()?;
        debug!(session_id = self.id, "input flushed");
        Ok(())
    }

    /// Start the producer and return the audio stream. Single-shot.
    ///
    /// # Errors
    /// - `SpeechError::StreamAlreadyTaken` on a second call.
    /// - `SpeechError::Io` if the producer thread cannot be spawned.
    pub fn stream(&self, cancel: CancellationToken) -> Result<AudioStream> {
        if self.stream_taken.swap(true, Ordering::SeqCst) {
            return Err(SpeechError::StreamAlreadyTaken);
        }

        let (queue_tx, queue_rx) = create_prefetch_queue(self.config.prefetch_buffer_size);
        // Dropping the AudioStream drops `alive_tx`, which wakes an idle producer.
        let (alive_tx, alive_rx) = crossbeam_channel::bounded::<()>(0);
        let failure = Arc::new(Mutex::new(None));

        let ctx = producer::ProducerContext {
            session_id: self.id,
            config: self.config.clone(),
            synth: self.synth.clone(),
            accumulator: Arc::clone(&self.accumulator),
            queue: queue_tx,
            cancel: cancel.clone(),
            consumer_alive: alive_rx,
            failure: Arc::clone(&failure),
            status: Arc::clone(&self.status),
            status_tx: self.status_tx.clone(),
            segment_tx: self.segment_tx.clone(),
            diagnostics: Arc::clone(&self.diagnostics),
        };

        thread::Builder::new()
            .name(format!("murmur-producer-{}", self.id))
            .spawn(move || producer::run(ctx))?;

        info!(
            session_id = self.id,
            prefetch = self.config.prefetch_buffer_size,
            narration = self.config.narration_mode,
            "session stream started"
        );
        Ok(AudioStream::new(queue_rx, cancel, failure, alive_tx))
    }

    /// Current producer status (snapshot).
    pub fn status(&self) -> SessionStatus {
        *self.status.lock()
    }

    /// Subscribe to producer state changes.
    pub fn subscribe_status(&self) -> broadcast::Receiver<SessionStatusEvent> {
        self.status_tx.subscribe()
    }

    /// Subscribe to per-segment completion events.
    pub fn subscribe_segments(&self) -> broadcast::Receiver<SegmentEvent> {
        self.segment_tx.subscribe()
    }

    /// Snapshot of producer counters for observability.
    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    fn ensure_not_finished(&self) -> Result<()> {
        if self.status().is_terminal() {
            return Err(SpeechError::SessionFinished);
        }
        Ok(())
    }
}

impl std::fmt::Debug for SpeechSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeechSession")
            .field("id", &self.id)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}
