//! Synthesis producer loop.
//!
//! ## Producer stages (per iteration)
//!
//! ```text
//! 1. Snapshot the accumulated text (+ closed flag)
//! 2. Source text: narration extract (if enabled)
//! 3. Chunk the text after the committed cursor into segments, through the
//!    markdown normalizer (if enabled)
//! 4. Ready = all segments if flushed; none while a narration marker is open;
//!    otherwise all but the last (it may still grow)
//! 5. Synthesize each ready segment, enqueue its chunks (blocking on a full
//!    queue), advance the cursor
//! 6. Flushed → Done; otherwise wait for the next text change
//! ```
//!
//! The cursor is a byte offset into the narration-filtered source text plus
//! the count of emitted segments; only the text after it is re-chunked each
//! iteration. Markdown normalization can rewrite already-spoken text (a link
//! resolving drops its `[`), so normalized segment spans are mapped back to
//! source offsets before they are committed.
//!
//! Every blocking wait selects on the cancellation signal. The loop runs on
//! a dedicated thread owned by `SpeechSession::stream`.

use std::any::Any;
use std::borrow::Cow;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use crossbeam_channel::{select, Receiver};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, error, info, info_span, warn};

use crate::{
    buffering::{chunk::AudioChunk, AudioSender},
    engine::{
        accumulator::{TextAccumulator, TextSnapshot},
        cancel::CancellationToken,
        SessionConfig,
    },
    error::{Result, SpeechError},
    ipc::events::{SegmentEvent, SessionStatus, SessionStatusEvent},
    synthesis::SynthHandle,
    text::{chunker::chunk, markdown, narration::NarrationMarkers, Segment},
};

#[derive(Default)]
pub struct SessionDiagnostics {
    pub text_changes: AtomicUsize,
    pub segments_ready: AtomicUsize,
    pub synthesis_calls: AtomicUsize,
    pub synthesis_errors: AtomicUsize,
    pub buffers_enqueued: AtomicUsize,
    pub buffers_discarded: AtomicUsize,
    pub queue_high_water: AtomicUsize,
}

impl SessionDiagnostics {
    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            text_changes: self.text_changes.load(Ordering::Relaxed),
            segments_ready: self.segments_ready.load(Ordering::Relaxed),
            synthesis_calls: self.synthesis_calls.load(Ordering::Relaxed),
            synthesis_errors: self.synthesis_errors.load(Ordering::Relaxed),
            buffers_enqueued: self.buffers_enqueued.load(Ordering::Relaxed),
            buffers_discarded: self.buffers_discarded.load(Ordering::Relaxed),
            queue_high_water: self.queue_high_water.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiagnosticsSnapshot {
    pub text_changes: usize,
    pub segments_ready: usize,
    pub synthesis_calls: usize,
    pub synthesis_errors: usize,
    pub buffers_enqueued: usize,
    pub buffers_discarded: usize,
    pub queue_high_water: usize,
}

/// All context the producer needs, passed as one struct so the closure stays tidy.
pub struct ProducerContext {
    pub session_id: u64,
    pub config: SessionConfig,
    pub synth: SynthHandle,
    pub accumulator: Arc<TextAccumulator>,
    pub queue: AudioSender,
    pub cancel: CancellationToken,
    /// Disconnects when the `AudioStream` is dropped.
    pub consumer_alive: Receiver<()>,
    /// Synthesis error handed to the consumer after the queue drains.
    pub failure: Arc<Mutex<Option<SpeechError>>>,
    pub status: Arc<Mutex<SessionStatus>>,
    pub status_tx: broadcast::Sender<SessionStatusEvent>,
    pub segment_tx: broadcast::Sender<SegmentEvent>,
    pub diagnostics: Arc<SessionDiagnostics>,
}

/// Position of already-synthesized text within the narration-filtered text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cursor {
    /// Byte offset just past the last emitted segment.
    pub offset: usize,
    /// Segments emitted so far.
    pub emitted: usize,
}

impl Cursor {
    fn commit(&mut self, segment: &Segment) {
        self.offset = segment.span.end;
        self.emitted += 1;
    }
}

/// Outcome of one determination pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyPlan {
    /// Segments to synthesize now; spans are offsets into the narration-filtered
    /// text, text is what gets spoken.
    pub segments: Vec<Segment>,
    /// Chunked but not yet ready.
    pub held_back: usize,
    /// Input is flushed while a narration marker is still open.
    pub unterminated_marker: bool,
}

enum SegmentOutcome {
    Enqueued,
    Cancelled,
    ConsumerGone,
    Failed(SpeechError),
}

enum Wake {
    Changed,
    Cancelled,
    ConsumerGone,
}

enum Terminal {
    Done,
    Cancelled,
    ConsumerGone,
    Failed(SpeechError),
}

/// Text the cursor indexes into: the narration blocks, or everything.
pub fn source_text<'a>(text: &'a str, markers: Option<&NarrationMarkers>) -> Cow<'a, str> {
    match markers {
        Some(m) => Cow::Owned(m.extract(text)),
        None => Cow::Borrowed(text),
    }
}

/// Decide which segments after `cursor` can be synthesized now.
///
/// # Errors
/// `SpeechError::CursorMismatch` if the source text no longer reaches the
/// committed cursor.
pub fn ready_segments(
    snapshot: &TextSnapshot,
    cursor: Cursor,
    config: &SessionConfig,
    markers: Option<&NarrationMarkers>,
) -> Result<ReadyPlan> {
    let open_marker = markers.is_some_and(|m| m.has_open_marker(&snapshot.text));
    let source = source_text(&snapshot.text, markers);

    let Some(rest) = source.get(cursor.offset..) else {
        return Err(SpeechError::CursorMismatch {
            offset: cursor.offset,
            len: source.len(),
        });
    };

    let first_limit = if cursor.emitted == 0 {
        config.first_chunk_max_chars
    } else {
        config.max_chars
    };
    let mut segments = if config.normalize_markdown {
        let normalized = markdown::normalize_mapped(&source);
        let start = normalized.output_offset(cursor.offset);
        let mut segments = chunk(&normalized.text[start..], config.max_chars, first_limit);
        for segment in &mut segments {
            segment.span = normalized.source_offset(start + segment.span.start)
                ..normalized.source_offset(start + segment.span.end);
        }
        segments
    } else {
        let mut segments = chunk(rest, config.max_chars, first_limit);
        for segment in &mut segments {
            segment.span = segment.span.start + cursor.offset..segment.span.end + cursor.offset;
        }
        segments
    };

    let ready = if snapshot.closed {
        segments.len()
    } else if open_marker {
        0
    } else {
        segments.len().saturating_sub(1)
    };
    let held_back = segments.len() - ready;
    segments.truncate(ready);

    Ok(ReadyPlan {
        segments,
        held_back,
        unterminated_marker: snapshot.closed && open_marker,
    })
}

/// Run the producer until done, failed, cancelled, or the stream is dropped.
pub fn run(ctx: ProducerContext) {
    let span = info_span!("session", session_id = ctx.session_id);
    let _enter = span.enter();
    info!("producer started");

    let markers = ctx.config.narration_markers();
    let mut cursor = Cursor::default();
    let mut event_seq = 0u64;
    let mut warned_unterminated = false;

    let terminal = 'session: loop {
        if ctx.cancel.is_cancelled() {
            break Terminal::Cancelled;
        }

        // ── 1–4. Determine ready segments ─────────────────────────────────
        set_status(&ctx, SessionStatus::Determining, None);
        let snapshot = ctx.accumulator.snapshot();
        let plan = match ready_segments(&snapshot, cursor, &ctx.config, markers.as_ref()) {
            Ok(plan) => plan,
            Err(e) => {
                error!(error = %e, "lost track of spoken text");
                break Terminal::Failed(e);
            }
        };
        if plan.unterminated_marker && !warned_unterminated {
            warn!("input flushed with an unterminated narration marker; its text is not spoken");
            warned_unterminated = true;
        }
        ctx.diagnostics
            .segments_ready
            .fetch_add(plan.segments.len(), Ordering::Relaxed);
        debug!(
            ready = plan.segments.len(),
            held_back = plan.held_back,
            closed = snapshot.closed,
            cursor = cursor.offset,
            "determined ready segments"
        );

        // ── 5. Synthesize + enqueue ──────────────────────────────────────
        for segment in &plan.segments {
            if ctx.cancel.is_cancelled() {
                break 'session Terminal::Cancelled;
            }
            match emit_segment(&ctx, segment, cursor.emitted, &mut event_seq) {
                SegmentOutcome::Enqueued => cursor.commit(segment),
                SegmentOutcome::Cancelled => break 'session Terminal::Cancelled,
                SegmentOutcome::ConsumerGone => break 'session Terminal::ConsumerGone,
                SegmentOutcome::Failed(e) => break 'session Terminal::Failed(e),
            }
        }

        // ── 6. Done, or wait for more text ───────────────────────────────
        if snapshot.closed {
            break Terminal::Done;
        }
        set_status(&ctx, SessionStatus::Waiting, None);
        match wait_for_text(&ctx) {
            Wake::Changed => {
                ctx.diagnostics.text_changes.fetch_add(1, Ordering::Relaxed);
            }
            Wake::Cancelled => break Terminal::Cancelled,
            Wake::ConsumerGone => break Terminal::ConsumerGone,
        }
    };

    match terminal {
        Terminal::Done => {
            set_status(&ctx, SessionStatus::Done, None);
            info!(segments = cursor.emitted, "producer done");
        }
        Terminal::Cancelled => {
            set_status(&ctx, SessionStatus::Cancelled, None);
            info!(segments = cursor.emitted, "producer cancelled");
        }
        Terminal::ConsumerGone => {
            set_status(
                &ctx,
                SessionStatus::Cancelled,
                Some("audio stream dropped".into()),
            );
            info!(segments = cursor.emitted, "audio stream dropped; producer stopping");
        }
        Terminal::Failed(e) => {
            let detail = e.to_string();
            *ctx.failure.lock() = Some(e);
            set_status(&ctx, SessionStatus::Failed, Some(detail));
        }
    }

    let snap = ctx.diagnostics.snapshot();
    info!(
        text_changes = snap.text_changes,
        segments_ready = snap.segments_ready,
        synthesis_calls = snap.synthesis_calls,
        synthesis_errors = snap.synthesis_errors,
        buffers_enqueued = snap.buffers_enqueued,
        buffers_discarded = snap.buffers_discarded,
        queue_high_water = snap.queue_high_water,
        "producer stopped; diagnostics"
    );
    // `ctx.queue` drops here; the consumer sees the end of the stream.
}

/// Synthesize one segment and enqueue all of its chunks in order.
fn emit_segment(
    ctx: &ProducerContext,
    segment: &Segment,
    index: usize,
    event_seq: &mut u64,
) -> SegmentOutcome {
    set_status(ctx, SessionStatus::Synthesizing, None);
    ctx.diagnostics
        .synthesis_calls
        .fetch_add(1, Ordering::Relaxed);
    debug!(segment = index, chars = segment.char_len(), "synthesizing segment");

    // A panicking backend fails the session like any other synthesis error.
    let result = {
        let mut synth = ctx.synth.0.lock();
        panic::catch_unwind(AssertUnwindSafe(|| synth.synthesize(&segment.text, &ctx.cancel)))
            .unwrap_or_else(|payload| {
                Err(SpeechError::Synthesis(format!(
                    "synthesizer panicked: {}",
                    panic_message(payload.as_ref())
                )))
            })
    };

    let chunks: Vec<AudioChunk> = match result {
        Ok(chunks) => chunks,
        Err(e) if ctx.cancel.is_cancelled() => {
            debug!(segment = index, error = %e, "synthesis aborted by cancellation");
            return SegmentOutcome::Cancelled;
        }
        Err(e) => {
            ctx.diagnostics
                .synthesis_errors
                .fetch_add(1, Ordering::Relaxed);
            error!(segment = index, error = %e, "synthesis failed");
            return SegmentOutcome::Failed(e);
        }
    };

    let total = chunks.len();
    // An uninterruptible backend finished after cancellation: drop its audio.
    if ctx.cancel.is_cancelled() {
        discard(ctx, total);
        return SegmentOutcome::Cancelled;
    }

    for (i, chunk) in chunks.into_iter().enumerate() {
        if ctx.cancel.is_cancelled() {
            discard(ctx, total - i);
            return SegmentOutcome::Cancelled;
        }
        if ctx.queue.is_full() {
            set_status(ctx, SessionStatus::WaitingForQueueSpace, None);
        }
        select! {
            send(ctx.queue, chunk) -> sent => {
                if sent.is_err() {
                    return SegmentOutcome::ConsumerGone;
                }
            }
            recv(ctx.cancel.signal()) -> _ => {
                discard(ctx, total - i);
                return SegmentOutcome::Cancelled;
            }
        }
        ctx.diagnostics
            .buffers_enqueued
            .fetch_add(1, Ordering::Relaxed);
        ctx.diagnostics
            .queue_high_water
            .fetch_max(ctx.queue.len(), Ordering::Relaxed);
    }

    debug!(segment = index, buffers = total, "segment enqueued");
    let _ = ctx.segment_tx.send(SegmentEvent {
        seq: *event_seq,
        index,
        text: segment.text.clone(),
        buffers: total,
    });
    *event_seq = event_seq.saturating_add(1);
    SegmentOutcome::Enqueued
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg
    } else {
        "non-string panic payload"
    }
}

fn discard(ctx: &ProducerContext, count: usize) {
    if count > 0 {
        ctx.diagnostics
            .buffers_discarded
            .fetch_add(count, Ordering::Relaxed);
        debug!(count, "discarding synthesized audio after cancellation");
    }
}

fn wait_for_text(ctx: &ProducerContext) -> Wake {
    if ctx.cancel.is_cancelled() {
        return Wake::Cancelled;
    }
    select! {
        recv(ctx.accumulator.changes()) -> _ => Wake::Changed,
        recv(ctx.cancel.signal()) -> _ => Wake::Cancelled,
        recv(ctx.consumer_alive) -> _ => Wake::ConsumerGone,
    }
}

fn set_status(ctx: &ProducerContext, new_status: SessionStatus, detail: Option<String>) {
    {
        let mut status = ctx.status.lock();
        if *status == new_status && detail.is_none() {
            return;
        }
        *status = new_status;
    }
    let _ = ctx.status_tx.send(SessionStatusEvent {
        session_id: ctx.session_id,
        status: new_status,
        detail,
    });
}
