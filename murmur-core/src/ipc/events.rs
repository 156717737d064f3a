//! Event types broadcast by a `SpeechSession`.
//!
//! | Event | Subscription |
//! |-------|--------------|
//! | `SessionStatusEvent` | `SpeechSession::subscribe_status` |
//! | `SegmentEvent` | `SpeechSession::subscribe_segments` |
//!
//! Both serialize with camelCase field names so hosts can forward them as JSON.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Segment events
// ---------------------------------------------------------------------------

/// Emitted after every buffer of a segment has been enqueued for playback.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentEvent {
    /// Monotonically increasing event sequence number.
    pub seq: u64,
    /// Zero-based segment position within the session.
    pub index: usize,
    /// Text that was synthesized.
    pub text: String,
    /// Number of audio chunks the segment produced.
    pub buffers: usize,
}

// ---------------------------------------------------------------------------
// Session status events
// ---------------------------------------------------------------------------

/// Emitted when the synthesis producer changes state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusEvent {
    pub session_id: u64,
    pub status: SessionStatus,
    /// Optional human-readable detail (e.g. error message).
    pub detail: Option<String>,
}

/// Producer state machine.
///
/// ```text
/// Idle → Waiting ⇄ Determining → Synthesizing ⇄ WaitingForQueueSpace
///                                   └─► Done | Failed | Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionStatus {
    /// Session created, stream not started.
    Idle,
    /// Waiting for more text (input not flushed, nothing ready).
    Waiting,
    /// Re-reading the buffer and choosing ready segments.
    Determining,
    /// Inside a synthesis call.
    Synthesizing,
    /// Prefetch queue full; waiting for the consumer.
    WaitingForQueueSpace,
    /// Flushed and every segment delivered to the queue.
    Done,
    /// Synthesis failed; the error is surfaced by the stream.
    Failed,
    /// Cancellation observed (or the stream was dropped).
    Cancelled,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionStatus::Done | SessionStatus::Failed | SessionStatus::Cancelled
        )
    }
}
