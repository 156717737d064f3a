//! # murmur-core
//!
//! Incremental text-to-speech streaming SDK.
//!
//! ## Architecture
//!
//! ```text
//! push(fragment) → TextAccumulator ──change signal──► producer thread
//!                                                        │
//!                                   narration extract / markdown normalize
//!                                                        │
//!                                                 chunker::chunk
//!                                                        │
//!                                        SpeechSynthesizer::synthesize
//!                                                        │
//!                                     bounded prefetch queue (backpressure)
//!                                                        │
//!                           AudioStream (Iterator<Item = Result<AudioChunk>>)
//! ```
//!
//! Every blocking wait also selects on the session's `CancellationToken`.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod buffering;
pub mod engine;
pub mod error;
pub mod ipc;
pub mod synthesis;
pub mod text;

// Convenience re-exports for downstream crates
pub use buffering::chunk::AudioChunk;
pub use engine::{
    cancel::CancellationToken, stream::AudioStream, SessionConfig, SpeechSession,
};
pub use error::SpeechError;
pub use ipc::events::{SegmentEvent, SessionStatus, SessionStatusEvent};
pub use synthesis::{stub::StubSynthesizer, SpeechSynthesizer, SynthHandle};
pub use text::{chunk, NarrationMarkers, Segment};

#[cfg(feature = "http")]
pub use synthesis::{HttpSynthesizer, SynthServer, SynthServerConfig};
