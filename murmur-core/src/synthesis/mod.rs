//! Speech synthesis abstraction.
//!
//! The `SpeechSynthesizer` trait decouples the pipeline from any specific
//! backend (stub silence, local HTTP server, remote endpoint, in-process
//! model). The pipeline treats every `synthesize` call as one suspension point.
//!
//! `&mut self` on `synthesize` expresses that engines are stateful (warm
//! caches, connection pools, request counters). All mutation is serialised
//! through `SynthHandle`'s `parking_lot::Mutex`.

pub mod stub;

#[cfg(feature = "http")]
pub mod http;
#[cfg(feature = "http")]
pub mod server;

#[cfg(feature = "http")]
pub use http::HttpSynthesizer;
#[cfg(feature = "http")]
pub use server::{SynthServer, SynthServerConfig};

use std::sync::Arc;

use parking_lot::Mutex;

use crate::buffering::chunk::AudioChunk;
use crate::engine::cancel::CancellationToken;
use crate::error::Result;

/// Contract for text-to-speech backends.
pub trait SpeechSynthesizer: Send + 'static {
    /// One-time warm-up (load weights, open connections, run a short dummy
    /// synthesis). Called once before the first session, never by the pipeline.
    ///
    /// # Errors
    /// Returns an error if the backend is unreachable or its model is missing.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }

    /// Synthesize one segment of plain text.
    ///
    /// # Parameters
    /// - `text`: trimmed, non-empty segment text.
    /// - `cancel`: implementations should stop early once it is set. If it is
    ///   already set on entry, returning an empty vector is expected.
    ///
    /// # Returns
    /// One or more chunks, in playback order. A failed segment must return
    /// `Err` rather than a partial set of chunks.
    fn synthesize(&mut self, text: &str, cancel: &CancellationToken) -> Result<Vec<AudioChunk>>;
}

/// Thread-safe reference-counted handle to any `SpeechSynthesizer` implementor.
#[derive(Clone)]
pub struct SynthHandle(pub Arc<Mutex<dyn SpeechSynthesizer>>);

impl SynthHandle {
    /// Wrap any `SpeechSynthesizer` in a `SynthHandle`.
    pub fn new<S: SpeechSynthesizer>(synth: S) -> Self {
        Self(Arc::new(Mutex::new(synth)))
    }

    /// Run the backend's warm-up under the handle's lock.
    pub fn warm_up(&self) -> Result<()> {
        self.0.lock().warm_up()
    }
}

impl std::fmt::Debug for SynthHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SynthHandle").finish_non_exhaustive()
    }
}
