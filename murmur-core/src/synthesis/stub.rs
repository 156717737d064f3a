//! `StubSynthesizer`: placeholder backend that produces silence without a model.
//!
//! Produces one chunk per segment whose length is proportional to the text,
//! so the whole push → chunk → synthesize → stream path can be exercised
//! end-to-end (tests, CLI `--stub`).

use std::time::Duration;

use tracing::debug;

use crate::buffering::chunk::AudioChunk;
use crate::engine::cancel::CancellationToken;
use crate::error::Result;
use crate::synthesis::SpeechSynthesizer;

pub const STUB_SAMPLE_RATE: u32 = 24_000;

/// Roughly 60 ms of audio per character at 24 kHz.
const SAMPLES_PER_CHAR: usize = 1_440;

/// Silence-emitting stub.
pub struct StubSynthesizer {
    delay: Duration,
    segment_count: u32,
}

impl StubSynthesizer {
    pub fn new() -> Self {
        Self {
            delay: Duration::ZERO,
            segment_count: 0,
        }
    }

    /// Simulate synthesis latency. The wait ends early on cancellation.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            segment_count: 0,
        }
    }

    pub fn segment_count(&self) -> u32 {
        self.segment_count
    }
}

impl Default for StubSynthesizer {
    fn default() -> Self {
        Self::new()
    }
}

impl SpeechSynthesizer for StubSynthesizer {
    fn warm_up(&mut self) -> Result<()> {
        debug!("StubSynthesizer::warm_up; no-op");
        Ok(())
    }

    fn synthesize(&mut self, text: &str, cancel: &CancellationToken) -> Result<Vec<AudioChunk>> {
        if cancel.is_cancelled() {
            return Ok(vec![]);
        }
        if !self.delay.is_zero() && cancel.wait_timeout(self.delay) {
            return Ok(vec![]);
        }

        self.segment_count += 1;
        let len = text.chars().count() * SAMPLES_PER_CHAR;
        debug!(segment = self.segment_count, samples = len, "stub synthesis");
        Ok(vec![AudioChunk::new(vec![0.0; len], STUB_SAMPLE_RATE)])
    }
}
