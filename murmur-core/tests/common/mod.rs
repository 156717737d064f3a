#![allow(dead_code)]

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use murmur_core::{AudioChunk, CancellationToken, SpeechError, SpeechSynthesizer};
use parking_lot::Mutex;

/// Records every segment text and emits `buffers` chunks per segment.
///
/// Chunk samples are `[segment_number, buffer_number]` so tests can check order.
pub struct ScriptedSynth {
    pub calls: Arc<Mutex<Vec<String>>>,
    pub buffers: usize,
    pub delay: Duration,
    pub fail_on: Option<&'static str>,
    pub panic_on: Option<&'static str>,
    /// Sleep through `delay` without looking at the cancellation token.
    pub uninterruptible: bool,
}

impl ScriptedSynth {
    pub fn new(calls: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            calls,
            buffers: 1,
            delay: Duration::ZERO,
            fail_on: None,
            panic_on: None,
            uninterruptible: false,
        }
    }

    pub fn buffers(mut self, buffers: usize) -> Self {
        self.buffers = buffers;
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn fail_on(mut self, needle: &'static str) -> Self {
        self.fail_on = Some(needle);
        self
    }

    pub fn panic_on(mut self, needle: &'static str) -> Self {
        self.panic_on = Some(needle);
        self
    }

    pub fn uninterruptible(mut self) -> Self {
        self.uninterruptible = true;
        self
    }
}

impl SpeechSynthesizer for ScriptedSynth {
    fn synthesize(
        &mut self,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<AudioChunk>, SpeechError> {
        if cancel.is_cancelled() {
            return Ok(vec![]);
        }
        let segment = {
            let mut calls = self.calls.lock();
            calls.push(text.to_string());
            calls.len() - 1
        };
        if self.uninterruptible {
            thread::sleep(self.delay);
        } else if !self.delay.is_zero() && cancel.wait_timeout(self.delay) {
            return Ok(vec![]);
        }
        if let Some(needle) = self.panic_on {
            if text.contains(needle) {
                panic!("backend crashed on: {text}");
            }
        }
        if let Some(needle) = self.fail_on {
            if text.contains(needle) {
                return Err(SpeechError::Synthesis(format!("boom on: {text}")));
            }
        }
        Ok((0..self.buffers)
            .map(|b| AudioChunk::new(vec![segment as f32, b as f32], 24_000))
            .collect())
    }
}

pub fn calls() -> Arc<Mutex<Vec<String>>> {
    Arc::new(Mutex::new(Vec::new()))
}

/// Poll `cond` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
