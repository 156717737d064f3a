//! `AudioStream`: the consumer side of a session.
//!
//! A finite, non-restartable iterator over synthesized chunks in text order.
//! Each `next()` pops one chunk (freeing a queue slot for the producer),
//! or, once the producer has finished and the queue is drained, ends the
//! stream: cleanly after `Done`/cancellation, with the stored error after a
//! synthesis failure. Cancellation ends iteration immediately, even with
//! chunks still queued.

use std::sync::Arc;

use crossbeam_channel::{select, Sender};
use parking_lot::Mutex;
use tracing::debug;

use crate::{
    buffering::{chunk::AudioChunk, AudioReceiver},
    engine::cancel::CancellationToken,
    error::{Result, SpeechError},
};

pub struct AudioStream {
    queue: AudioReceiver,
    cancel: CancellationToken,
    failure: Arc<Mutex<Option<SpeechError>>>,
    /// Held only so that dropping the stream disconnects the producer's wait.
    _alive: Sender<()>,
    delivered: usize,
    finished: bool,
}

impl AudioStream {
    pub(crate) fn new(
        queue: AudioReceiver,
        cancel: CancellationToken,
        failure: Arc<Mutex<Option<SpeechError>>>,
        alive: Sender<()>,
    ) -> Self {
        Self {
            queue,
            cancel,
            failure,
            _alive: alive,
            delivered: 0,
            finished: false,
        }
    }

    /// Chunks currently staged in the prefetch queue.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Chunks handed to the caller so far.
    pub fn delivered(&self) -> usize {
        self.delivered
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn finish(&mut self, reason: &'static str) {
        self.finished = true;
        debug!(delivered = self.delivered, reason, "audio stream ended");
    }
}

impl Iterator for AudioStream {
    type Item = Result<AudioChunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        if self.cancel.is_cancelled() {
            self.finish("cancelled");
            return None;
        }

        let received = select! {
            recv(self.queue) -> msg => Some(msg),
            recv(self.cancel.signal()) -> _ => None,
        };

        match received {
            Some(Ok(chunk)) if !self.cancel.is_cancelled() => {
                self.delivered += 1;
                Some(Ok(chunk))
            }
            // Producer finished and everything it sent has been received.
            Some(Err(_)) => {
                let failure = self.failure.lock().take();
                match failure {
                    Some(e) => {
                        self.finish("synthesis failed");
                        Some(Err(e))
                    }
                    None => {
                        self.finish("producer done");
                        None
                    }
                }
            }
            Some(Ok(_)) | None => {
                self.finish("cancelled");
                None
            }
        }
    }
}

impl std::fmt::Debug for AudioStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioStream")
            .field("queued", &self.queued())
            .field("delivered", &self.delivered)
            .field("finished", &self.finished)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffering::create_prefetch_queue;

    fn stream_with(
        chunks: &[f32],
        failure: Option<SpeechError>,
    ) -> (AudioStream, CancellationToken) {
        let (tx, rx) = create_prefetch_queue(chunks.len().max(1));
        for &s in chunks {
            tx.send(AudioChunk::new(vec![s], 16_000)).expect("send");
        }
        drop(tx);
        let (alive, _keep) = crossbeam_channel::bounded(0);
        let cancel = CancellationToken::new();
        let stream = AudioStream::new(rx, cancel.clone(), Arc::new(Mutex::new(failure)), alive);
        (stream, cancel)
    }

    #[test]
    fn drains_in_order_then_ends() {
        let (stream, _cancel) = stream_with(&[0.1, 0.2, 0.3], None);
        let samples: Vec<f32> = stream.map(|c| c.expect("chunk").samples[0]).collect();
        assert_eq!(samples, vec![0.1, 0.2, 0.3]);
    }

    #[test]
    fn failure_surfaces_after_queued_chunks() {
        let (mut stream, _cancel) =
            stream_with(&[0.1], Some(SpeechError::Synthesis("engine exploded".into())));
        assert!(stream.next().expect("chunk").is_ok());
        let err = stream.next().expect("error item").expect_err("must be error");
        assert_eq!(err.to_string(), "synthesis error: engine exploded");
        assert!(stream.next().is_none());
        assert!(stream.is_finished());
    }

    #[test]
    fn cancellation_ends_with_chunks_still_queued() {
        let (mut stream, cancel) = stream_with(&[0.1, 0.2], None);
        assert!(stream.next().is_some());
        cancel.cancel();
        assert!(stream.next().is_none());
        assert_eq!(stream.delivered(), 1);
        assert_eq!(stream.queued(), 1);
    }
}
