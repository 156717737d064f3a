//! Bounded prefetch queue between the synthesis producer and the stream consumer.
//!
//! A `crossbeam_channel::bounded` channel: `send` blocks while the queue holds
//! `capacity` chunks, which is the producer's backpressure, and every `recv`
//! frees one slot and wakes a blocked sender. Senders and receivers both sit
//! inside `select!` together with the cancellation signal.

pub mod chunk;

use crossbeam_channel::{Receiver, Sender};

use chunk::AudioChunk;

/// Producer half: held by the synthesis thread.
pub type AudioSender = Sender<AudioChunk>;

/// Consumer half: held by the caller's `AudioStream`.
pub type AudioReceiver = Receiver<AudioChunk>;

/// Default prefetch depth: two synthesized chunks staged ahead of playback.
pub const DEFAULT_PREFETCH: usize = 2;

/// Create a matched sender/receiver pair holding at most `capacity` chunks.
///
/// A capacity of zero is raised to one; a rendezvous channel would stage nothing.
pub fn create_prefetch_queue(capacity: usize) -> (AudioSender, AudioReceiver) {
    crossbeam_channel::bounded(capacity.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::TrySendError;

    #[test]
    fn queue_refuses_beyond_capacity() {
        let (tx, rx) = create_prefetch_queue(2);
        tx.try_send(AudioChunk::new(vec![0.1], 16_000)).expect("slot 1");
        tx.try_send(AudioChunk::new(vec![0.2], 16_000)).expect("slot 2");
        assert!(matches!(
            tx.try_send(AudioChunk::new(vec![0.3], 16_000)),
            Err(TrySendError::Full(_))
        ));

        assert_eq!(rx.len(), 2);
        assert_eq!(rx.recv().expect("first").samples, vec![0.1]);
        tx.try_send(AudioChunk::new(vec![0.3], 16_000))
            .expect("space freed by recv");
        assert_eq!(rx.recv().expect("second").samples, vec![0.2]);
        assert_eq!(rx.recv().expect("third").samples, vec![0.3]);
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        let (tx, _rx) = create_prefetch_queue(0);
        assert_eq!(tx.capacity(), Some(1));
    }
}
