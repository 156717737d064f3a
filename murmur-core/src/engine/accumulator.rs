//! Append-only text buffer shared by the caller (`push`/`flush`) and the producer.
//!
//! The change signal is a `crossbeam_channel::bounded(1)` channel raised with
//! `try_send`: a raise while one is already pending is dropped, so any burst
//! of pushes coalesces into a single wake-up, and a raise that lands while
//! the producer is busy stays pending until its next wait. The producer
//! always re-reads the whole buffer after waking.

use crossbeam_channel::{select, Receiver, Sender};
use parking_lot::Mutex;

use crate::engine::cancel::CancellationToken;
use crate::error::{Result, SpeechError};

/// Consistent copy of the buffer taken under the lock.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextSnapshot {
    pub text: String,
    /// `true` once `flush()` has been called.
    pub closed: bool,
}

/// Why `await_change` returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Changed,
    Cancelled,
}

pub struct TextAccumulator {
    buffer: Mutex<TextSnapshot>,
    change_tx: Sender<()>,
    change_rx: Receiver<()>,
}

impl TextAccumulator {
    pub fn new() -> Self {
        let (change_tx, change_rx) = crossbeam_channel::bounded(1);
        Self {
            buffer: Mutex::new(TextSnapshot::default()),
            change_tx,
            change_rx,
        }
    }

    /// Append a fragment and raise the change signal.
    ///
    /// # Errors
    /// `SpeechError::InputClosed` after `flush()`.
    pub fn push(&self, fragment: &str) -> Result<()> {
        {
            let mut buffer = self.buffer.lock();
            if buffer.closed {
                return Err(SpeechError::InputClosed);
            }
            buffer.text.push_str(fragment);
        }
        self.raise();
        Ok(())
    }

    /// Mark end of input and raise the change signal.
    ///
    /// # Errors
    /// `SpeechError::InputClosed` if already flushed.
    pub fn flush(&self) -> Result<()> {
        {
            let mut buffer = self.buffer.lock();
            if buffer.closed {
                return Err(SpeechError::InputClosed);
            }
            buffer.closed = true;
        }
        self.raise();
        Ok(())
    }

    pub fn snapshot(&self) -> TextSnapshot {
        self.buffer.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.buffer.lock().closed
    }

    /// Block until the next change, returning at once if one is already pending.
    pub fn await_change(&self, cancel: &CancellationToken) -> WaitOutcome {
        if cancel.is_cancelled() {
            return WaitOutcome::Cancelled;
        }
        select! {
            recv(self.change_rx) -> _ => WaitOutcome::Changed,
            recv(cancel.signal()) -> _ => WaitOutcome::Cancelled,
        }
    }

    /// Raw change signal, for callers that wait on more than cancellation.
    pub(crate) fn changes(&self) -> &Receiver<()> {
        &self.change_rx
    }

    fn raise(&self) {
        // Full means a wake-up is already pending.
        let _ = self.change_tx.try_send(());
    }
}

impl Default for TextAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    #[test]
    fn fragments_append_in_call_order() {
        let acc = TextAccumulator::new();
        acc.push("Hello").expect("push");
        acc.push(", ").expect("push");
        acc.push("world.").expect("push");

        let snap = acc.snapshot();
        assert_eq!(snap.text, "Hello, world.");
        assert!(!snap.closed);
    }

    #[test]
    fn flush_closes_exactly_once() {
        let acc = TextAccumulator::new();
        acc.flush().expect("first flush");
        assert!(acc.is_closed());
        assert!(matches!(acc.flush(), Err(SpeechError::InputClosed)));
        assert!(matches!(acc.push("late"), Err(SpeechError::InputClosed)));
    }

    #[test]
    fn pending_change_resolves_without_blocking() {
        let acc = TextAccumulator::new();
        let cancel = CancellationToken::new();
        acc.push("a").expect("push");
        acc.push("b").expect("push");
        acc.push("c").expect("push");

        // Three pushes coalesce into one pending wake-up.
        assert_eq!(acc.await_change(&cancel), WaitOutcome::Changed);
        assert!(acc.changes().try_recv().is_err());
    }

    #[test]
    fn waiter_wakes_on_push_from_another_thread() {
        let acc = Arc::new(TextAccumulator::new());
        let cancel = CancellationToken::new();
        let writer = Arc::clone(&acc);

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            writer.push("late text").expect("push");
        });

        assert_eq!(acc.await_change(&cancel), WaitOutcome::Changed);
        assert_eq!(acc.snapshot().text, "late text");
        handle.join().expect("writer panicked");
    }

    #[test]
    fn cancellation_interrupts_the_wait() {
        let acc = Arc::new(TextAccumulator::new());
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        let start = Instant::now();

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            canceller.cancel();
        });

        assert_eq!(acc.await_change(&cancel), WaitOutcome::Cancelled);
        assert!(start.elapsed() < Duration::from_secs(2));
        handle.join().expect("canceller panicked");
    }
}
