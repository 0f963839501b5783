//! Push→pull bridge between a connection's receive callback and the caller's
//! pull-based consumption.
//!
//! A vendor socket delivers frames whenever it pleases; the caller drains them
//! lazily as a stream. `ChunkRelay` carries frames across that boundary with a
//! FIFO queue plus a single waiter slot, so a frame arrival either lands in
//! the queue or resolves the pending wait. No flag polling, no lost wakeups.

use crate::error::{TtsError, TtsResult};
use futures::Stream;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{Mutex, oneshot};

enum Wake<T> {
    Item(T),
    Done,
    Failed(TtsError),
}

enum Terminal {
    Completed,
    /// `None` once the stored error has been surfaced to the consumer.
    Failed(Option<TtsError>),
}

struct Inner<T> {
    queue: VecDeque<T>,
    terminal: Option<Terminal>,
    waiter: Option<oneshot::Sender<Wake<T>>>,
}

/// Single-producer-side, single-consumer ordered relay.
///
/// Producer side: [`publish`](ChunkRelay::publish),
/// [`complete`](ChunkRelay::complete), [`fail`](ChunkRelay::fail).
/// Consumer side: [`next`](ChunkRelay::next) or
/// [`into_stream`](ChunkRelay::into_stream). Only one `next` may be
/// outstanding at a time.
pub struct ChunkRelay<T> {
    inner: Arc<Mutex<Inner<T>>>,
}

impl<T> Clone for ChunkRelay<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> Default for ChunkRelay<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> ChunkRelay<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                queue: VecDeque::new(),
                terminal: None,
                waiter: None,
            })),
        }
    }

    /// Deliver one frame to the consumer, waking a pending [`next`] directly
    /// or appending to the queue. Never parks the caller.
    ///
    /// [`next`]: ChunkRelay::next
    pub async fn publish(&self, item: T) {
        let mut inner = self.inner.lock().await;
        if let Some(tx) = inner.waiter.take() {
            if let Err(Wake::Item(item)) = tx.send(Wake::Item(item)) {
                // The waiting next() future was dropped; keep the frame.
                inner.queue.push_back(item);
            }
        } else {
            inner.queue.push_back(item);
        }
    }

    /// Mark the relay completed. Idempotent after any terminal state.
    pub async fn complete(&self) {
        let mut inner = self.inner.lock().await;
        if inner.terminal.is_some() {
            return;
        }
        inner.terminal = Some(Terminal::Completed);
        if let Some(tx) = inner.waiter.take() {
            let _ = tx.send(Wake::Done);
        }
    }

    /// Mark the relay failed. Idempotent after any terminal state; the first
    /// call wins and its error is what the consumer observes.
    pub async fn fail(&self, err: TtsError) {
        let mut inner = self.inner.lock().await;
        if inner.terminal.is_some() {
            return;
        }
        match inner.waiter.take() {
            Some(tx) => match tx.send(Wake::Failed(err)) {
                // Delivered straight to the waiting consumer.
                Ok(()) => inner.terminal = Some(Terminal::Failed(None)),
                Err(Wake::Failed(err)) => inner.terminal = Some(Terminal::Failed(Some(err))),
                Err(_) => unreachable!("send returns the value it was given"),
            },
            None => inner.terminal = Some(Terminal::Failed(Some(err))),
        }
    }

    /// Pull the next frame.
    ///
    /// Returns queued frames in arrival order; once the queue is drained,
    /// `Ok(None)` for a completed relay, the stored error (exactly once) for
    /// a failed one, and otherwise suspends until the producer side acts.
    pub async fn next(&self) -> TtsResult<Option<T>> {
        let rx = {
            let mut inner = self.inner.lock().await;
            if let Some(item) = inner.queue.pop_front() {
                return Ok(Some(item));
            }
            match &mut inner.terminal {
                Some(Terminal::Completed) => return Ok(None),
                Some(Terminal::Failed(err)) => {
                    return match err.take() {
                        Some(err) => Err(err),
                        // Failure already surfaced; the sequence is over.
                        None => Ok(None),
                    };
                }
                None => {}
            }
            // A dropped next() future leaves a dead sender behind; clear it
            // rather than mistaking it for a live concurrent consumer.
            if inner.waiter.as_ref().is_some_and(|tx| !tx.is_closed()) {
                return Err(TtsError::RelayMisuse(
                    "next() called while another next() is outstanding".into(),
                ));
            }
            let (tx, rx) = oneshot::channel();
            inner.waiter = Some(tx);
            rx
        };

        match rx.await {
            Ok(Wake::Item(item)) => Ok(Some(item)),
            Ok(Wake::Done) => Ok(None),
            Ok(Wake::Failed(err)) => Err(err),
            // Relay dropped wholesale; treat as end of sequence.
            Err(_) => Ok(None),
        }
    }

    /// Consume the relay as an ordered stream. The stream yields every frame
    /// produced before a failure, then the failure itself, then ends.
    pub fn into_stream(self) -> impl Stream<Item = TtsResult<T>> + Send {
        futures::stream::unfold(Some(self), |state| async move {
            let relay = state?;
            match relay.next().await {
                Ok(Some(item)) => Some((Ok(item), Some(relay))),
                Ok(None) => None,
                Err(err) => Some((Err(err), None)),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::time::Duration;

    #[tokio::test]
    async fn drains_in_fifo_order() {
        let relay = ChunkRelay::new();
        relay.publish(1u32).await;
        relay.publish(2).await;
        relay.publish(3).await;
        relay.complete().await;

        assert_eq!(relay.next().await.unwrap(), Some(1));
        assert_eq!(relay.next().await.unwrap(), Some(2));
        assert_eq!(relay.next().await.unwrap(), Some(3));
        assert_eq!(relay.next().await.unwrap(), None);
    }

    #[tokio::test]
    async fn publish_wakes_waiting_consumer() {
        let relay = ChunkRelay::new();
        let consumer = relay.clone();
        let handle = tokio::spawn(async move { consumer.next().await });

        // Give the consumer a chance to park before publishing.
        tokio::time::sleep(Duration::from_millis(10)).await;
        relay.publish(7u32).await;
        assert_eq!(handle.await.unwrap().unwrap(), Some(7));
    }

    #[tokio::test]
    async fn complete_wakes_waiting_consumer() {
        let relay: ChunkRelay<u32> = ChunkRelay::new();
        let consumer = relay.clone();
        let handle = tokio::spawn(async move { consumer.next().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        relay.complete().await;
        assert_eq!(handle.await.unwrap().unwrap(), None);
    }

    #[tokio::test]
    async fn fail_wakes_waiting_consumer_with_error() {
        let relay: ChunkRelay<u32> = ChunkRelay::new();
        let consumer = relay.clone();
        let handle = tokio::spawn(async move { consumer.next().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        relay.fail(TtsError::Connection("socket reset".into())).await;
        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, TtsError::Connection(_)));
    }

    #[tokio::test]
    async fn queued_frames_survive_failure_then_error_surfaces_once() {
        let relay = ChunkRelay::new();
        relay.publish("a").await;
        relay.publish("b").await;
        relay
            .fail(TtsError::Vendor {
                provider: "minimax",
                code: 2039,
                message: "rate limited".into(),
            })
            .await;

        assert_eq!(relay.next().await.unwrap(), Some("a"));
        assert_eq!(relay.next().await.unwrap(), Some("b"));
        assert!(relay.next().await.is_err());
        // The failure was surfaced; the sequence is over, no suspension.
        assert_eq!(relay.next().await.unwrap(), None);
    }

    #[tokio::test]
    async fn terminal_calls_are_idempotent() {
        let relay: ChunkRelay<u32> = ChunkRelay::new();
        relay.complete().await;
        relay.fail(TtsError::Cancelled).await;
        relay.complete().await;
        // First terminal state wins.
        assert_eq!(relay.next().await.unwrap(), None);

        let relay: ChunkRelay<u32> = ChunkRelay::new();
        relay.fail(TtsError::Cancelled).await;
        relay.complete().await;
        assert!(relay.next().await.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn concurrent_next_is_a_usage_error() {
        let relay: ChunkRelay<u32> = ChunkRelay::new();
        let first = relay.clone();
        let handle = tokio::spawn(async move { first.next().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        let err = relay.next().await.unwrap_err();
        assert!(matches!(err, TtsError::RelayMisuse(_)));

        relay.complete().await;
        assert_eq!(handle.await.unwrap().unwrap(), None);
    }

    #[tokio::test]
    async fn abandoned_wait_does_not_poison_the_relay() {
        let relay: ChunkRelay<u32> = ChunkRelay::new();
        {
            let waiting = relay.next();
            // Poll once so the waiter registers, then drop the future.
            tokio::select! {
                biased;
                _ = waiting => panic!("nothing published yet"),
                _ = tokio::time::sleep(Duration::from_millis(10)) => {}
            }
        }
        relay.publish(5).await;
        assert_eq!(relay.next().await.unwrap(), Some(5));
    }

    #[tokio::test]
    async fn into_stream_yields_chunks_then_error_then_ends() {
        let relay = ChunkRelay::new();
        relay.publish(1u32).await;
        relay.publish(2).await;
        relay.fail(TtsError::Cancelled).await;

        let collected: Vec<_> = relay.into_stream().collect().await;
        assert_eq!(collected.len(), 3);
        assert_eq!(*collected[0].as_ref().unwrap(), 1);
        assert_eq!(*collected[1].as_ref().unwrap(), 2);
        assert!(collected[2].is_err());
    }

    #[tokio::test]
    async fn interleaved_publish_and_pull_preserves_order() {
        let relay = ChunkRelay::new();
        let producer = relay.clone();
        let feeder = tokio::spawn(async move {
            for i in 0..50u32 {
                producer.publish(i).await;
                if i % 7 == 0 {
                    tokio::task::yield_now().await;
                }
            }
            producer.complete().await;
        });

        let mut seen = Vec::new();
        while let Some(item) = relay.next().await.unwrap() {
            seen.push(item);
        }
        feeder.await.unwrap();
        assert_eq!(seen, (0..50).collect::<Vec<_>>());
    }
}
