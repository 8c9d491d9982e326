//! Streaming backpressure via bounded channels.
//!
//! Wraps stream output in a bounded `tokio::sync::mpsc::channel` so that
//! producers block when consumers fall behind. Without this, a fast backend
//! can fill unbounded memory if the consumer is slow.
//!
//! Applied by the dispatcher to every `perform_stream` result. The buffer
//! size defaults to [`DEFAULT_STREAM_BUFFER`].

use std::pin::Pin;

use futures_util::{Stream, StreamExt};
use tokio_stream::wrappers::ReceiverStream;

/// Default number of items buffered between producer and consumer.
pub const DEFAULT_STREAM_BUFFER: usize = 64;

/// Wrap a stream in a bounded channel for backpressure.
///
/// Spawns a producer task that reads from `inner` and sends items through
/// a bounded `mpsc` channel. When the channel is full the producer waits
/// for the consumer. If the consumer drops the stream, the producer stops
/// and drops `inner`.
///
/// A `buffer_size` of 0 is treated as 1.
///
/// # Panics
///
/// Requires a tokio runtime context (called within an async fn).
pub fn bounded_stream<T: Send + 'static>(
    inner: Pin<Box<dyn Stream<Item = T> + Send>>,
    buffer_size: usize,
) -> Pin<Box<dyn Stream<Item = T> + Send>> {
    let (tx, rx) = tokio::sync::mpsc::channel(buffer_size.max(1));

    tokio::spawn(async move {
        let mut inner = inner;
        loop {
            tokio::select! {
                () = tx.closed() => break,
                item = inner.next() => match item {
                    Some(item) => {
                        if tx.send(item).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }
    });

    Box::pin(ReceiverStream::new(rx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn preserves_order() {
        let inner = futures_util::stream::iter(0..100);
        let items: Vec<i32> = bounded_stream(Box::pin(inner), 4).collect().await;
        assert_eq!(items, (0..100).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn producer_stops_when_consumer_drops() {
        let produced = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&produced);
        let inner = futures_util::stream::iter(0..10_000).inspect(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let mut stream = bounded_stream(Box::pin(inner), 2);
        assert_eq!(stream.next().await, Some(0));
        drop(stream);

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(produced.load(Ordering::SeqCst) < 10_000);
    }
}
