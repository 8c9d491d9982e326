//! Tests for `Dispatcher::perform_stream`.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bifrost::{
    Backend, BackendError, BackendOutput, Bifrost, BifrostError, Capabilities, DispatchStream,
    EventKind, FragmentStream, Operation, OperationRequest, RetryConfig, StreamEvent, Usage,
};
use futures_util::{StreamExt, stream};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

type Fragments = Vec<Result<StreamEvent, BackendError>>;

/// Streams a fixed script of fragments; the first `connect_failures`
/// connection attempts fail.
struct StreamingBackend {
    fragments: fn() -> Fragments,
    connect_failures: AtomicU32,
    connects: AtomicU32,
    endless: bool,
}

impl StreamingBackend {
    fn new(fragments: fn() -> Fragments) -> Self {
        Self {
            fragments,
            connect_failures: AtomicU32::new(0),
            connects: AtomicU32::new(0),
            endless: false,
        }
    }
}

#[async_trait]
impl Backend for StreamingBackend {
    fn name(&self) -> &str {
        "streaming"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::text()
    }

    async fn invoke(&self, _request: &OperationRequest) -> Result<BackendOutput, BackendError> {
        Ok(BackendOutput::new(Value::Null))
    }

    async fn invoke_stream(
        &self,
        _request: &OperationRequest,
    ) -> Result<FragmentStream, BackendError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let remaining = self.connect_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.connect_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(BackendError::Api {
                status: 502,
                message: "bad gateway".into(),
            });
        }
        let scripted = stream::iter((self.fragments)());
        if self.endless {
            let ticks = stream::unfold(0u64, |n| async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Some((Ok(StreamEvent::Content(format!("{n} "))), n + 1))
            });
            Ok(Box::pin(scripted.chain(ticks)))
        } else {
            Ok(Box::pin(scripted))
        }
    }
}

/// Backend relying on the default `invoke_stream`.
struct BlockingOnly;

#[async_trait]
impl Backend for BlockingOnly {
    fn name(&self) -> &str {
        "blocking"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            generate: true,
            ..Default::default()
        }
    }

    async fn invoke(&self, _request: &OperationRequest) -> Result<BackendOutput, BackendError> {
        Ok(BackendOutput::new(Value::Null))
    }
}

fn hello_world() -> Fragments {
    vec![
        Ok(StreamEvent::Content("hello ".into())),
        Ok(StreamEvent::Content("world".into())),
        Ok(StreamEvent::Usage(Usage::new(3, 2))),
        Ok(StreamEvent::Done),
    ]
}

async fn collect(stream: DispatchStream) -> Vec<bifrost::Result<StreamEvent>> {
    stream.collect().await
}

#[tokio::test]
async fn fragments_arrive_in_order_and_usage_is_recorded() {
    let dispatcher = Bifrost::builder()
        .backend("s", Arc::new(StreamingBackend::new(hello_world)))
        .build()
        .unwrap();
    let mut events = dispatcher.subscribe();

    let stream = dispatcher
        .perform_stream(&OperationRequest::generate("hi"))
        .await
        .unwrap();
    let items = collect(stream).await;

    let text: String = items
        .iter()
        .filter_map(|item| match item {
            Ok(StreamEvent::Content(text)) => Some(text.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(text, "hello world");
    assert!(matches!(items.last(), Some(Ok(StreamEvent::Done))));

    let event = events.recv().await.unwrap();
    assert_eq!(event.kind, EventKind::Success);
    assert!(event.streamed);
    assert_eq!(event.tokens(), 5);
    assert_eq!(dispatcher.ledger().backend("s").unwrap().requests, 1);
}

#[tokio::test]
async fn streams_are_never_cached() {
    let backend = Arc::new(StreamingBackend::new(hello_world));
    let dispatcher = Bifrost::builder().backend("s", backend.clone()).build().unwrap();
    let request = OperationRequest::generate("hi");

    for _ in 0..2 {
        let stream = dispatcher.perform_stream(&request).await.unwrap();
        collect(stream).await;
    }

    assert_eq!(backend.connects.load(Ordering::SeqCst), 2);
    assert!(dispatcher.cache().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn connection_failures_are_retried() {
    let backend = StreamingBackend::new(hello_world);
    backend.connect_failures.store(2, Ordering::SeqCst);
    let backend = Arc::new(backend);
    let dispatcher = Bifrost::builder()
        .backend("s", backend.clone())
        .retry(RetryConfig::new().max_attempts(3).jitter(false))
        .build()
        .unwrap();

    let stream = dispatcher
        .perform_stream(&OperationRequest::generate("hi"))
        .await
        .unwrap();
    let items = collect(stream).await;

    assert!(items.iter().all(Result::is_ok));
    assert_eq!(backend.connects.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn mid_stream_error_is_final_and_classified() {
    let dispatcher = Bifrost::builder()
        .backend(
            "s",
            Arc::new(StreamingBackend::new(|| {
                vec![
                    Ok(StreamEvent::Content("partial".into())),
                    Err(BackendError::Stream("upstream closed".into())),
                    Ok(StreamEvent::Content("dropped".into())),
                ]
            })),
        )
        .build()
        .unwrap();

    let stream = dispatcher
        .perform_stream(&OperationRequest::generate("hi"))
        .await
        .unwrap();
    let items = collect(stream).await;

    assert_eq!(items.len(), 2);
    assert!(items[0].is_ok());
    let err = items[1].as_ref().unwrap_err();
    assert!(err.classified().is_some(), "{err}");
    assert_eq!(dispatcher.ledger().backend("s").unwrap().errors, 1);
}

#[tokio::test(start_paused = true)]
async fn cancellation_ends_an_endless_stream() {
    let mut backend = StreamingBackend::new(Vec::new);
    backend.endless = true;
    let dispatcher = Bifrost::builder()
        .backend("s", Arc::new(backend))
        .build()
        .unwrap();
    let token = CancellationToken::new();

    let mut stream = dispatcher
        .perform_stream(&OperationRequest::generate("hi").cancel_token(token.clone()))
        .await
        .unwrap();

    let mut received = 0;
    let last = loop {
        match stream.next().await {
            Some(Ok(_)) => {
                received += 1;
                if received == 3 {
                    token.cancel();
                }
            }
            other => break other,
        }
    };

    assert!(matches!(last, Some(Err(BifrostError::Cancelled))), "{last:?}");
    assert!(stream.next().await.is_none());
    assert!(dispatcher.ledger().backend("s").is_none());
}

#[tokio::test]
async fn streaming_requires_streaming_capability() {
    let dispatcher = Bifrost::builder()
        .backend("blocking", Arc::new(BlockingOnly))
        .build()
        .unwrap();

    let err = dispatcher
        .perform_stream(&OperationRequest::generate("hi"))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, BifrostError::NoBackendAvailable { .. }), "{err}");

    let err = dispatcher
        .perform_stream(&OperationRequest::new(Operation::Embed))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, BifrostError::NoBackendAvailable { .. }));
}

#[tokio::test]
async fn slow_consumer_is_backpressured() {
    let dispatcher = Bifrost::builder()
        .backend("s", Arc::new(StreamingBackend::new(|| {
            (0..100)
                .map(|n| Ok(StreamEvent::Content(n.to_string())))
                .collect()
        })))
        .stream_buffer(4)
        .build()
        .unwrap();

    let mut stream = dispatcher
        .perform_stream(&OperationRequest::generate("hi"))
        .await
        .unwrap();

    let mut seen = Vec::new();
    while let Some(item) = stream.next().await {
        if let Ok(StreamEvent::Content(text)) = item {
            seen.push(text);
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(seen.len(), 100);
    assert_eq!(seen.first().map(String::as_str), Some("0"));
    assert_eq!(seen.last().map(String::as_str), Some("99"));
}
