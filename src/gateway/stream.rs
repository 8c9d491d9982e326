//! Instrumentation for streamed operations.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::Stream;
use pin_project_lite::pin_project;
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};
use tracing::debug;

use super::dispatcher::{Completion, DispatcherCore};
use crate::types::{FragmentStream, Operation, StreamEvent, Usage};
use crate::{BifrostError, Result};

/// What a finished stream needs for bookkeeping.
pub(crate) struct StreamRecorder {
    pub core: Arc<DispatcherCore>,
    pub backend: String,
    pub operation: Operation,
    pub model: Option<String>,
    pub args: Vec<Value>,
    pub attempts: u32,
    pub started: Instant,
}

impl StreamRecorder {
    fn finish(&self, usage: Option<Usage>, output: &str) {
        let model = self.model.as_deref().unwrap_or_default();
        let usage = usage.unwrap_or_else(|| {
            self.core
                .accountant
                .estimate_usage(&self.args, &Value::String(output.to_owned()), model)
        });
        self.core.record_success(Completion {
            backend: &self.backend,
            operation: self.operation,
            model: self.model.clone(),
            usage,
            latency: self.started.elapsed(),
            streamed: true,
        });
    }

    fn fail(&self, error: &BifrostError) {
        self.core.record_failure(
            &self.backend,
            self.operation,
            self.model.as_deref(),
            error,
            self.started.elapsed(),
            true,
        );
    }
}

pin_project! {
    /// Wraps a backend's fragment stream: classifies mid-stream failures,
    /// honors cancellation and records usage on completion.
    pub(crate) struct InstrumentedStream {
        #[pin]
        inner: FragmentStream,
        #[pin]
        cancel: Option<WaitForCancellationFutureOwned>,
        recorder: StreamRecorder,
        usage: Option<Usage>,
        output: String,
        done: bool,
    }
}

impl InstrumentedStream {
    pub(crate) fn new(
        inner: FragmentStream,
        recorder: StreamRecorder,
        cancel: Option<CancellationToken>,
    ) -> Self {
        Self {
            inner,
            cancel: cancel.map(CancellationToken::cancelled_owned),
            recorder,
            usage: None,
            output: String::new(),
            done: false,
        }
    }
}

impl Stream for InstrumentedStream {
    type Item = Result<StreamEvent>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        if *this.done {
            return Poll::Ready(None);
        }

        if let Some(cancel) = this.cancel.as_mut().as_pin_mut()
            && cancel.poll(cx).is_ready()
        {
            debug!(backend = %this.recorder.backend, "stream cancelled");
            *this.done = true;
            return Poll::Ready(Some(Err(BifrostError::Cancelled)));
        }

        match this.inner.as_mut().poll_next(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Ok(event))) => {
                match &event {
                    StreamEvent::Content(text) => this.output.push_str(text),
                    StreamEvent::Usage(usage) => *this.usage = Some(*usage),
                    StreamEvent::Data(_) | StreamEvent::Done => {}
                }
                Poll::Ready(Some(Ok(event)))
            }
            Poll::Ready(Some(Err(raw))) => {
                *this.done = true;
                let recorder = &*this.recorder;
                let error = recorder.core.classify_stream_failure(
                    &raw,
                    &recorder.backend,
                    recorder.operation,
                    recorder.model.as_deref(),
                    recorder.attempts,
                );
                recorder.fail(&error);
                Poll::Ready(Some(Err(error)))
            }
            Poll::Ready(None) => {
                *this.done = true;
                this.recorder.finish(*this.usage, this.output);
                Poll::Ready(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use futures_util::{StreamExt, stream};

    use super::*;
    use crate::Bifrost;
    use crate::error::BackendError;
    use crate::traits::Backend;
    use crate::types::{BackendOutput, Capabilities, EventKind, OperationRequest};

    struct Noop;

    #[async_trait::async_trait]
    impl Backend for Noop {
        fn name(&self) -> &str {
            "noop"
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities::text()
        }

        async fn invoke(
            &self,
            _request: &OperationRequest,
        ) -> std::result::Result<BackendOutput, BackendError> {
            Ok(BackendOutput::new(Value::Null))
        }
    }

    fn recorder() -> StreamRecorder {
        let dispatcher = Bifrost::builder()
            .backend("noop", Arc::new(Noop))
            .build()
            .unwrap();
        StreamRecorder {
            core: dispatcher.core(),
            backend: "noop".into(),
            operation: Operation::Generate,
            model: Some("unknown-model".into()),
            args: vec![Value::String("abcdefgh".into())],
            attempts: 1,
            started: Instant::now(),
        }
    }

    #[tokio::test]
    async fn completion_estimates_missing_usage() {
        let recorder = recorder();
        let core = Arc::clone(&recorder.core);
        let mut events = core.events.subscribe();
        let inner: FragmentStream = Box::pin(stream::iter(vec![
            Ok(StreamEvent::Content("abcd".into())),
            Ok(StreamEvent::Done),
        ]));

        let items: Vec<_> = InstrumentedStream::new(inner, recorder, None).collect().await;
        assert_eq!(items.len(), 2);

        let event = events.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::Success);
        assert!(event.streamed);
        assert_eq!((event.input_tokens, event.output_tokens), (2, 1));
        assert_eq!(core.ledger.backend("noop").unwrap().requests, 1);
    }

    #[tokio::test]
    async fn reported_usage_wins() {
        let recorder = recorder();
        let core = Arc::clone(&recorder.core);
        let inner: FragmentStream = Box::pin(stream::iter(vec![
            Ok(StreamEvent::Content("abcd".into())),
            Ok(StreamEvent::Usage(Usage::new(40, 7))),
        ]));

        let _: Vec<_> = InstrumentedStream::new(inner, recorder, None).collect().await;
        let counters = core.ledger.backend("noop").unwrap();
        assert_eq!((counters.input_tokens, counters.output_tokens), (40, 7));
    }

    #[tokio::test]
    async fn mid_stream_failure_is_classified_and_final() {
        let recorder = recorder();
        let core = Arc::clone(&recorder.core);
        let inner: FragmentStream = Box::pin(stream::iter(vec![
            Ok(StreamEvent::Content("partial".into())),
            Err(BackendError::Http("connection reset by peer".into())),
            Ok(StreamEvent::Content("never seen".into())),
        ]));

        let items: Vec<_> = InstrumentedStream::new(inner, recorder, None).collect().await;
        assert_eq!(items.len(), 2);
        let err = items[1].as_ref().unwrap_err();
        assert!(err.classified().is_some());
        assert_eq!(core.ledger.backend("noop").unwrap().errors, 1);
    }

    #[tokio::test]
    async fn cancellation_ends_the_stream() {
        let recorder = recorder();
        let core = Arc::clone(&recorder.core);
        let token = CancellationToken::new();
        token.cancel();
        let inner: FragmentStream = Box::pin(stream::pending());

        let items: Vec<_> = InstrumentedStream::new(inner, recorder, Some(token))
            .collect()
            .await;
        assert!(matches!(items.as_slice(), [Err(BifrostError::Cancelled)]));
        assert!(core.ledger.backend("noop").is_none());
    }
}
