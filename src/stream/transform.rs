use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_core::Stream;
use futures_util::StreamExt;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

use super::{ChunkProcessor, StreamFormat};
use crate::error::LLMError;
use crate::http::HttpBodyStream;
use crate::normalize::Normalizer;

/// Creates a connected writer/reader pair for one stream.
///
/// Bytes written to the [`TransformWriter`] come out of the [`TransformReader`]
/// as normalized values. The queue between them is unbounded: a writer that
/// outpaces its reader is never blocked.
///
/// # Examples
///
/// ```
/// use futures_util::StreamExt;
/// use llm_relay::error::LLMError;
/// use llm_relay::stream::{RawEvent, StreamFormat, transform};
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let (mut writer, reader) =
///     transform(StreamFormat::OpenAi, |event: RawEvent| -> Result<_, LLMError> { Ok(event.data) });
/// writer.write(b"data: {\"n\":1}\n\ndata: [DONE]\n\n").unwrap();
///
/// let items: Vec<_> = reader.collect().await;
/// assert_eq!(items.len(), 1);
/// # });
/// ```
pub fn transform<T, N>(format: StreamFormat, normalizer: N) -> (TransformWriter<T>, TransformReader<T>)
where
    N: Normalizer<T> + 'static,
{
    let (tx, rx) = unbounded_channel();
    (
        TransformWriter {
            processor: ChunkProcessor::new(format, normalizer),
            tx: Some(tx),
            cancelled: false,
            buffer: VecDeque::new(),
        },
        TransformReader {
            rx,
            cancelled: false,
        },
    )
}

/// Producer half of a [`transform`] pair.
pub struct TransformWriter<T> {
    processor: ChunkProcessor<T>,
    tx: Option<UnboundedSender<Result<T, LLMError>>>,
    cancelled: bool,
    buffer: VecDeque<T>,
}

impl<T> TransformWriter<T> {
    /// Processes one chunk to completion and enqueues every value it yields.
    ///
    /// Writes after the sequence has ended are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`LLMError::Aborted`] once the reader has been cancelled or
    /// dropped; buffered partial input is discarded at that point.
    pub fn write(&mut self, chunk: &[u8]) -> Result<(), LLMError> {
        if self.tx.as_ref().is_some_and(UnboundedSender::is_closed) {
            self.mark_cancelled();
        }
        if self.cancelled {
            return Err(LLMError::aborted("stream reader was cancelled"));
        }
        if self.tx.is_none() {
            return Ok(());
        }

        self.processor.process(chunk, &mut self.buffer);
        self.deliver()?;
        if self.processor.is_finished() {
            self.tx = None;
        }
        Ok(())
    }

    /// Signals source close: flushes trailing input and ends the sequence.
    pub fn close(&mut self) {
        if self.tx.is_none() {
            return;
        }
        self.processor.finish(&mut self.buffer);
        // A cancelled reader has nowhere to deliver to; the sequence is over either way.
        let _ = self.deliver();
        self.tx = None;
    }

    /// Delivers `err` to the reader and ends the sequence.
    pub fn abort(&mut self, err: LLMError) {
        self.processor.discard();
        self.buffer.clear();
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Err(err));
        }
    }

    /// Whether the reader side can no longer receive values.
    pub fn is_finished(&self) -> bool {
        self.tx.is_none()
    }

    /// Drives a transport body through the writer until it ends, the sentinel
    /// is seen, a transport error occurs, or the reader is cancelled.
    ///
    /// Cancellation is observed while waiting on the body too, so a stalled
    /// source does not keep the pipe alive. The body is dropped on return in
    /// all cases.
    pub async fn pipe(mut self, mut body: HttpBodyStream) {
        let Some(watch) = self.tx.clone() else {
            return;
        };
        loop {
            let next = tokio::select! {
                _ = watch.closed() => {
                    tracing::debug!("stopping pipe after reader cancellation");
                    self.mark_cancelled();
                    return;
                }
                next = body.next() => next,
            };
            let Some(chunk) = next else {
                break;
            };
            match chunk {
                Ok(bytes) => {
                    if self.write(&bytes).is_err() {
                        tracing::debug!("stopping pipe after reader cancellation");
                        return;
                    }
                    if self.is_finished() {
                        return;
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "stream source failed");
                    self.abort(err);
                    return;
                }
            }
        }
        drop(watch);
        self.close();
    }

    fn deliver(&mut self) -> Result<(), LLMError> {
        let Some(tx) = self.tx.as_ref() else {
            self.buffer.clear();
            return Ok(());
        };
        while let Some(value) = self.buffer.pop_front() {
            if tx.send(Ok(value)).is_err() {
                self.mark_cancelled();
                return Err(LLMError::aborted("stream reader was cancelled"));
            }
        }
        Ok(())
    }

    fn mark_cancelled(&mut self) {
        if !self.cancelled {
            tracing::debug!("stream reader cancelled, discarding buffered input");
        }
        self.cancelled = true;
        self.tx = None;
        self.buffer.clear();
        self.processor.discard();
    }
}

/// Consumer half of a [`transform`] pair.
///
/// Yields `Ok` values in source order, at most one `Err` (after which the
/// stream ends), and then `None`.
pub struct TransformReader<T> {
    rx: UnboundedReceiver<Result<T, LLMError>>,
    cancelled: bool,
}

impl<T> TransformReader<T> {
    /// Stops consumption. Undelivered values are dropped, the writer's next
    /// write fails with [`LLMError::Aborted`], and the stream ends without an
    /// error.
    pub fn cancel(&mut self) {
        if self.cancelled {
            return;
        }
        self.cancelled = true;
        self.rx.close();
        while self.rx.try_recv().is_ok() {}
    }
}

impl<T> Unpin for TransformReader<T> {}

impl<T> Stream for TransformReader<T> {
    type Item = Result<T, LLMError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.cancelled {
            return Poll::Ready(None);
        }
        this.rx.poll_recv(cx)
    }
}
