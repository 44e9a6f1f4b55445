//! Streaming response pipeline: bytes -> lines -> provider events -> normalized values.
//!
//! [`ChunkProcessor`] is the synchronous core. It is exposed two ways:
//! [`NormalizedStream`] pulls from a transport body only when polled, while
//! [`transform`] splits it into a push-side [`TransformWriter`] and a
//! pull-side [`TransformReader`].

use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;
use std::str::FromStr;
use std::task::{Context, Poll};

use futures_core::Stream;
use serde::{Deserialize, Serialize};

use crate::error::LLMError;
use crate::http::HttpBodyStream;
use crate::normalize::{DynNormalizer, Normalizer};

mod decoder;
mod parser;
mod transform;

pub use decoder::LineDecoder;
pub use parser::{EventBlockParser, EventParser, ParsedEvent, RawEvent, SseLineParser};
pub use transform::{TransformReader, TransformWriter, transform};

/// Wire format of a byte stream, chosen by the caller and never sniffed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamFormat {
    /// `data: <json>` lines terminated by `data: [DONE]`.
    OpenAi,
    /// `event:`/`data:` blocks terminated by `event: message_stop`.
    Anthropic,
}

impl StreamFormat {
    /// Instantiates a fresh parser for one stream.
    pub fn parser(self) -> Box<dyn EventParser> {
        match self {
            StreamFormat::OpenAi => Box::new(SseLineParser::new()),
            StreamFormat::Anthropic => Box::new(EventBlockParser::new()),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StreamFormat::OpenAi => "openai",
            StreamFormat::Anthropic => "anthropic",
        }
    }
}

impl fmt::Display for StreamFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StreamFormat {
    type Err = LLMError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "openai" => Ok(StreamFormat::OpenAi),
            "anthropic" => Ok(StreamFormat::Anthropic),
            other => Err(LLMError::Validation {
                message: format!("unknown stream format: {other}"),
            }),
        }
    }
}

/// Decoder, parser and normalizer for one in-flight response.
///
/// Every chunk is processed to completion before the next one is accepted.
/// Once the terminal signal has been seen, further input is ignored.
pub struct ChunkProcessor<T> {
    format: StreamFormat,
    parser: Box<dyn EventParser>,
    normalizer: DynNormalizer<T>,
    finished: bool,
}

impl<T> ChunkProcessor<T> {
    pub fn new<N>(format: StreamFormat, normalizer: N) -> Self
    where
        N: Normalizer<T> + 'static,
    {
        Self {
            format,
            parser: format.parser(),
            normalizer: Box::new(normalizer),
            finished: false,
        }
    }

    /// Feeds one byte chunk, appending every normalized value to `out`.
    pub fn process(&mut self, chunk: &[u8], out: &mut VecDeque<T>) {
        if self.finished {
            return;
        }
        let events = self.parser.feed(chunk);
        self.accept(events, out);
    }

    /// Flushes buffered input at source close and marks the sequence finished.
    pub fn finish(&mut self, out: &mut VecDeque<T>) {
        if self.finished {
            return;
        }
        let events = self.parser.finish();
        self.accept(events, out);
        if !self.finished {
            tracing::debug!(format = %self.format, "stream closed without sentinel");
            self.finished = true;
        }
    }

    /// Drops buffered partial input without processing it and marks the
    /// sequence finished.
    pub fn discard(&mut self) {
        self.parser.reset();
        self.finished = true;
    }

    /// Whether the terminal signal has been observed.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn accept(&mut self, events: Vec<ParsedEvent>, out: &mut VecDeque<T>) {
        for event in events {
            match event {
                ParsedEvent::End => {
                    tracing::debug!(format = %self.format, "stream sentinel received");
                    self.finished = true;
                    self.parser.reset();
                    return;
                }
                ParsedEvent::Event(raw) => match self.normalizer.normalize(raw) {
                    Ok(value) => out.push_back(value),
                    Err(err) => {
                        tracing::warn!(format = %self.format, error = %err, "skipping event that failed to normalize");
                    }
                },
            }
        }
    }
}

/// Lazy stream of normalized values backed by a transport body.
///
/// The body is polled only when the consumer asks for the next item and is
/// dropped as soon as the sequence ends, a transport error arrives, or the
/// stream itself is dropped or cancelled.
pub struct NormalizedStream<T> {
    body: Option<HttpBodyStream>,
    processor: ChunkProcessor<T>,
    pending: VecDeque<T>,
}

impl<T> NormalizedStream<T> {
    pub fn new<N>(body: HttpBodyStream, format: StreamFormat, normalizer: N) -> Self
    where
        N: Normalizer<T> + 'static,
    {
        Self {
            body: Some(body),
            processor: ChunkProcessor::new(format, normalizer),
            pending: VecDeque::new(),
        }
    }

    /// Stops the stream: releases the body and discards buffered input and
    /// undelivered values.
    pub fn cancel(&mut self) {
        if self.body.take().is_some() {
            tracing::debug!("stream cancelled by consumer");
        }
        self.processor.discard();
        self.pending.clear();
    }
}

impl<T> Unpin for NormalizedStream<T> {}

impl<T> Stream for NormalizedStream<T> {
    type Item = Result<T, LLMError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if let Some(value) = this.pending.pop_front() {
                return Poll::Ready(Some(Ok(value)));
            }
            if this.processor.is_finished() {
                this.body = None;
                return Poll::Ready(None);
            }
            let Some(body) = this.body.as_mut() else {
                return Poll::Ready(None);
            };

            match body.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    this.processor.process(&bytes, &mut this.pending);
                }
                Poll::Ready(Some(Err(err))) => {
                    this.body = None;
                    this.processor.discard();
                    this.pending.clear();
                    return Poll::Ready(Some(Err(err)));
                }
                Poll::Ready(None) => {
                    this.body = None;
                    this.processor.finish(&mut this.pending);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use futures_util::{StreamExt, stream};
    use serde_json::{Value, json};

    use super::*;
    use crate::normalize::anthropic::AnthropicChunkNormalizer;
    use crate::normalize::openai::chat_chunk;

    fn raw_data(event: RawEvent) -> Result<Value, LLMError> {
        Ok(event.data)
    }

    fn build_body(chunks: Vec<Result<Vec<u8>, LLMError>>) -> HttpBodyStream {
        Box::pin(stream::iter(chunks))
    }

    fn process_all(format: StreamFormat, chunks: &[&[u8]]) -> Vec<Value> {
        let mut processor = ChunkProcessor::new(format, raw_data);
        let mut out = VecDeque::new();
        for chunk in chunks {
            processor.process(chunk, &mut out);
        }
        processor.finish(&mut out);
        out.into_iter().collect()
    }

    const OPENAI_TEXT: &[u8] = b"data: {\"id\":\"c1\",\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\",\"content\":\"\xe4\xbd\xa0\"}}]}\n\n\
: keep-alive\n\n\
data: {\"id\":\"c1\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"\xe5\xa5\xbd\"}}]}\r\n\r\n\
data: {\"id\":\"c1\",\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n\
data: [DONE]\n\n";

    #[test]
    fn every_two_way_split_yields_identical_output() {
        let expected = process_all(StreamFormat::OpenAi, &[OPENAI_TEXT]);
        assert_eq!(expected.len(), 3);
        for split in 0..=OPENAI_TEXT.len() {
            let got = process_all(
                StreamFormat::OpenAi,
                &[&OPENAI_TEXT[..split], &OPENAI_TEXT[split..]],
            );
            assert_eq!(got, expected, "split at {split}");
        }
    }

    #[test]
    fn byte_by_byte_matches_single_chunk() {
        let expected = process_all(StreamFormat::OpenAi, &[OPENAI_TEXT]);
        let chunks: Vec<&[u8]> = OPENAI_TEXT.chunks(1).collect();
        assert_eq!(process_all(StreamFormat::OpenAi, &chunks), expected);
    }

    #[test]
    fn round_trip_single_event_then_termination() {
        let mut processor = ChunkProcessor::new(StreamFormat::OpenAi, raw_data);
        let mut out = VecDeque::new();
        processor.process(b"data: {\"a\":1}\n\ndata: [DONE]\n", &mut out);
        assert!(processor.is_finished());
        assert_eq!(out, VecDeque::from(vec![json!({"a": 1})]));

        processor.process(b"data: {\"b\":2}\n", &mut out);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn normalizer_errors_skip_only_that_event() {
        let mut processor = ChunkProcessor::new(StreamFormat::OpenAi, chat_chunk);
        let mut out = VecDeque::new();
        processor.process(
            b"data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"a\"}}]}\n\
data: {\"choices\":\"broken\"}\n\
data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"b\"}}]}\n",
            &mut out,
        );
        let texts: Vec<_> = out.iter().filter_map(|chunk| chunk.content()).collect();
        assert_eq!(texts, vec!["a", "b"]);
    }

    #[test]
    fn stream_format_parses_tags() {
        assert_eq!("openai".parse::<StreamFormat>().unwrap(), StreamFormat::OpenAi);
        assert_eq!(
            "anthropic".parse::<StreamFormat>().unwrap(),
            StreamFormat::Anthropic
        );
        assert!("gemini".parse::<StreamFormat>().is_err());
        assert_eq!(
            serde_json::from_value::<StreamFormat>(json!("anthropic")).unwrap(),
            StreamFormat::Anthropic
        );
        assert_eq!(StreamFormat::OpenAi.to_string(), "openai");
    }

    #[tokio::test]
    async fn normalized_stream_emits_anthropic_text_then_ends() {
        let body = build_body(vec![
            Ok(b"event: content_block_delta\ndata: {\"delta\":{\"type\":\"text_delta\",".to_vec()),
            Ok(b"\"text\":\"hi\"}}\n\nevent: message_stop\ndata: {}\n\n".to_vec()),
        ]);
        let mut stream = NormalizedStream::new(
            body,
            StreamFormat::Anthropic,
            AnthropicChunkNormalizer::new("claude"),
        );

        let chunk = stream.next().await.expect("item").expect("ok");
        assert_eq!(chunk.content(), Some("hi"));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn normalized_stream_surfaces_transport_error_and_stops() {
        let body = build_body(vec![
            Ok(b"data: {\"n\":1}\n\ndata: {\"n\"".to_vec()),
            Err(LLMError::transport("connection reset")),
            Ok(b":2}\n\n".to_vec()),
        ]);
        let mut stream = NormalizedStream::new(body, StreamFormat::OpenAi, raw_data);

        assert_eq!(stream.next().await.unwrap().unwrap(), json!({"n": 1}));
        let err = stream.next().await.expect("error item").unwrap_err();
        assert!(matches!(err, LLMError::Transport { .. }));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn normalized_stream_flushes_unterminated_tail_on_close() {
        let body = build_body(vec![Ok(b"data: {\"tail\":1}".to_vec())]);
        let stream = NormalizedStream::new(body, StreamFormat::OpenAi, raw_data);
        let items: Vec<_> = stream.collect().await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].as_ref().unwrap(), &json!({"tail": 1}));
    }

    /// Body that records how many chunks were pulled and whether it was dropped.
    struct TrackedBody {
        pulled: Arc<AtomicUsize>,
        dropped: Arc<AtomicBool>,
    }

    impl Stream for TrackedBody {
        type Item = Result<Vec<u8>, LLMError>;

        fn poll_next(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            let n = self.pulled.fetch_add(1, Ordering::SeqCst);
            Poll::Ready(Some(Ok(format!("data: {{\"n\":{n}}}\n\n").into_bytes())))
        }
    }

    impl Drop for TrackedBody {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn dropping_or_cancelling_releases_the_body() {
        let pulled = Arc::new(AtomicUsize::new(0));
        let dropped = Arc::new(AtomicBool::new(false));
        let body: HttpBodyStream = Box::pin(TrackedBody {
            pulled: pulled.clone(),
            dropped: dropped.clone(),
        });
        let mut stream = NormalizedStream::new(body, StreamFormat::OpenAi, raw_data);

        assert_eq!(stream.next().await.unwrap().unwrap(), json!({"n": 0}));
        assert_eq!(stream.next().await.unwrap().unwrap(), json!({"n": 1}));
        assert_eq!(pulled.load(Ordering::SeqCst), 2);

        stream.cancel();
        assert!(dropped.load(Ordering::SeqCst));
        assert!(stream.next().await.is_none());
        assert_eq!(pulled.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn sentinel_releases_body_before_source_ends() {
        let dropped = Arc::new(AtomicBool::new(false));
        let tail = TrackedBody {
            pulled: Arc::new(AtomicUsize::new(0)),
            dropped: dropped.clone(),
        };
        let head = stream::iter(vec![Ok(b"data: {\"a\":1}\n\ndata: [DONE]\n\n".to_vec())]);
        let body: HttpBodyStream = Box::pin(head.chain(tail));
        let mut stream = NormalizedStream::new(body, StreamFormat::OpenAi, raw_data);

        assert!(stream.next().await.unwrap().is_ok());
        assert!(stream.next().await.is_none());
        assert!(dropped.load(Ordering::SeqCst));
    }
}
