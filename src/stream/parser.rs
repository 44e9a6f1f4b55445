use serde_json::Value;

use super::decoder::LineDecoder;

/// Provider-native event handed to a normalizer.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEvent {
    /// SSE event name for block-style protocols; `None` for `data:`-only streams.
    pub event: Option<String>,
    /// Parsed JSON payload.
    pub data: Value,
}

/// Output of an [`EventParser`].
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedEvent {
    /// An event worth normalizing.
    Event(RawEvent),
    /// In-band end-of-stream sentinel.
    End,
}

/// Turns raw byte chunks into provider events.
///
/// Implementations own their partial-line state and stop producing anything
/// once they have emitted [`ParsedEvent::End`].
pub trait EventParser: Send {
    /// Consumes one chunk and returns the events it completed.
    fn feed(&mut self, chunk: &[u8]) -> Vec<ParsedEvent>;

    /// Processes whatever is still buffered when the byte source closes.
    fn finish(&mut self) -> Vec<ParsedEvent>;

    /// Discards buffered input without processing it.
    fn reset(&mut self);
}

const DONE_SENTINEL: &str = "[DONE]";

/// Single-line SSE parser for OpenAI-style streams.
///
/// Only `data:` fields are considered; comments, `event:`, `id:` and `retry:`
/// lines are dropped, so multi-field events are not reassembled.
#[derive(Debug, Default)]
pub struct SseLineParser {
    decoder: LineDecoder,
    done: bool,
}

impl SseLineParser {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle_lines(&mut self, lines: Vec<String>, out: &mut Vec<ParsedEvent>) {
        for line in lines {
            if self.done {
                break;
            }
            if let Some(event) = self.handle_line(&line) {
                if event == ParsedEvent::End {
                    self.done = true;
                    self.decoder.reset();
                }
                out.push(event);
            }
        }
    }

    fn handle_line(&self, line: &str) -> Option<ParsedEvent> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let (name, value) = line.split_once(':')?;
        if name != "data" {
            return None;
        }
        let value = value.trim();
        if value.is_empty() {
            return None;
        }
        if value == DONE_SENTINEL {
            return Some(ParsedEvent::End);
        }
        match serde_json::from_str::<Value>(value) {
            Ok(data) => Some(ParsedEvent::Event(RawEvent { event: None, data })),
            Err(err) => {
                tracing::warn!(error = %err, line = %value, "failed parsing streamed JSON chunk");
                None
            }
        }
    }
}

impl EventParser for SseLineParser {
    fn feed(&mut self, chunk: &[u8]) -> Vec<ParsedEvent> {
        let mut out = Vec::new();
        if self.done {
            return out;
        }
        let lines = self.decoder.decode(chunk);
        self.handle_lines(lines, &mut out);
        out
    }

    fn finish(&mut self) -> Vec<ParsedEvent> {
        let mut out = Vec::new();
        if self.done {
            return out;
        }
        if let Some(line) = self.decoder.flush() {
            self.handle_lines(vec![line], &mut out);
        }
        out
    }

    fn reset(&mut self) {
        self.decoder.reset();
    }
}

const CONTENT_BLOCK_DELTA: &str = "content_block_delta";
const MESSAGE_STOP: &str = "message_stop";
const TEXT_DELTA: &str = "text_delta";

/// Multi-line block parser for Anthropic-style streams.
///
/// A block is every line up to the next blank line, typically
/// `event: <type>` followed by `data: <json>`. Only text deltas and the
/// `message_stop` sentinel are meaningful; every other event type is dropped.
#[derive(Debug, Default)]
pub struct EventBlockParser {
    decoder: LineDecoder,
    block: Vec<String>,
    done: bool,
}

impl EventBlockParser {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle_lines(&mut self, lines: Vec<String>, out: &mut Vec<ParsedEvent>) {
        for line in lines {
            if self.done {
                break;
            }
            if line.is_empty() {
                self.flush_block(out);
            } else {
                self.block.push(line);
            }
        }
    }

    fn flush_block(&mut self, out: &mut Vec<ParsedEvent>) {
        if self.block.is_empty() {
            return;
        }
        let block = std::mem::take(&mut self.block);
        if let Some(event) = parse_block(&block) {
            if event == ParsedEvent::End {
                self.done = true;
                self.decoder.reset();
            }
            out.push(event);
        }
    }
}

impl EventParser for EventBlockParser {
    fn feed(&mut self, chunk: &[u8]) -> Vec<ParsedEvent> {
        let mut out = Vec::new();
        if self.done {
            return out;
        }
        let lines = self.decoder.decode(chunk);
        self.handle_lines(lines, &mut out);
        out
    }

    fn finish(&mut self) -> Vec<ParsedEvent> {
        let mut out = Vec::new();
        if self.done {
            return out;
        }
        if let Some(line) = self.decoder.flush() {
            self.handle_lines(vec![line], &mut out);
        }
        if !self.done {
            self.flush_block(&mut out);
        }
        out
    }

    fn reset(&mut self) {
        self.decoder.reset();
        self.block.clear();
    }
}

fn field_value<'a>(line: &'a str, field: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(field)?.strip_prefix(':')?;
    Some(rest.strip_prefix(' ').unwrap_or(rest))
}

fn parse_block(block: &[String]) -> Option<ParsedEvent> {
    let mut event_type: Option<&str> = None;
    let mut data_lines: Vec<&str> = Vec::new();
    for line in block {
        if let Some(value) = field_value(line, "event") {
            event_type = Some(value.trim());
        } else if let Some(value) = field_value(line, "data") {
            data_lines.push(value);
        }
    }

    match event_type {
        Some(MESSAGE_STOP) => return Some(ParsedEvent::End),
        Some(kind) if kind != CONTENT_BLOCK_DELTA => {
            tracing::debug!(event = kind, "ignoring stream event");
            return None;
        }
        _ => {}
    }
    if data_lines.is_empty() {
        return None;
    }

    let data = match serde_json::from_str::<Value>(&data_lines.join("\n")) {
        Ok(value) => value,
        Err(err) => {
            tracing::warn!(error = %err, event = ?event_type, "failed parsing streamed event block");
            return None;
        }
    };

    // Some compatible gateways omit the `event:` line; the payload's `type`
    // then carries the event name.
    let kind = match event_type {
        Some(kind) => kind,
        None => data.get("type").and_then(Value::as_str).unwrap_or_default(),
    };

    match kind {
        MESSAGE_STOP => Some(ParsedEvent::End),
        CONTENT_BLOCK_DELTA => {
            let delta = data.get("delta")?;
            if delta.get("type").and_then(Value::as_str) != Some(TEXT_DELTA) {
                tracing::debug!(delta_type = ?delta.get("type"), "ignoring non-text content delta");
                return None;
            }
            Some(ParsedEvent::Event(RawEvent {
                event: Some(CONTENT_BLOCK_DELTA.to_string()),
                data: delta.clone(),
            }))
        }
        other => {
            tracing::debug!(event = other, "ignoring stream event");
            None
        }
    }
}
