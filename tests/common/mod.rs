#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::stream;
use llm_relay::error::LLMError;
use llm_relay::http::{HttpRequest, HttpResponse, HttpStreamResponse, HttpTransport};
use serde_json::Value;

/// In-memory transport replaying one scripted response and recording requests.
pub struct MemoryTransport {
    status: u16,
    headers: HashMap<String, String>,
    chunks: Vec<Vec<u8>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MemoryTransport {
    pub fn new(status: u16, chunks: Vec<Vec<u8>>) -> Arc<Self> {
        Self::with_headers(status, HashMap::new(), chunks)
    }

    pub fn with_headers(
        status: u16,
        headers: HashMap<String, String>,
        chunks: Vec<Vec<u8>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            status,
            headers,
            chunks,
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Splits `body` into chunks of `size` bytes.
    pub fn chunked(status: u16, body: &[u8], size: usize) -> Arc<Self> {
        Self::new(status, body.chunks(size).map(<[u8]>::to_vec).collect())
    }

    pub fn last_request(&self) -> HttpRequest {
        self.requests
            .lock()
            .expect("lock")
            .last()
            .cloned()
            .expect("a request was sent")
    }

    pub fn last_body(&self) -> Value {
        serde_json::from_slice(&self.last_request().body).expect("json body")
    }

    fn record(&self, request: HttpRequest) {
        self.requests.lock().expect("lock").push(request);
    }
}

#[async_trait]
impl HttpTransport for MemoryTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, LLMError> {
        self.record(request);
        Ok(HttpResponse {
            status: self.status,
            headers: self.headers.clone(),
            body: self.chunks.concat(),
        })
    }

    async fn send_stream(&self, request: HttpRequest) -> Result<HttpStreamResponse, LLMError> {
        self.record(request);
        let chunks: Vec<Result<Vec<u8>, LLMError>> =
            self.chunks.iter().cloned().map(Ok).collect();
        Ok(HttpStreamResponse {
            status: self.status,
            headers: self.headers.clone(),
            body: Box::pin(stream::iter(chunks)),
        })
    }
}
