//! HTTP transport.
//!
//! The actual client sits behind [`HttpClient`] so the sync engine can run
//! against reqwest in production and [`MockHttpClient`] in tests. [`Http`]
//! turns a response into a [`NetworkResult`], handing 2xx bodies to a
//! blocking reader as a plain [`std::io::Read`] fed chunk by chunk from the
//! network, so large bodies are never buffered whole.

use std::collections::VecDeque;
use std::fmt;
use std::io::{self, Read};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Buf, Bytes};
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::NetworkResult;
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};

/// Streamed response body.
pub type BodyStream = Pin<Box<dyn Stream<Item = SyncResult<Bytes>> + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Get => write!(f, "GET"),
            Method::Post => write!(f, "POST"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    /// JSON body
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn post(url: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            headers: Vec::new(),
            body: Some(body),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn header_count(&self, name: &str) -> usize {
        self.headers
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(name))
            .count()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

pub struct HttpResponse {
    pub status: u16,
    pub body: BodyStream,
}

/// HTTP client abstraction.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Send the request and return once the status line has arrived.
    async fn execute(&self, request: HttpRequest) -> SyncResult<HttpResponse>;
}

/// [`HttpClient`] backed by reqwest.
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    pub fn new(config: &SyncConfig) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .read_timeout(config.read_timeout())
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn execute(&self, request: HttpRequest) -> SyncResult<HttpResponse> {
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.bytes_stream().map(|chunk| chunk.map_err(SyncError::from));
        Ok(HttpResponse {
            status,
            body: Box::pin(body),
        })
    }
}

/// Runs requests and classifies their outcome.
#[derive(Clone)]
pub struct Http {
    client: Arc<dyn HttpClient>,
    chunk_capacity: usize,
}

impl Http {
    pub fn new(client: Arc<dyn HttpClient>, chunk_capacity: usize) -> Self {
        Self {
            client,
            chunk_capacity: chunk_capacity.max(1),
        }
    }

    /// Send `request`; on a 2xx status, run `reader` over the streamed body
    /// on a blocking thread.
    ///
    /// Non-2xx bodies are collected into [`NetworkResult::Failure`]. Transport
    /// errors, and errors returned by `reader`, become
    /// [`NetworkResult::NetworkException`]. `reader` is dropped unused unless
    /// the status is 2xx.
    pub async fn make_request<T, F>(&self, request: HttpRequest, reader: F) -> NetworkResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn Read) -> SyncResult<T> + Send + 'static,
    {
        let method = request.method;
        let url = request.url.clone();

        let response = match self.client.execute(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!("{} {} - Exception {}", method, url, e);
                return NetworkResult::NetworkException(e);
            }
        };

        let status = response.status;
        if !(200..300).contains(&status) {
            return match collect_body(response.body).await {
                Ok(body) => {
                    info!("{} {} - Failure {}", method, url, status);
                    NetworkResult::Failure {
                        body,
                        status_code: status,
                    }
                }
                Err(e) => NetworkResult::NetworkException(e),
            };
        }

        let (tx, rx) = mpsc::channel(self.chunk_capacity);
        let pump = tokio::spawn(pump_body(response.body, tx));
        let parsed = tokio::task::spawn_blocking(move || {
            let mut body = ChunkReader::new(rx);
            reader(&mut body)
        })
        .await;
        if let Err(e) = pump.await {
            debug!("body pump for {} ended abnormally: {}", url, e);
        }

        match parsed {
            Ok(Ok(value)) => {
                info!("{} {} - Success {}", method, url, status);
                NetworkResult::Success {
                    value,
                    status_code: status,
                }
            }
            Ok(Err(e)) => {
                warn!("{} {} - Exception while reading body: {}", method, url, e);
                NetworkResult::NetworkException(e)
            }
            Err(e) => NetworkResult::NetworkException(e.into()),
        }
    }
}

async fn collect_body(mut body: BodyStream) -> SyncResult<Vec<u8>> {
    let mut out = Vec::new();
    while let Some(chunk) = body.next().await {
        out.extend_from_slice(&chunk?);
    }
    Ok(out)
}

/// Forward body chunks until the body ends or the reader hangs up.
async fn pump_body(mut body: BodyStream, tx: mpsc::Sender<SyncResult<Bytes>>) {
    while let Some(chunk) = body.next().await {
        let failed = chunk.is_err();
        if tx.send(chunk).await.is_err() || failed {
            break;
        }
    }
}

/// Blocking [`Read`] over chunks arriving on a channel.
struct ChunkReader {
    rx: mpsc::Receiver<SyncResult<Bytes>>,
    current: Bytes,
}

impl ChunkReader {
    fn new(rx: mpsc::Receiver<SyncResult<Bytes>>) -> Self {
        Self {
            rx,
            current: Bytes::new(),
        }
    }
}

impl Read for ChunkReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.current.is_empty() {
            match self.rx.blocking_recv() {
                Some(Ok(chunk)) => self.current = chunk,
                Some(Err(e)) => return Err(io::Error::new(io::ErrorKind::Other, e.to_string())),
                None => return Ok(0),
            }
        }
        let n = buf.len().min(self.current.len());
        buf[..n].copy_from_slice(&self.current[..n]);
        self.current.advance(n);
        Ok(n)
    }
}

// =========================================================================
// Mock client
// =========================================================================

/// Canned answer for [`MockHttpClient`].
#[derive(Debug, Clone)]
pub enum MockReply {
    Respond {
        status: u16,
        body: Vec<u8>,
        /// Body is delivered in chunks of this many bytes
        chunk_size: usize,
        /// Abort the body with a transport error after the last chunk
        truncate: bool,
    },
    /// Fail before any response arrives.
    ConnectionError(String),
}

impl MockReply {
    pub fn json(status: u16, body: impl Into<Vec<u8>>) -> Self {
        MockReply::Respond {
            status,
            body: body.into(),
            chunk_size: 1024,
            truncate: false,
        }
    }

    pub fn chunked(status: u16, body: impl Into<Vec<u8>>, chunk_size: usize) -> Self {
        MockReply::Respond {
            status,
            body: body.into(),
            chunk_size: chunk_size.max(1),
            truncate: false,
        }
    }

    /// Success status whose body breaks off after `body`.
    pub fn truncated(body: impl Into<Vec<u8>>) -> Self {
        MockReply::Respond {
            status: 200,
            body: body.into(),
            chunk_size: 64,
            truncate: true,
        }
    }
}

struct MockRoute {
    method: Method,
    url_fragment: String,
    reply: MockReply,
}

/// A scripted [`HttpClient`] for testing.
///
/// Routes match on method and a URL substring; the first matching route
/// answers. Every request is recorded.
#[derive(Default)]
pub struct MockHttpClient {
    routes: Mutex<Vec<MockRoute>>,
    requests: Mutex<VecDeque<HttpRequest>>,
    delay: Mutex<Option<Duration>>,
}

impl MockHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a reply for requests whose URL contains `url_fragment`.
    pub fn on(&self, method: Method, url_fragment: &str, reply: MockReply) {
        lock(&self.routes).push(MockRoute {
            method,
            url_fragment: url_fragment.to_string(),
            reply,
        });
    }

    /// Delay every response by `delay`.
    pub fn set_delay(&self, delay: Duration) {
        *lock(&self.delay) = Some(delay);
    }

    /// Requests seen so far, oldest first.
    pub fn requests(&self) -> Vec<HttpRequest> {
        lock(&self.requests).iter().cloned().collect()
    }

    pub fn request_count(&self, url_fragment: &str) -> usize {
        lock(&self.requests)
            .iter()
            .filter(|r| r.url.contains(url_fragment))
            .count()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl HttpClient for MockHttpClient {
    async fn execute(&self, request: HttpRequest) -> SyncResult<HttpResponse> {
        let reply = lock(&self.routes)
            .iter()
            .find(|route| route.method == request.method && request.url.contains(&route.url_fragment))
            .map(|route| route.reply.clone());
        lock(&self.requests).push_back(request.clone());

        let delay = *lock(&self.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        match reply {
            None => Ok(HttpResponse {
                status: 404,
                body: Box::pin(futures::stream::empty()),
            }),
            Some(MockReply::ConnectionError(msg)) => Err(SyncError::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                msg,
            ))),
            Some(MockReply::Respond {
                status,
                body,
                chunk_size,
                truncate,
            }) => {
                let mut chunks: Vec<SyncResult<Bytes>> = body
                    .chunks(chunk_size)
                    .map(|c| Ok(Bytes::copy_from_slice(c)))
                    .collect();
                if truncate {
                    chunks.push(Err(SyncError::Io(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "connection closed mid-body",
                    ))));
                }
                Ok(HttpResponse {
                    status,
                    body: Box::pin(futures::stream::iter(chunks)),
                })
            }
        }
    }
}
