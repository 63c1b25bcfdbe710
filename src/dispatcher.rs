//! Batched event delivery.
//!
//! The dispatcher owns the consuming side of the event queue: a
//! background thread wakes on the flush interval, drains up to a batch
//! worth of events, renders them, and hands the batch to a transport.
//! A batch that fails to deliver stays buffered and rides along with
//! the next attempt, so transient failures lose nothing. Stopping the
//! dispatcher performs a final best-effort flush.

use crate::config::TrackerConfig;
use crate::event::Event;
use crate::queue::EventQueue;
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use serde::Serialize;
use serde_json::Value;
use std::thread::{self, JoinHandle};

/// Delivery error types.
#[derive(Debug)]
pub enum TransportError {
    /// Configuration error
    Config(String),
    /// Network/HTTP error
    Network(String),
    /// Server returned an error response
    Server { status: u16, message: String },
    /// JSON serialization error
    Serialization(String),
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::Config(msg) => write!(f, "Transport config error: {msg}"),
            TransportError::Network(msg) => write!(f, "Transport network error: {msg}"),
            TransportError::Server { status, message } => {
                write!(f, "Transport server error ({status}): {message}")
            }
            TransportError::Serialization(msg) => {
                write!(f, "Transport serialization error: {msg}")
            }
        }
    }
}

impl std::error::Error for TransportError {}

/// Wire payload for one delivery: the rendered events of a batch.
#[derive(Debug, Clone, Serialize)]
pub struct BatchPayload {
    pub events: Vec<Value>,
}

/// Where batches go.
///
/// Implementations run on the dispatcher thread; delivery may block.
pub trait Transport: Send + 'static {
    fn deliver(&mut self, batch: &BatchPayload) -> Result<(), TransportError>;
}

/// Prints every event of a batch as one JSON object per line.
///
/// The dry-run default for the CLI and demos.
#[derive(Debug, Default)]
pub struct StdoutTransport;

impl Transport for StdoutTransport {
    fn deliver(&mut self, batch: &BatchPayload) -> Result<(), TransportError> {
        for event in &batch.events {
            println!("{event}");
        }
        Ok(())
    }
}

/// Async HTTP transport posting batches to a collector endpoint.
#[cfg(feature = "http")]
pub struct HttpTransport {
    endpoint: String,
    client: reqwest::Client,
}

#[cfg(feature = "http")]
impl HttpTransport {
    /// Create a transport for `endpoint`.
    pub fn new(endpoint: impl Into<String>) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| TransportError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            endpoint: endpoint.into(),
            client,
        })
    }

    /// POST one batch as JSON.
    pub async fn deliver(&self, batch: &BatchPayload) -> Result<(), TransportError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .json(batch)
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(TransportError::Server {
                status: status.as_u16(),
                message,
            });
        }

        Ok(())
    }
}

/// Blocking wrapper around [`HttpTransport`] for the dispatcher thread.
#[cfg(feature = "http")]
pub struct BlockingHttpTransport {
    inner: HttpTransport,
    runtime: tokio::runtime::Runtime,
}

#[cfg(feature = "http")]
impl BlockingHttpTransport {
    /// Create a blocking transport for `endpoint`.
    pub fn new(endpoint: impl Into<String>) -> Result<Self, TransportError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| TransportError::Config(format!("Failed to create runtime: {e}")))?;

        Ok(Self {
            inner: HttpTransport::new(endpoint)?,
            runtime,
        })
    }
}

#[cfg(feature = "http")]
impl Transport for BlockingHttpTransport {
    fn deliver(&mut self, batch: &BatchPayload) -> Result<(), TransportError> {
        self.runtime.block_on(self.inner.deliver(batch))
    }
}

struct DispatchWorker {
    queue: EventQueue<Event>,
    transport: Box<dyn Transport>,
    batch_size: usize,
    /// Rendered events from a failed delivery, waiting for a retry
    pending: Vec<Value>,
}

impl DispatchWorker {
    /// Move one batch from the queue to the transport. On failure the
    /// batch is kept for the next flush.
    fn flush(&mut self) {
        let fresh = if self.batch_size == 0 {
            self.queue.drain(0)
        } else if self.pending.len() < self.batch_size {
            self.queue.drain(self.batch_size - self.pending.len())
        } else {
            Vec::new()
        };
        self.pending
            .extend(fresh.iter().map(|event| event.to_value()));

        if self.pending.is_empty() {
            return;
        }

        let batch = BatchPayload {
            events: std::mem::take(&mut self.pending),
        };
        match self.transport.deliver(&batch) {
            Ok(()) => {
                tracing::debug!(events = batch.events.len(), "delivered batch");
            }
            Err(e) => {
                tracing::warn!(events = batch.events.len(), "delivery failed, keeping batch: {e}");
                self.pending = batch.events;
            }
        }
    }

    /// Flush batch by batch until the queue is empty or a delivery
    /// fails.
    fn flush_all(&mut self) {
        loop {
            self.flush();
            if !self.pending.is_empty() || self.queue.is_empty() {
                break;
            }
        }
    }
}

/// Background consumer delivering queue contents on a fixed cadence.
pub struct Dispatcher {
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Dispatcher {
    /// Spawn the dispatch thread. It runs until [`stop`](Self::stop)
    /// or drop, flushing every `flush_interval` from the configuration
    /// and sending at most `batch_size` events per delivery (0 = no
    /// limit).
    pub fn start(
        queue: EventQueue<Event>,
        transport: Box<dyn Transport>,
        config: &TrackerConfig,
    ) -> Self {
        let flush_interval = config.flush_interval;
        let batch_size = config.batch_size;
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let handle = thread::spawn(move || {
            let mut worker = DispatchWorker {
                queue,
                transport,
                batch_size,
                pending: Vec::new(),
            };
            loop {
                match stop_rx.recv_timeout(flush_interval) {
                    Err(RecvTimeoutError::Timeout) => worker.flush(),
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            worker.flush_all();
            if !worker.pending.is_empty() {
                tracing::warn!(
                    events = worker.pending.len(),
                    "shutting down with undelivered events"
                );
            }
        });

        Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        }
    }

    /// Stop the dispatch thread after one final flush. Idempotent;
    /// also runs on drop.
    pub fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            drop(stop_tx);
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.stop();
    }
}
