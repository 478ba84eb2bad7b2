use async_trait::async_trait;
use futures::Stream;
use serde_json::{Map, Value};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// One result row, keyed by column name in column order.
pub type Row = Map<String, Value>;

/// A transformed row, ready to be serialized by the caller.
pub type Document = Map<String, Value>;

/// Backpressure-aware sequence of rows for pull mode.
pub type RowStream = Pin<Box<dyn Stream<Item = Result<Row, SourceError>> + Send>>;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Driver error: {0}")]
    Driver(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON row error: {0}")]
    Json(#[from] simd_json::Error),
    #[error("Timeout while waiting for rows")]
    Timeout,
    #[error("Row data ended inside an unterminated object")]
    Truncated,
    #[error("Row exceeds the maximum buffered size of {0} bytes")]
    RowTooLarge(usize),
}

/// Lifecycle events of a running query, in delivery order.
#[derive(Debug)]
pub enum QueryEvent {
    Result(Row),
    Error(SourceError),
    /// Terminal. Every later call keeps returning `End`.
    End,
}

#[derive(Clone, Debug)]
pub struct StreamOptions {
    /// Number of rows the source may buffer ahead of the consumer.
    pub high_water_mark: usize,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self { high_water_mark: 16 }
    }
}

/// A started query whose results have not been consumed yet.
#[async_trait]
pub trait QueryHandle: Send {
    /// Waits for the next event. Must not yield a row while the owning
    /// connection is paused.
    async fn next_event(&mut self) -> QueryEvent;

    /// Switches the query to pull mode.
    fn into_rows(self: Box<Self>, options: StreamOptions) -> RowStream;
}

/// The driver side of an export: builds queries and throttles delivery.
pub trait Connection: Send + Sync {
    fn escape_identifier(&self, name: &str) -> String;

    fn query(&self, sql: &str) -> Result<Box<dyn QueryHandle>, SourceError>;

    /// Suspends delivery of `Result` events. Safe to call repeatedly.
    fn pause(&self);

    /// Lifts a previous `pause`. Safe to call repeatedly.
    fn resume(&self);
}

/// Quotes an identifier the way MySQL does: each `.`-separated part is
/// wrapped in backticks and inner backticks are doubled.
pub fn escape_id(name: &str) -> String {
    name.split('.')
        .map(|part| format!("`{}`", part.replace('`', "``")))
        .collect::<Vec<_>>()
        .join(".")
}

/// Shared pause/resume switch for connections and the queries they hand out.
#[derive(Clone, Debug)]
pub struct FlowGate {
    paused: Arc<watch::Sender<bool>>,
    pauses: Arc<AtomicUsize>,
    resumes: Arc<AtomicUsize>,
}

impl FlowGate {
    pub fn new() -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            paused: Arc::new(paused),
            pauses: Arc::new(AtomicUsize::new(0)),
            resumes: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn pause(&self) {
        self.pauses.fetch_add(1, Ordering::SeqCst);
        self.paused.send_replace(true);
    }

    pub fn resume(&self) {
        self.resumes.fetch_add(1, Ordering::SeqCst);
        self.paused.send_replace(false);
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    pub fn pause_count(&self) -> usize {
        self.pauses.load(Ordering::SeqCst)
    }

    pub fn resume_count(&self) -> usize {
        self.resumes.load(Ordering::SeqCst)
    }

    /// Resolves once the gate is open.
    pub async fn opened(&self) {
        let mut rx = self.paused.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|paused| !*paused).await;
    }
}

impl Default for FlowGate {
    fn default() -> Self {
        Self::new()
    }
}
