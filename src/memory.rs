use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use crate::{escape_id, Connection, FlowGate, QueryEvent, QueryHandle, Row, RowStream, SourceError, StreamOptions};

/// One canned item of a result set: a row, or an upstream failure message.
pub type MemoryItem = Result<Row, String>;

/// In-process connection serving canned result sets keyed by SQL text.
///
/// Queries honor [`Connection::pause`] through a shared [`FlowGate`], and the
/// gate's counters let callers check the pause/resume bracketing.
#[derive(Clone, Default)]
pub struct MemoryConnection {
    responses: Arc<Mutex<HashMap<String, Vec<MemoryItem>>>>,
    issued: Arc<Mutex<Vec<String>>>,
    gate: FlowGate,
}

impl MemoryConnection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the rows returned for `sql`.
    pub fn with_rows(self, sql: impl Into<String>, rows: Vec<Row>) -> Self {
        self.with_items(sql, rows.into_iter().map(Ok).collect())
    }

    /// Registers a result set that may interleave upstream errors.
    pub fn with_items(self, sql: impl Into<String>, items: Vec<MemoryItem>) -> Self {
        if let Ok(mut responses) = self.responses.lock() {
            responses.insert(sql.into(), items);
        }
        self
    }

    pub fn gate(&self) -> &FlowGate {
        &self.gate
    }

    /// SQL strings passed to [`Connection::query`], oldest first.
    pub fn issued_queries(&self) -> Vec<String> {
        self.issued.lock().map(|q| q.clone()).unwrap_or_default()
    }
}

impl Connection for MemoryConnection {
    fn escape_identifier(&self, name: &str) -> String {
        escape_id(name)
    }

    fn query(&self, sql: &str) -> Result<Box<dyn QueryHandle>, SourceError> {
        if let Ok(mut issued) = self.issued.lock() {
            issued.push(sql.to_string());
        }
        let items = self
            .responses
            .lock()
            .map_err(|_| SourceError::Driver("response table poisoned".into()))?
            .get(sql)
            .cloned()
            .ok_or_else(|| SourceError::Driver(format!("no result registered for `{}`", sql)))?;
        debug!(rows = items.len(), "Memory query started");
        Ok(Box::new(MemoryQuery {
            items: items.into(),
            gate: self.gate.clone(),
        }))
    }

    fn pause(&self) {
        self.gate.pause();
    }

    fn resume(&self) {
        self.gate.resume();
    }
}

pub struct MemoryQuery {
    items: VecDeque<MemoryItem>,
    gate: FlowGate,
}

#[async_trait]
impl QueryHandle for MemoryQuery {
    async fn next_event(&mut self) -> QueryEvent {
        self.gate.opened().await;
        match self.items.pop_front() {
            Some(Ok(row)) => QueryEvent::Result(row),
            Some(Err(message)) => QueryEvent::Error(SourceError::Driver(message)),
            None => QueryEvent::End,
        }
    }

    fn into_rows(self: Box<Self>, options: StreamOptions) -> RowStream {
        let (tx, rx) = mpsc::channel(options.high_water_mark.max(1));
        let items = self.items;
        tokio::spawn(async move {
            for item in items {
                let item = item.map_err(SourceError::Driver);
                if tx.send(item).await.is_err() {
                    debug!("Row stream consumer went away");
                    break;
                }
            }
        });
        Box::pin(ReceiverStream::new(rx))
    }
}
