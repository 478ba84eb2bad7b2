use futures::{Stream, StreamExt};
use serde::Deserialize;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};
use validator::Validate;

use crate::{
    metrics, Connection, Document, Expander, Modifier, ModifierChain, QueryEvent, QueryHandle, Row,
    RowTransformer, SourceError, StreamOptions, TransformError, MAX_ARRAY_INDEX,
};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Required: sql_string or table_name")]
    MissingQuery,
    #[error("Invalid exporter options: {0}")]
    Invalid(#[from] validator::ValidationErrors),
    #[error("Query could not be started: {0}")]
    Query(#[from] SourceError),
}

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error(transparent)]
    Transform(#[from] TransformError),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("The export query has already been consumed")]
    QueryConsumed,
    #[error("The exporter has been destroyed")]
    Destroyed,
}

/// Exporter settings. Fixed once the exporter is built.
///
/// The row source is picked in this order: a pre-built `query`, then a
/// non-empty `sql_string`, then a non-empty `table_name` (with optional
/// `limit`). Fields of a source that is not picked are never looked at.
#[derive(Deserialize, Validate)]
#[serde(default, rename_all = "camelCase")]
pub struct ExporterOptions {
    pub convert_true_false: bool,
    #[validate(length(min = 1))]
    pub dot_separator: String,
    pub expand: bool,
    pub keep_nulls: bool,
    /// Tried before the built-in modifiers.
    #[serde(skip)]
    pub modifiers: Vec<Arc<dyn Modifier>>,
    #[serde(skip)]
    pub query: Option<Box<dyn QueryHandle>>,
    pub sql_string: Option<String>,
    pub table_name: Option<String>,
    pub limit: Option<u64>,
    /// Largest array index expansion will create.
    pub max_array_index: usize,
    /// Capacity of the push-mode event channel.
    #[validate(range(min = 1))]
    pub event_buffer: usize,
}

impl Default for ExporterOptions {
    fn default() -> Self {
        Self {
            convert_true_false: false,
            dot_separator: ".".to_string(),
            expand: false,
            keep_nulls: false,
            modifiers: Vec::new(),
            query: None,
            sql_string: None,
            table_name: None,
            limit: None,
            max_array_index: MAX_ARRAY_INDEX,
            event_buffer: 1,
        }
    }
}

impl ExporterOptions {
    pub fn from_sql(sql: impl Into<String>) -> Self {
        Self {
            sql_string: Some(sql.into()),
            ..Default::default()
        }
    }

    pub fn from_table(table: impl Into<String>, limit: Option<u64>) -> Self {
        Self {
            table_name: Some(table.into()),
            limit,
            ..Default::default()
        }
    }

    pub fn from_query(query: Box<dyn QueryHandle>) -> Self {
        Self {
            query: Some(query),
            ..Default::default()
        }
    }

    pub fn with_modifier(mut self, modifier: Arc<dyn Modifier>) -> Self {
        self.modifiers.push(modifier);
        self
    }

    fn resolve_sql(&self, connection: &dyn Connection) -> Option<String> {
        if let Some(sql) = self.sql_string.as_deref().filter(|s| !s.is_empty()) {
            return Some(sql.to_string());
        }
        self.table_name
            .as_deref()
            .filter(|t| !t.is_empty())
            .map(|table| select_all(connection, table, self.limit))
    }
}

impl fmt::Debug for ExporterOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExporterOptions")
            .field("convert_true_false", &self.convert_true_false)
            .field("dot_separator", &self.dot_separator)
            .field("expand", &self.expand)
            .field("keep_nulls", &self.keep_nulls)
            .field("modifiers", &self.modifiers.len())
            .field("query", &self.query.is_some())
            .field("sql_string", &self.sql_string)
            .field("table_name", &self.table_name)
            .field("limit", &self.limit)
            .field("max_array_index", &self.max_array_index)
            .field("event_buffer", &self.event_buffer)
            .finish()
    }
}

/// `SELECT * FROM <table>[ LIMIT n]` with the table quoted by the connection.
pub fn select_all(connection: &dyn Connection, table: &str, limit: Option<u64>) -> String {
    let limit = limit.map(|n| format!(" LIMIT {}", n)).unwrap_or_default();
    format!("SELECT * FROM {}{}", connection.escape_identifier(table), limit)
}

#[derive(Debug)]
pub enum ExportEvent {
    Data(Document),
    Error(ExportError),
    /// Sent once, after the last row. Nothing follows it.
    End,
}

/// Push-mode event feed returned by [`Exporter::start`].
///
/// Dropping it stops the background export task.
pub struct ExportEvents {
    rx: mpsc::Receiver<ExportEvent>,
    task: JoinHandle<()>,
}

impl ExportEvents {
    pub async fn recv(&mut self) -> Option<ExportEvent> {
        self.rx.recv().await
    }
}

impl Stream for ExportEvents {
    type Item = ExportEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for ExportEvents {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Pull-mode output of [`Exporter::stream`]. Ends after the first error.
pub type DocumentStream = Pin<Box<dyn Stream<Item = Result<Document, ExportError>> + Send>>;

/// Turns the rows of one query into independent documents.
pub struct Exporter {
    connection: Option<Arc<dyn Connection>>,
    transformer: Option<Arc<RowTransformer>>,
    options: Option<ExporterOptions>,
    query: Option<Box<dyn QueryHandle>>,
}

impl Exporter {
    /// Builds the modifier chain and expansion step, and starts (without
    /// consuming) the query unless a pre-built one was supplied.
    #[instrument(skip_all)]
    pub fn new(connection: Arc<dyn Connection>, mut options: ExporterOptions) -> Result<Self, ConfigError> {
        options.validate()?;

        let chain = ModifierChain::new(
            std::mem::take(&mut options.modifiers),
            options.keep_nulls,
            options.convert_true_false,
        );
        let expander = options
            .expand
            .then(|| Expander::new(options.dot_separator.clone()).with_max_index(options.max_array_index));

        let query = match options.query.take() {
            Some(query) => query,
            None => {
                let sql = options
                    .resolve_sql(connection.as_ref())
                    .ok_or(ConfigError::MissingQuery)?;
                debug!(%sql, "Starting export query");
                connection.query(&sql)?
            }
        };

        debug!(modifiers = chain.len(), expand = options.expand, "Exporter ready");
        Ok(Self {
            connection: Some(connection),
            transformer: Some(Arc::new(RowTransformer::new(chain, expander))),
            options: Some(options),
            query: Some(query),
        })
    }

    pub fn options(&self) -> Option<&ExporterOptions> {
        self.options.as_ref()
    }

    /// Applies the modifier chain and expansion to a single row.
    pub fn transform(&self, row: Row) -> Result<Document, ExportError> {
        let transformer = self.transformer.as_ref().ok_or(ExportError::Destroyed)?;
        Ok(transformer.transform(row)?)
    }

    fn parts(&self) -> Result<(Arc<dyn Connection>, Arc<RowTransformer>), ExportError> {
        match (&self.connection, &self.transformer) {
            (Some(connection), Some(transformer)) => Ok((connection.clone(), transformer.clone())),
            _ => Err(ExportError::Destroyed),
        }
    }

    /// Push mode. Spawns a task that pauses the connection around every row,
    /// emits `Data` or `Error`, resumes, and finally emits `End`.
    pub fn start(&mut self) -> Result<ExportEvents, ExportError> {
        let (connection, transformer) = self.parts()?;
        let query = self.query.take().ok_or(ExportError::QueryConsumed)?;
        let capacity = self.options.as_ref().map_or(1, |o| o.event_buffer.max(1));

        let (tx, rx) = mpsc::channel(capacity);
        let task = tokio::spawn(pump_events(query, connection, transformer, tx));
        Ok(ExportEvents { rx, task })
    }

    /// Pull mode. Flow control is left to the row stream; the first error
    /// is yielded and ends the stream.
    pub fn stream(&mut self, options: StreamOptions) -> Result<DocumentStream, ExportError> {
        let (_, transformer) = self.parts()?;
        let query = self.query.take().ok_or(ExportError::QueryConsumed)?;
        let mut rows = query.into_rows(options);

        Ok(Box::pin(async_stream::stream! {
            while let Some(item) = rows.next().await {
                let result = match item {
                    Ok(row) => transformer.transform(row).map_err(|e| {
                        metrics::transform_failed();
                        ExportError::from(e)
                    }),
                    Err(e) => {
                        metrics::source_failed();
                        Err(ExportError::from(e))
                    }
                };
                match result {
                    Ok(doc) => {
                        metrics::document_exported();
                        yield Ok(doc);
                    }
                    Err(e) => {
                        warn!("Export stream failed: {}", e);
                        yield Err(e);
                        break;
                    }
                }
            }
        }))
    }

    /// Drops every reference the exporter holds. A task started by
    /// [`Exporter::start`] keeps running until its source ends.
    pub fn destroy(&mut self) {
        self.connection = None;
        self.transformer = None;
        self.options = None;
        self.query = None;
        debug!("Exporter destroyed");
    }

    pub fn is_destroyed(&self) -> bool {
        self.transformer.is_none()
    }
}

/// Resumes the connection when dropped, so no exit path leaves it paused.
struct PauseGuard<'a> {
    connection: &'a dyn Connection,
}

impl<'a> PauseGuard<'a> {
    fn pause(connection: &'a dyn Connection) -> Self {
        connection.pause();
        Self { connection }
    }
}

impl Drop for PauseGuard<'_> {
    fn drop(&mut self) {
        self.connection.resume();
    }
}

async fn pump_events(
    mut query: Box<dyn QueryHandle>,
    connection: Arc<dyn Connection>,
    transformer: Arc<RowTransformer>,
    tx: mpsc::Sender<ExportEvent>,
) {
    let mut upstream_failed = false;
    loop {
        match query.next_event().await {
            QueryEvent::Result(row) => {
                let _paused = PauseGuard::pause(connection.as_ref());
                let event = match transformer.transform(row) {
                    Ok(doc) => {
                        metrics::document_exported();
                        ExportEvent::Data(doc)
                    }
                    Err(e) => {
                        metrics::transform_failed();
                        warn!("Row could not be exported: {}", e);
                        ExportEvent::Error(e.into())
                    }
                };
                if tx.send(event).await.is_err() {
                    debug!("Event receiver dropped, stopping export");
                    return;
                }
            }
            QueryEvent::Error(e) => {
                metrics::source_failed();
                if upstream_failed {
                    warn!("Dropping repeated row source error: {}", e);
                    continue;
                }
                upstream_failed = true;
                warn!("Row source reported an error: {}", e);
                if tx.send(ExportEvent::Error(e.into())).await.is_err() {
                    return;
                }
            }
            QueryEvent::End => {
                drop(query);
                debug!("Row source finished");
                let _ = tx.send(ExportEvent::End).await;
                return;
            }
        }
    }
}
