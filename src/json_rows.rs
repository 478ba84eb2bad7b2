use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use memchr::memchr;
use std::time::Duration;
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    time::timeout,
};
use tracing::{debug, instrument, warn};

use crate::{FlowGate, QueryEvent, QueryHandle, Row, RowStream, SourceError, StreamOptions};

pub struct JsonRowConfig {
    pub buffer_size: usize,
    /// Largest number of bytes a single row may occupy before it is rejected.
    pub max_buffer_size: usize,
    pub read_timeout: Option<Duration>,
}

impl Default for JsonRowConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1024,
            max_buffer_size: 1024 * 1024,
            read_timeout: None,
        }
    }
}

/// A query handle that reads rows as JSON objects from a byte feed.
///
/// Accepts NDJSON, back-to-back objects, or a top-level array of objects;
/// anything between objects is ignored. A malformed object is reported as an
/// upstream error and reading continues with the next one.
pub struct JsonRowQuery<R> {
    reader: R,
    buffer: BytesMut,
    config: JsonRowConfig,
    gate: Option<FlowGate>,
    finished: bool,
}

impl<R: AsyncRead + Unpin + Send> JsonRowQuery<R> {
    pub fn new(reader: R) -> Self {
        Self::with_config(reader, JsonRowConfig::default())
    }

    pub fn with_config(reader: R, config: JsonRowConfig) -> Self {
        Self {
            reader,
            buffer: BytesMut::with_capacity(config.buffer_size),
            config,
            gate: None,
            finished: false,
        }
    }

    /// Holds rows back while `gate` is paused.
    pub fn with_gate(mut self, gate: FlowGate) -> Self {
        self.gate = Some(gate);
        self
    }

    #[instrument(skip(self))]
    async fn fill_buffer(&mut self) -> Result<usize, SourceError> {
        self.buffer.reserve(self.config.buffer_size);
        let read_fut = self.reader.read_buf(&mut self.buffer);
        let bytes_read = match self.config.read_timeout {
            Some(t) => timeout(t, read_fut).await.map_err(|_| SourceError::Timeout)??,
            None => read_fut.await?,
        };
        Ok(bytes_read)
    }

    /// Reads the next row, or `None` once the feed is exhausted.
    pub async fn next_row(&mut self) -> Option<Result<Row, SourceError>> {
        if self.finished {
            return None;
        }
        loop {
            if let Some((start, end)) = find_object(&self.buffer) {
                let mut bytes = self.buffer[start..end].to_vec();
                self.buffer.advance(end);
                debug!("Found row candidate of {} bytes", bytes.len());
                return Some(simd_json::serde::from_slice::<Row>(&mut bytes).map_err(|e| {
                    warn!("Skipping malformed row: {}", e);
                    SourceError::from(e)
                }));
            }

            match memchr(b'{', &self.buffer) {
                // Nothing but separators or noise so far.
                None => self.buffer.clear(),
                Some(start) => self.buffer.advance(start),
            }
            if self.buffer.len() > self.config.max_buffer_size {
                self.finished = true;
                return Some(Err(SourceError::RowTooLarge(self.config.max_buffer_size)));
            }

            match self.fill_buffer().await {
                Ok(0) => {
                    self.finished = true;
                    if self.buffer.is_empty() {
                        return None;
                    }
                    return Some(Err(SourceError::Truncated));
                }
                Ok(_) => continue,
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send + 'static> QueryHandle for JsonRowQuery<R> {
    async fn next_event(&mut self) -> QueryEvent {
        if let Some(gate) = &self.gate {
            gate.opened().await;
        }
        match self.next_row().await {
            Some(Ok(row)) => QueryEvent::Result(row),
            Some(Err(e)) => QueryEvent::Error(e),
            None => QueryEvent::End,
        }
    }

    /// Reads on demand, so `high_water_mark` has nothing to bound here.
    fn into_rows(self: Box<Self>, _options: StreamOptions) -> RowStream {
        let mut query = *self;
        Box::pin(async_stream::stream! {
            while let Some(item) = query.next_row().await {
                yield item;
            }
        })
    }
}

/// Locates the first complete `{...}` object, honoring strings and escapes.
/// Returns the byte range of the object within `bytes`.
pub fn find_object(bytes: &[u8]) -> Option<(usize, usize)> {
    let start = memchr(b'{', bytes)?;
    let mut depth = 0u32;
    let mut in_string = false;
    let mut escape = false;

    for (i, &c) in bytes[start..].iter().enumerate() {
        match (in_string, escape, c) {
            (true, false, b'\\') => escape = true,
            (true, true, _) => escape = false,
            (true, false, b'"') => in_string = false,
            (false, _, b'"') => in_string = true,
            (false, _, b'{') => depth += 1,
            (false, _, b'}') => {
                depth -= 1;
                if depth == 0 {
                    return Some((start, start + i + 1));
                }
            }
            _ => {}
        }
    }
    None
}
