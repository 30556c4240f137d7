//! The ingestion boundary (§4.6, §1): an external collaborator that yields
//! the ordered trace in chunks. A real deployment would back this with a
//! paginated search-index scroll/point-in-time cursor; this crate ships a
//! file/stdin-backed implementation with the same shape so the rest of the
//! pipeline never has to know the difference.

use crate::error::{Result, SimError};
use crate::request::{Request, UNGROUPED};
use async_trait::async_trait;
use serde::Deserialize;
use std::io::BufRead;
use std::path::Path;

/// A batch of ordered records handed to the replay driver in one step.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub requests: Vec<Request>,
}

/// The ingestion-boundary trait. `next_chunk` returns `Ok(None)` at normal
/// end of stream; an `Err` is always fatal to the run (§7).
#[async_trait]
pub trait TraceSource: Send {
    async fn next_chunk(&mut self) -> Result<Option<Chunk>>;
}

/// Wire shape of one record before the §7 coercions are applied: `maxage`
/// and `group_id` may be absent.
#[derive(Debug, Deserialize)]
struct RawRecord {
    timestamp: f64,
    object_id: crate::request::ObjectId,
    size: u64,
    maxage: Option<u64>,
    group_id: Option<i64>,
    #[serde(default)]
    trace_position: Option<u64>,
}

/// Reads newline-delimited JSON request records from a file or stdin,
/// batching `chunk_size` records per [`Chunk`]. Stands in for a paginated
/// external index client (§4.6) without assuming a live cluster.
pub struct JsonlTraceSource {
    lines: Box<dyn Iterator<Item = std::io::Result<String>> + Send>,
    default_maxage: u64,
    chunk_size: usize,
    next_position: u64,
    exhausted: bool,
}

impl JsonlTraceSource {
    pub fn from_path(path: impl AsRef<Path>, default_maxage: u64, chunk_size: usize) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        Ok(Self::new(Box::new(reader.lines()), default_maxage, chunk_size))
    }

    pub fn from_stdin(default_maxage: u64, chunk_size: usize) -> Self {
        let stdin = std::io::stdin();
        let reader = std::io::BufReader::new(stdin);
        Self::new(Box::new(reader.lines()), default_maxage, chunk_size)
    }

    fn new(lines: Box<dyn Iterator<Item = std::io::Result<String>> + Send>, default_maxage: u64, chunk_size: usize) -> Self {
        Self {
            lines,
            default_maxage,
            chunk_size,
            next_position: 0,
            exhausted: false,
        }
    }

    fn coerce(&mut self, raw: RawRecord) -> Request {
        let trace_position = raw.trace_position.unwrap_or(self.next_position);
        self.next_position = trace_position + 1;
        Request {
            timestamp: raw.timestamp,
            object_id: raw.object_id,
            size: raw.size,
            maxage: raw.maxage.unwrap_or(self.default_maxage),
            group_id: raw.group_id.unwrap_or(UNGROUPED),
            trace_position,
        }
    }
}

#[async_trait]
impl TraceSource for JsonlTraceSource {
    async fn next_chunk(&mut self) -> Result<Option<Chunk>> {
        if self.exhausted {
            return Ok(None);
        }
        let mut requests = Vec::with_capacity(self.chunk_size);
        while requests.len() < self.chunk_size {
            match self.lines.next() {
                Some(Ok(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    let raw: RawRecord = serde_json::from_str(line)?;
                    requests.push(self.coerce(raw));
                }
                Some(Err(e)) => return Err(SimError::Ingestion(e.to_string())),
                None => {
                    self.exhausted = true;
                    break;
                }
            }
        }
        if requests.is_empty() {
            Ok(None)
        } else {
            Ok(Some(Chunk { requests }))
        }
    }
}

/// An in-memory trace source, mainly useful for tests and for embedding
/// this crate where the whole trace already fits in memory.
pub struct InMemoryTraceSource {
    requests: std::vec::IntoIter<Request>,
    chunk_size: usize,
}

impl InMemoryTraceSource {
    pub fn new(requests: Vec<Request>, chunk_size: usize) -> Self {
        Self {
            requests: requests.into_iter(),
            chunk_size: chunk_size.max(1),
        }
    }
}

#[async_trait]
impl TraceSource for InMemoryTraceSource {
    async fn next_chunk(&mut self) -> Result<Option<Chunk>> {
        let mut requests = Vec::with_capacity(self.chunk_size);
        for _ in 0..self.chunk_size {
            match self.requests.next() {
                Some(r) => requests.push(r),
                None => break,
            }
        }
        if requests.is_empty() {
            Ok(None)
        } else {
            Ok(Some(Chunk { requests }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::ObjectId;

    fn req(pos: u64) -> Request {
        Request {
            timestamp: pos as f64,
            object_id: ObjectId::Int(pos as i64),
            size: 10,
            maxage: 300,
            group_id: UNGROUPED,
            trace_position: pos,
        }
    }

    #[tokio::test]
    async fn in_memory_source_batches_by_chunk_size() {
        let mut source = InMemoryTraceSource::new(vec![req(0), req(1), req(2)], 2);
        let first = source.next_chunk().await.unwrap().unwrap();
        assert_eq!(first.requests.len(), 2);
        let second = source.next_chunk().await.unwrap().unwrap();
        assert_eq!(second.requests.len(), 1);
        assert!(source.next_chunk().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn jsonl_source_applies_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        use std::io::Write;
        writeln!(file, r#"{{"timestamp":0.0,"object_id":1,"size":10}}"#).unwrap();
        writeln!(file, r#"{{"timestamp":1.0,"object_id":"movie-2","size":20,"maxage":60,"group_id":5}}"#).unwrap();
        let mut source = JsonlTraceSource::from_path(file.path(), 300, 10).unwrap();
        let chunk = source.next_chunk().await.unwrap().unwrap();
        assert_eq!(chunk.requests.len(), 2);
        assert_eq!(chunk.requests[0].maxage, 300);
        assert_eq!(chunk.requests[0].group_id, UNGROUPED);
        assert_eq!(chunk.requests[1].maxage, 60);
        assert_eq!(chunk.requests[1].group_id, 5);
        assert!(source.next_chunk().await.unwrap().is_none());
    }
}
