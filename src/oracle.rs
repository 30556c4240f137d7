//! The future-reference oracle Bélády consults: "when does this object next
//! appear in the trace?" Declared as an async trait because a real oracle
//! could be backed by an indexed external source rather than an in-memory
//! table (§4.3).

use crate::request::{ObjectId, Request};
use async_trait::async_trait;
use std::collections::HashMap;

/// Abstract "next reference" lookup over the full ordered trace.
#[async_trait]
pub trait FutureOracle: Send + Sync {
    /// The first occurrence of `object_id` strictly after `after_position`,
    /// as `(timestamp, trace_position)`, or `None` if it never recurs.
    async fn next_reference(&self, object_id: &ObjectId, after_position: u64) -> Option<(f64, u64)>;
}

/// Reference oracle: precomputes, once per trace, a sorted
/// `(trace_position, timestamp)` list per object id, and answers each query
/// with a binary search — O(log k) against the k occurrences of that id.
pub struct InMemoryOracle {
    occurrences: HashMap<ObjectId, Vec<(u64, f64)>>,
}

impl InMemoryOracle {
    /// Builds the oracle from the full trace. `records` must already be in
    /// non-decreasing `trace_position` order; this is true of any trace
    /// produced by [`crate::trace_source::TraceSource`].
    pub fn build(records: &[Request]) -> Self {
        let mut occurrences: HashMap<ObjectId, Vec<(u64, f64)>> = HashMap::new();
        for record in records {
            occurrences
                .entry(record.object_id.clone())
                .or_default()
                .push((record.trace_position, record.timestamp));
        }
        Self { occurrences }
    }
}

#[async_trait]
impl FutureOracle for InMemoryOracle {
    async fn next_reference(&self, object_id: &ObjectId, after_position: u64) -> Option<(f64, u64)> {
        let occurrences = self.occurrences.get(object_id)?;
        let idx = occurrences.partition_point(|&(pos, _)| pos <= after_position);
        occurrences.get(idx).map(|&(pos, ts)| (ts, pos))
    }
}

/// An oracle with no future knowledge (every lookup misses). Useful for
/// testing how the other policies behave absent Bélády's advantage, and as
/// a trivial stand-in when a trace is consumed incrementally and no
/// lookahead is available.
pub struct NoLookaheadOracle;

#[async_trait]
impl FutureOracle for NoLookaheadOracle {
    async fn next_reference(&self, _object_id: &ObjectId, _after_position: u64) -> Option<(f64, u64)> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::UNGROUPED;

    fn req(pos: u64, ts: f64, id: i64) -> Request {
        Request {
            timestamp: ts,
            object_id: ObjectId::Int(id),
            size: 10,
            maxage: 300,
            group_id: UNGROUPED,
            trace_position: pos,
        }
    }

    #[tokio::test]
    async fn finds_the_next_occurrence_after_a_position() {
        let trace = vec![req(0, 0.0, 1), req(1, 1.0, 2), req(2, 5.0, 1), req(3, 9.0, 1)];
        let oracle = InMemoryOracle::build(&trace);
        let next = oracle.next_reference(&ObjectId::Int(1), 0).await;
        assert_eq!(next, Some((5.0, 2)));
        let next = oracle.next_reference(&ObjectId::Int(1), 2).await;
        assert_eq!(next, Some((9.0, 3)));
    }

    #[tokio::test]
    async fn returns_none_past_the_last_occurrence() {
        let trace = vec![req(0, 0.0, 1)];
        let oracle = InMemoryOracle::build(&trace);
        assert_eq!(oracle.next_reference(&ObjectId::Int(1), 0).await, None);
    }
}
