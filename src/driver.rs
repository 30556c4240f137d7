//! The replay fan-out (§4.4, §5): one trace producer feeds ordered chunks
//! to `K` independent simulator instances, each running as its own task and
//! streaming outcomes to its own analyzer task over a bounded channel.
//! End-of-stream and fatal ingestion failures are delivered in-band as
//! sentinel values so no failure can bypass a worker's shutdown path.

use crate::engine::CacheEngine;
use crate::error::{Result, SimError};
use crate::oracle::FutureOracle;
use crate::policies::PolicySpec;
use crate::request::Outcome;
use crate::trace_source::{Chunk, TraceSource};
use std::sync::Arc;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// One configured (policy, capacity) instance to replay the trace against.
#[derive(Debug, Clone)]
pub struct InstanceSpec {
    pub capacity: u64,
    pub policy: PolicySpec,
}

/// What an analyzer receives: chunked outcomes, then exactly one terminal
/// sentinel.
#[derive(Debug, Clone)]
pub enum AnalyzerMessage {
    Chunk {
        window_end_time: f64,
        outcomes: Vec<Outcome>,
        group_ids: Vec<i64>,
    },
    EndOfStream,
    Fatal(String),
}

enum ChunkMessage {
    Data(Arc<Chunk>),
    EndOfStream,
    Fatal(String),
}

/// A running replay: one receiver per instance, in the order `instances`
/// was given, labeled the way [`CacheEngine::label`] names that instance.
pub struct Replay {
    pub instances: Vec<(String, Receiver<AnalyzerMessage>)>,
    /// Completes once the trace producer and all simulator tasks have
    /// finished. Await this (or drop it) during shutdown.
    pub producer: JoinHandle<()>,
}

/// Bounds on the channels between producer/simulators/analyzers (§5). Both
/// default to a handful of chunks of backpressure headroom.
#[derive(Debug, Clone, Copy)]
pub struct ChannelBounds {
    pub chunk_channel: usize,
    pub outcome_channel: usize,
}

impl Default for ChannelBounds {
    fn default() -> Self {
        Self {
            chunk_channel: 8,
            outcome_channel: 8,
        }
    }
}

/// Starts the fan-out: spawns one simulator task per instance and one
/// producer task that drives `source` and broadcasts its chunks. Returns
/// immediately with the analyzer-facing receivers; callers attach
/// [`crate::analyzer::Analyzer`] tasks to consume them.
pub fn spawn_replay(
    mut source: Box<dyn TraceSource>,
    instances: Vec<InstanceSpec>,
    oracle: Option<Arc<dyn FutureOracle>>,
    bounds: ChannelBounds,
) -> Result<Replay> {
    let mut chunk_senders = Vec::with_capacity(instances.len());
    let mut analyzer_receivers = Vec::with_capacity(instances.len());

    for instance in instances {
        let engine = CacheEngine::new(instance.capacity, instance.policy, oracle.clone())?;
        let label = engine.label();
        let (chunk_tx, chunk_rx) = mpsc::channel::<ChunkMessage>(bounds.chunk_channel);
        let (out_tx, out_rx) = mpsc::channel::<AnalyzerMessage>(bounds.outcome_channel);
        chunk_senders.push(chunk_tx);
        analyzer_receivers.push((label.clone(), out_rx));
        tokio::spawn(run_instance(label, engine, chunk_rx, out_tx));
    }

    let producer = tokio::spawn(async move {
        loop {
            match source.next_chunk().await {
                Ok(Some(chunk)) => {
                    let chunk = Arc::new(chunk);
                    for sender in &chunk_senders {
                        if sender.send(ChunkMessage::Data(chunk.clone())).await.is_err() {
                            warn!("a simulator instance closed its channel before end of stream");
                        }
                    }
                }
                Ok(None) => {
                    info!("trace producer reached end of stream");
                    for sender in &chunk_senders {
                        let _ = sender.send(ChunkMessage::EndOfStream).await;
                    }
                    break;
                }
                Err(e) => {
                    error!(error = %e, "trace ingestion failed; propagating fatal sentinel");
                    let reason = e.to_string();
                    for sender in &chunk_senders {
                        let _ = sender.send(ChunkMessage::Fatal(reason.clone())).await;
                    }
                    break;
                }
            }
        }
    });

    Ok(Replay {
        instances: analyzer_receivers,
        producer,
    })
}

async fn run_instance(
    label: String,
    mut engine: CacheEngine,
    mut chunk_rx: Receiver<ChunkMessage>,
    out_tx: Sender<AnalyzerMessage>,
) {
    while let Some(message) = chunk_rx.recv().await {
        match message {
            ChunkMessage::Data(chunk) => {
                let mut outcomes = Vec::with_capacity(chunk.requests.len());
                let mut group_ids = Vec::with_capacity(chunk.requests.len());
                let mut window_end_time = f64::NEG_INFINITY;
                let mut failed = false;
                for request in &chunk.requests {
                    match engine.recv(request.timestamp, request.clone()).await {
                        Ok(outcome) => {
                            outcomes.push(outcome);
                            group_ids.push(request.group_id);
                            window_end_time = request.timestamp;
                        }
                        Err(e) => {
                            error!(instance = %label, error = %e, "simulator instance failed");
                            let _ = out_tx.send(AnalyzerMessage::Fatal(e.to_string())).await;
                            failed = true;
                            break;
                        }
                    }
                }
                if failed {
                    return;
                }
                if out_tx
                    .send(AnalyzerMessage::Chunk {
                        window_end_time,
                        outcomes,
                        group_ids,
                    })
                    .await
                    .is_err()
                {
                    warn!(instance = %label, "analyzer for this instance is gone; stopping early");
                    return;
                }
            }
            ChunkMessage::EndOfStream => {
                let _ = out_tx.send(AnalyzerMessage::EndOfStream).await;
                return;
            }
            ChunkMessage::Fatal(reason) => {
                let _ = out_tx.send(AnalyzerMessage::Fatal(reason)).await;
                return;
            }
        }
    }
    // The producer dropped its sender without an explicit sentinel; this is
    // a programmer error in the driver, not a legitimate ingestion outcome.
    let _ = out_tx
        .send(AnalyzerMessage::Fatal("trace producer channel closed without a sentinel".into()))
        .await;
}

/// Joins the producer task, converting a panic into the same
/// [`SimError::WorkerFailed`] shape a simulator task failure would produce.
pub async fn join_producer(replay: Replay) -> Result<()> {
    replay.producer.await.map_err(|e| SimError::WorkerFailed {
        label: "trace-producer".into(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policies::PolicyKind;
    use crate::request::{ObjectId, Request, UNGROUPED};
    use crate::trace_source::InMemoryTraceSource;

    fn req(id: i64, pos: u64) -> Request {
        Request {
            timestamp: pos as f64,
            object_id: ObjectId::Int(id),
            size: 10,
            maxage: 300,
            group_id: UNGROUPED,
            trace_position: pos,
        }
    }

    #[tokio::test]
    async fn fans_a_trace_out_to_every_instance() {
        let trace = vec![req(1, 0), req(2, 1), req(1, 2)];
        let source = Box::new(InMemoryTraceSource::new(trace, 2));
        let instances = vec![
            InstanceSpec {
                capacity: 100,
                policy: PolicySpec {
                    kind: PolicyKind::Fifo,
                    protected: false,
                    rng_seed: 1,
                },
            },
            InstanceSpec {
                capacity: 100,
                policy: PolicySpec {
                    kind: PolicyKind::Lru,
                    protected: false,
                    rng_seed: 1,
                },
            },
        ];
        let mut replay = spawn_replay(source, instances, None, ChannelBounds::default()).unwrap();
        assert_eq!(replay.instances.len(), 2);

        for (_, rx) in replay.instances.iter_mut() {
            let mut total = 0;
            loop {
                match rx.recv().await.unwrap() {
                    AnalyzerMessage::Chunk { outcomes, .. } => total += outcomes.len(),
                    AnalyzerMessage::EndOfStream => break,
                    AnalyzerMessage::Fatal(reason) => panic!("unexpected fatal: {reason}"),
                }
            }
            assert_eq!(total, 3);
        }
        join_producer(replay).await.unwrap();
    }
}
