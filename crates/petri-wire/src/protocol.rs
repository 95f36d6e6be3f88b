//! Master↔worker protocol: topics, payload types, and the compute-service
//! trait the scheduler dispatches against.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use petri_core::{BucketKey, Cell};

use crate::error::WireError;

/// Routing topics used on the wire.
pub mod topics {
    /// Unary compute call for one bucket.
    pub const COMPUTE: &str = "cells.compute";
    pub const COMPUTE_REPLY: &str = "cells.compute.reply";

    /// Inbound worker registration.
    pub const REGISTER: &str = "workers.register";
    pub const REGISTER_ACK: &str = "workers.register.ack";

    /// Streaming initial-population generation.
    pub const BIG_BANG: &str = "universe.big_bang";
    pub const BIG_BANG_CHUNK: &str = "universe.big_bang.chunk";
    pub const BIG_BANG_DONE: &str = "universe.big_bang.done";
}

// ── Payloads ─────────────────────────────────────────────────────────

/// One bucket's worth of work for a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputeBatch {
    /// The cells the worker must advance by one step.
    pub cells_to_compute: Vec<Cell>,
    /// Every cell in the 26 surrounding buckets, visible but not advanced.
    pub cells_in_proximity: Vec<Cell>,
    pub time_step: u64,
    /// Origin bucket, echoed back unchanged in the reply.
    pub batch_key: BucketKey,
}

/// A worker's answer: the advanced cells (possibly relocated out of the
/// origin bucket) plus the echoed origin key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReturnedBatch {
    pub cells_to_compute: Vec<Cell>,
    pub batch_key: BucketKey,
}

/// A worker announcing itself: where its compute socket listens and how many
/// parallel calls it is willing to serve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterWorker {
    /// `host:port` of the worker's compute ROUTER socket.
    pub address: String,
    pub threads: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterAck {
    /// Number of client slots the master actually added to its pool.
    pub accepted: u32,
}

/// Parameters for generating an initial population.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BigBangRequest {
    pub cell_amount: u32,
    /// Cells are scattered in `[-extent, extent]³`.
    pub extent: f32,
    pub min_energy: u32,
    pub max_energy: u32,
}

/// One chunk of a streamed big-bang reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CellChunk {
    pub cells: Vec<Cell>,
}

// ── Service trait ────────────────────────────────────────────────────

/// A handle to one compute slot on a worker node.
///
/// The scheduler only ever talks to workers through this trait, so tests can
/// drive it with in-process implementations. Each value represents a single
/// slot: the pool checks handles out, and a handle is used by one call at a
/// time.
#[async_trait]
pub trait ComputeService: Send + Sync {
    /// Advance one bucket by one step. The deadline covers the whole
    /// request/reply exchange; expiry surfaces as [`WireError::Timeout`].
    async fn compute(
        &self,
        batch: ComputeBatch,
        timeout: Duration,
    ) -> Result<ReturnedBatch, WireError>;

    /// Ask the worker to generate an initial population, streamed in chunks.
    /// Only network-backed clients support this.
    async fn big_bang(
        &self,
        request: BigBangRequest,
    ) -> Result<mpsc::Receiver<Result<CellChunk, WireError>>, WireError> {
        let _ = request;
        Err(WireError::Unsupported("big bang"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compute_batch_roundtrip() {
        let batch = ComputeBatch {
            cells_to_compute: vec![Cell::at(1.0, 2.0, 3.0)],
            cells_in_proximity: vec![],
            time_step: 7,
            batch_key: BucketKey::new(0, 0, 0),
        };
        let bytes = rmp_serde::to_vec(&batch).unwrap();
        let back: ComputeBatch = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(back.time_step, 7);
        assert_eq!(back.batch_key, batch.batch_key);
        assert_eq!(back.cells_to_compute, batch.cells_to_compute);
    }

    #[test]
    fn chunk_topics_share_the_stream_prefix() {
        assert!(topics::BIG_BANG_CHUNK.starts_with(topics::BIG_BANG));
        assert!(topics::BIG_BANG_DONE.starts_with(topics::BIG_BANG));
        assert!(topics::BIG_BANG_DONE.ends_with(".done"));
    }
}
