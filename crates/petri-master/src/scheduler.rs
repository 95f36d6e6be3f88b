//! The step scheduler: the pipelined dispatch engine.
//!
//! One step dispatches every current bucket to the worker fleet, merges the
//! returned (possibly relocated) cells into the next bucket map, and starts
//! dispatching next-step buckets *while the current step is still running*.
//! A bucket at `t+1` is safe to dispatch as soon as every bucket of its
//! closed neighborhood that was computed at `t` has returned: at that point
//! no further arrival can add cells to it, so its content is final even
//! though the step as a whole is not.
//!
//! The two step slots are coordinated by their result channels alone: every
//! outstanding dispatch holds a sender clone for its slot, so the consumer's
//! receive loop ends exactly when the last dispatch of the step reports in.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use petri_core::{BucketKey, BucketMap, MasterConfig};
use petri_wire::{ComputeBatch, ReturnedBatch};

use crate::broadcast::Broadcaster;
use crate::metrics::SimMetrics;
use crate::pool::WorkerPool;
use crate::snapshot::{self, Snapshot};
use crate::state::{InflightSet, SimulationState};

/// Per-attempt deadline for one compute call.
const COMPUTE_TIMEOUT: Duration = Duration::from_secs(10);

pub struct Master {
    config: MasterConfig,
    state: SimulationState,
    pool: Arc<WorkerPool>,
    metrics: SimMetrics,
    broadcaster: Broadcaster,
    shutdown: watch::Receiver<bool>,
}

impl Master {
    pub fn new(
        config: MasterConfig,
        state: SimulationState,
        pool: Arc<WorkerPool>,
        metrics: SimMetrics,
        broadcaster: Broadcaster,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            config,
            state,
            pool,
            metrics,
            broadcaster,
            shutdown,
        }
    }

    pub fn state(&self) -> &SimulationState {
        &self.state
    }

    /// Run steps until the population dies out or shutdown is signalled,
    /// then close subscribers and attempt to persist the final state.
    pub async fn run(&mut self) {
        info!(
            time_step = self.state.time_step(),
            cells = self.state.total_cells(),
            "simulation loop starting"
        );

        loop {
            if self.state.total_cells() == 0 {
                info!("no cells remaining, stopping");
                break;
            }
            if *self.shutdown.borrow() {
                info!("shutdown requested, stopping");
                break;
            }
            self.step().await;
        }

        self.broadcaster.shutdown();
        self.persist();
    }

    /// Advance the simulation by one step.
    pub async fn step(&mut self) {
        let time_step = self.state.time_step();
        self.metrics
            .observe_population(time_step, &self.state.current().buckets);

        // Everything the lookahead consumer needs from the two slots, taken
        // up front so the slots themselves stay with the scheduler.
        let live_keys: HashSet<BucketKey> =
            self.state.current().buckets.keys().copied().collect();
        let next_tx = self.state.next().result_sender();
        let next_inflight = self.state.next().inflight_handle();
        let results = self.state.current_mut().take_receiver();

        let consumer = tokio::spawn(consume_returns(
            results,
            LookaheadContext {
                pool: Arc::clone(&self.pool),
                metrics: self.metrics.clone(),
                next_tx,
                next_inflight,
                live_keys,
                width: self.config.bucket_width,
                time_step,
            },
        ));

        // Dispatch every current bucket that last step's lookahead did not
        // already cover.
        {
            let current = self.state.current();
            for (key, bucket) in current.buckets.iter() {
                if current.is_inflight(key) {
                    continue;
                }
                let batch = ComputeBatch {
                    cells_to_compute: bucket.clone(),
                    cells_in_proximity: current.buckets.proximity(key),
                    time_step,
                    batch_key: *key,
                };
                tokio::spawn(call_worker(
                    Arc::clone(&self.pool),
                    self.metrics.clone(),
                    batch,
                    current.result_sender(),
                ));
            }
        }

        // Drop the slot's own sender: from here the channel closes as soon as
        // the last outstanding dispatch (including lookahead prefetches from
        // the previous step) has reported in.
        self.state.current_mut().close_sender();

        let merged = match consumer.await {
            Ok(map) => map,
            Err(e) => {
                error!(error = %e, "result consumer failed, keeping previous state");
                return;
            }
        };

        if *self.shutdown.borrow() {
            // The outstanding calls have drained, but the step must not
            // commit: the loop exits and the pre-step state is persisted.
            warn!(time_step, "shutdown during step, discarding merged result");
            return;
        }

        self.state.cycle(merged);
        self.state.advance_time();
        info!(
            time_step = self.state.time_step(),
            cells = self.state.total_cells(),
            "step complete"
        );
        self.broadcaster
            .broadcast_population(self.state.time_step(), &self.state.current().buckets);
    }

    /// Best-effort snapshot of the current state; failure is logged only.
    fn persist(&self) {
        let snapshot = Snapshot {
            time_step: self.state.time_step(),
            cells: self.state.current().buckets.all_cells().cloned().collect(),
        };
        match snapshot::save(&self.config.states_dir, &snapshot) {
            Ok(path) => info!(path = %path.display(), "state persisted"),
            Err(e) => warn!(error = %e, "state could not be saved"),
        }
    }
}

// ── Result consumer ──────────────────────────────────────────────────

struct LookaheadContext {
    pool: Arc<WorkerPool>,
    metrics: SimMetrics,
    /// Result channel of the *next* slot, targeted by lookahead dispatches.
    next_tx: mpsc::Sender<ReturnedBatch>,
    next_inflight: InflightSet,
    /// Keys dispatched at the current step; arrivals are counted against
    /// these.
    live_keys: HashSet<BucketKey>,
    width: u32,
    time_step: u64,
}

/// Drain the current step's returns, building the next bucket map and firing
/// lookahead dispatches as neighborhoods complete. Returns the merged map
/// once the channel closes.
async fn consume_returns(
    mut results: mpsc::Receiver<ReturnedBatch>,
    ctx: LookaheadContext,
) -> BucketMap {
    let mut next_buckets = BucketMap::new(ctx.width);
    let mut arrivals: HashMap<BucketKey, usize> = HashMap::new();

    while let Some(returned) = results.recv().await {
        // Workers may move cells across bucket borders, so one return can
        // scatter over several destination buckets.
        next_buckets.merge(BucketMap::build(returned.cells_to_compute, ctx.width));

        for key in returned.batch_key.closed_neighborhood() {
            *arrivals.entry(key).or_insert(0) += 1;
            maybe_dispatch_ahead(&ctx, &next_buckets, &arrivals, key);
        }
    }

    next_buckets
}

/// Fire the lookahead dispatch for `key` if it just became safe.
///
/// Safe means: the key already has cells at the next step, and every member
/// of its closed neighborhood that was computed this step has returned.
/// Empty neighbors were never dispatched and cannot contribute, so they are
/// complete by definition; an isolated bucket fires right after its own
/// return.
fn maybe_dispatch_ahead(
    ctx: &LookaheadContext,
    next_buckets: &BucketMap,
    arrivals: &HashMap<BucketKey, usize>,
    key: BucketKey,
) {
    let Some(bucket) = next_buckets.get(&key) else {
        return;
    };

    let needed = key
        .closed_neighborhood()
        .iter()
        .filter(|k| ctx.live_keys.contains(k))
        .count();
    if arrivals.get(&key).copied().unwrap_or(0) < needed {
        return;
    }

    // First writer wins; a false return means an earlier arrival already
    // dispatched this key.
    if !ctx.next_inflight.insert(key) {
        return;
    }

    let batch = ComputeBatch {
        cells_to_compute: bucket.to_vec(),
        cells_in_proximity: next_buckets.proximity(&key),
        time_step: ctx.time_step + 1,
        batch_key: key,
    };
    tokio::spawn(call_worker(
        Arc::clone(&ctx.pool),
        ctx.metrics.clone(),
        batch,
        ctx.next_tx.clone(),
    ));
}

// ── RPC dispatch ─────────────────────────────────────────────────────

/// Deliver one batch to some worker, whatever it takes.
///
/// A failing client is dropped, permanently removing it from the pool, and
/// the batch is retried with the next client without a cap: an unreachable
/// fleet is a pool-population problem, not a batch problem. The task's sender
/// clone keeps the slot's result channel open until the batch lands.
async fn call_worker(
    pool: Arc<WorkerPool>,
    metrics: SimMetrics,
    batch: ComputeBatch,
    results: mpsc::Sender<ReturnedBatch>,
) {
    metrics.record_dispatch();
    loop {
        let Some(client) = pool.checkout().await else {
            warn!(key = %batch.batch_key, "worker pool closed, abandoning batch");
            return;
        };

        let started = Instant::now();
        let result = client.compute(batch.clone(), COMPUTE_TIMEOUT).await;
        metrics.record_call_duration(started.elapsed());

        match result {
            Ok(returned) => {
                pool.add(client).await;
                if results.send(returned).await.is_err() {
                    warn!(key = %batch.batch_key, "result channel gone before merge");
                }
                return;
            }
            Err(e) => {
                metrics.record_call_failure();
                warn!(
                    key = %batch.batch_key,
                    time_step = batch.time_step,
                    error = %e,
                    "compute call failed, retrying on another worker"
                );
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────
