//! Per-step coordination state.
//!
//! Exactly two [`StepSlot`]s exist at any time, `current` and `next`. A slot
//! bundles the bucket map for its step with the channel its results come back
//! on and the set of keys already dispatched. At the step boundary the merged
//! result map is installed, `next` is promoted to `current`, and a fresh
//! `next` is allocated. The promoted slot keeps its channel and in-flight
//! set, which is what lets lookahead dispatches from the previous step land
//! in the right place.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use petri_core::{BucketKey, BucketMap};
use petri_wire::ReturnedBatch;

/// Buffering of a slot's result channel. Returns beyond this simply make the
/// sending dispatch task wait until the consumer catches up.
const RESULT_CHANNEL_CAPACITY: usize = 1024;

/// Shared handle to a slot's set of already-dispatched keys.
///
/// The current slot's set is read by the dispatch loop; the next slot's set
/// is written by the result consumer. Those are different parties on
/// different slots, so a plain mutex with short critical sections is enough.
#[derive(Debug, Clone, Default)]
pub struct InflightSet(Arc<Mutex<HashSet<BucketKey>>>);

impl InflightSet {
    /// Mark a key dispatched. Returns false if it already was.
    pub fn insert(&self, key: BucketKey) -> bool {
        self.0.lock().unwrap().insert(key)
    }

    pub fn contains(&self, key: &BucketKey) -> bool {
        self.0.lock().unwrap().contains(key)
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().unwrap().is_empty()
    }
}

pub struct StepSlot {
    pub buckets: BucketMap,
    result_tx: Option<mpsc::Sender<ReturnedBatch>>,
    result_rx: Option<mpsc::Receiver<ReturnedBatch>>,
    inflight: InflightSet,
}

impl StepSlot {
    fn new(width: u32) -> Self {
        let (tx, rx) = mpsc::channel(RESULT_CHANNEL_CAPACITY);
        Self {
            buckets: BucketMap::new(width),
            result_tx: Some(tx),
            result_rx: Some(rx),
            inflight: InflightSet::default(),
        }
    }

    /// A sender for dispatch tasks targeting this slot. Every outstanding
    /// dispatch holds one; the slot's own handle is dropped once the step's
    /// dispatch loop is done, so the receiver closes exactly when the last
    /// dispatch reports in.
    pub fn result_sender(&self) -> mpsc::Sender<ReturnedBatch> {
        self.result_tx
            .as_ref()
            .expect("slot result sender already closed")
            .clone()
    }

    /// Take the receiving end for this step's result consumer.
    pub(crate) fn take_receiver(&mut self) -> mpsc::Receiver<ReturnedBatch> {
        self.result_rx
            .take()
            .expect("slot result receiver already taken")
    }

    /// Drop the slot's own sender handle (see [`Self::result_sender`]).
    pub(crate) fn close_sender(&mut self) {
        self.result_tx = None;
    }

    pub fn mark_inflight(&self, key: BucketKey) -> bool {
        self.inflight.insert(key)
    }

    pub fn is_inflight(&self, key: &BucketKey) -> bool {
        self.inflight.contains(key)
    }

    pub fn inflight_handle(&self) -> InflightSet {
        self.inflight.clone()
    }
}

pub struct SimulationState {
    current: StepSlot,
    next: StepSlot,
    time_step: u64,
    width: u32,
}

impl SimulationState {
    pub fn new(initial: BucketMap, time_step: u64) -> Self {
        let width = initial.width();
        let mut current = StepSlot::new(width);
        current.buckets = initial;
        Self {
            current,
            next: StepSlot::new(width),
            time_step,
            width,
        }
    }

    pub fn current(&self) -> &StepSlot {
        &self.current
    }

    pub fn current_mut(&mut self) -> &mut StepSlot {
        &mut self.current
    }

    pub fn next(&self) -> &StepSlot {
        &self.next
    }

    pub fn time_step(&self) -> u64 {
        self.time_step
    }

    pub fn total_cells(&self) -> usize {
        self.current.buckets.cell_count()
    }

    pub fn advance_time(&mut self) {
        self.time_step += 1;
    }

    /// Step boundary: install the merged result as the next slot's bucket
    /// map, promote `next` to `current` (keeping its channel and in-flight
    /// set), and allocate a fresh empty `next`. The scheduler is the only
    /// caller and calls strictly once per step.
    pub fn cycle(&mut self, merged: BucketMap) {
        let mut promoted = std::mem::replace(&mut self.next, StepSlot::new(self.width));
        promoted.buckets = merged;
        self.current = promoted;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use petri_core::Cell;

    fn three_cell_map() -> BucketMap {
        BucketMap::build(
            vec![
                Cell::at(1.0, 1.0, 1.0),
                Cell::at(2.0, 2.0, 2.0),
                Cell::at(11.0, 1.0, 1.0),
            ],
            10,
        )
    }

    #[test]
    fn cycle_installs_merged_map_and_allocates_fresh_next() {
        let mut state = SimulationState::new(three_cell_map(), 0);
        assert!(state.next().mark_inflight(BucketKey::new(0, 0, 0)));
        assert!(!state.next().mark_inflight(BucketKey::new(0, 0, 0)));

        let merged = BucketMap::build(vec![Cell::at(5.0, 5.0, 5.0)], 10);
        state.cycle(merged.clone());

        assert_eq!(state.current().buckets, merged);
        // The promoted slot keeps its in-flight markings.
        assert!(state.current().is_inflight(&BucketKey::new(0, 0, 0)));
        // The fresh next slot is empty on all axes.
        assert!(state.next().buckets.is_empty());
        assert!(state.next().inflight_handle().is_empty());
    }

    #[test]
    fn advance_time_is_explicit() {
        let mut state = SimulationState::new(three_cell_map(), 41);
        state.cycle(BucketMap::new(10));
        assert_eq!(state.time_step(), 41);
        state.advance_time();
        assert_eq!(state.time_step(), 42);
    }

    #[test]
    fn inflight_insert_reports_duplicates() {
        let set = InflightSet::default();
        assert!(set.insert(BucketKey::new(1, 2, 3)));
        assert!(!set.insert(BucketKey::new(1, 2, 3)));
        assert!(set.contains(&BucketKey::new(1, 2, 3)));
        assert_eq!(set.len(), 1);
    }

    #[tokio::test]
    async fn receiver_closes_when_all_senders_drop() {
        let mut state = SimulationState::new(three_cell_map(), 0);
        let tx = state.current().result_sender();
        let mut rx = state.current_mut().take_receiver();
        state.current_mut().close_sender();

        tx.send(petri_wire::ReturnedBatch {
            cells_to_compute: Vec::new(),
            batch_key: BucketKey::new(0, 0, 0),
        })
        .await
        .unwrap();
        drop(tx);

        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_none(), "channel should be closed");
    }
}
