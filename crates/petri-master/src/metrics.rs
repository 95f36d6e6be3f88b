//! Simulation metrics, exposed as JSON at `GET /metrics`.
//!
//! Tracks per-step population statistics, compute-call counters, the
//! live-client gauge, and a bounded per-step time series.

use std::collections::VecDeque;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use serde::Serialize;

use petri_core::BucketMap;

/// Time-series retention, in steps.
const STEP_RING_CAPACITY: usize = 512;

// ── Population statistics ────────────────────────────────────────────

/// Distribution of cells over buckets, refreshed at the top of every step.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PopulationStats {
    pub cell_count: usize,
    pub bucket_count: usize,
    pub min_bucket: usize,
    pub max_bucket: usize,
    pub mean_bucket: f64,
    pub median_bucket: f64,
}

impl PopulationStats {
    pub fn measure(map: &BucketMap) -> Self {
        let mut sizes: Vec<usize> = map.iter().map(|(_, bucket)| bucket.len()).collect();
        if sizes.is_empty() {
            return Self::default();
        }
        sizes.sort_unstable();

        let cell_count = sizes.iter().sum();
        let n = sizes.len();
        let median = if n % 2 == 0 {
            (sizes[n / 2 - 1] + sizes[n / 2]) as f64 / 2.0
        } else {
            sizes[n / 2] as f64
        };

        Self {
            cell_count,
            bucket_count: n,
            min_bucket: sizes[0],
            max_bucket: sizes[n - 1],
            mean_bucket: cell_count as f64 / n as f64,
            median_bucket: median,
        }
    }
}

// ── Per-step time series ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct StepPoint {
    pub time_step: u64,
    pub cell_count: usize,
    pub bucket_count: usize,
}

/// Fixed-size history of step points, oldest evicted first.
#[derive(Debug, Default)]
struct StepRing {
    buf: VecDeque<StepPoint>,
}

impl StepRing {
    fn push(&mut self, point: StepPoint) {
        if self.buf.len() == STEP_RING_CAPACITY {
            self.buf.pop_front();
        }
        self.buf.push_back(point);
    }
}

// ── Collector ────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Inner {
    population: PopulationStats,
    /// Batches dispatched (counted once per batch, not per retry attempt).
    dispatches: u64,
    /// Failed compute attempts; each one also cost a pool client.
    call_failures: u64,
    /// Clients added by registrations minus clients lost to failures.
    live_clients: u64,
    call_count: u64,
    call_secs_total: f64,
    call_secs_max: f64,
    ring: StepRing,
}

/// Thread-safe collector handle, cheap to clone.
#[derive(Debug, Clone)]
pub struct SimMetrics {
    inner: Arc<RwLock<Inner>>,
    started: Instant,
}

impl SimMetrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
            started: Instant::now(),
        }
    }

    /// Refresh the population distribution and append a time-series point.
    pub fn observe_population(&self, time_step: u64, map: &BucketMap) {
        let stats = PopulationStats::measure(map);
        let mut inner = self.inner.write().unwrap();
        inner.ring.push(StepPoint {
            time_step,
            cell_count: stats.cell_count,
            bucket_count: stats.bucket_count,
        });
        inner.population = stats;
    }

    pub fn record_dispatch(&self) {
        self.inner.write().unwrap().dispatches += 1;
    }

    pub fn record_call_duration(&self, elapsed: Duration) {
        let secs = elapsed.as_secs_f64();
        let mut inner = self.inner.write().unwrap();
        inner.call_count += 1;
        inner.call_secs_total += secs;
        if secs > inner.call_secs_max {
            inner.call_secs_max = secs;
        }
    }

    /// A compute attempt failed and its client was discarded.
    pub fn record_call_failure(&self) {
        let mut inner = self.inner.write().unwrap();
        inner.call_failures += 1;
        inner.live_clients = inner.live_clients.saturating_sub(1);
    }

    /// A registration added one client slot.
    pub fn record_client_added(&self) {
        self.inner.write().unwrap().live_clients += 1;
    }

    pub fn live_clients(&self) -> u64 {
        self.inner.read().unwrap().live_clients
    }

    /// Full JSON snapshot for the HTTP endpoint.
    pub fn snapshot(&self) -> MetricsResponse {
        let inner = self.inner.read().unwrap();
        let mean_call_secs = if inner.call_count == 0 {
            0.0
        } else {
            inner.call_secs_total / inner.call_count as f64
        };
        MetricsResponse {
            uptime_secs: self.started.elapsed().as_secs_f64(),
            population: inner.population.clone(),
            dispatches: inner.dispatches,
            call_failures: inner.call_failures,
            live_clients: inner.live_clients,
            mean_call_secs,
            max_call_secs: inner.call_secs_max,
            steps: inner.ring.buf.iter().cloned().collect(),
        }
    }
}

impl Default for SimMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Complete response of `GET /metrics`.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsResponse {
    pub uptime_secs: f64,
    pub population: PopulationStats,
    pub dispatches: u64,
    pub call_failures: u64,
    pub live_clients: u64,
    pub mean_call_secs: f64,
    pub max_call_secs: f64,
    pub steps: Vec<StepPoint>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use petri_core::Cell;

    #[test]
    fn population_stats_of_empty_map_are_zero() {
        let stats = PopulationStats::measure(&BucketMap::new(10));
        assert_eq!(stats.cell_count, 0);
        assert_eq!(stats.bucket_count, 0);
        assert_eq!(stats.median_bucket, 0.0);
    }

    #[test]
    fn population_stats_odd_bucket_count() {
        // Bucket sizes 1, 2, 4.
        let map = BucketMap::build(
            vec![
                Cell::at(1.0, 1.0, 1.0),
                Cell::at(11.0, 1.0, 1.0),
                Cell::at(12.0, 1.0, 1.0),
                Cell::at(21.0, 1.0, 1.0),
                Cell::at(22.0, 1.0, 1.0),
                Cell::at(23.0, 1.0, 1.0),
                Cell::at(24.0, 1.0, 1.0),
            ],
            10,
        );
        let stats = PopulationStats::measure(&map);
        assert_eq!(stats.cell_count, 7);
        assert_eq!(stats.bucket_count, 3);
        assert_eq!(stats.min_bucket, 1);
        assert_eq!(stats.max_bucket, 4);
        assert_eq!(stats.median_bucket, 2.0);
        assert!((stats.mean_bucket - 7.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn population_stats_even_bucket_count_uses_midpoint_median() {
        // Bucket sizes 1 and 3.
        let map = BucketMap::build(
            vec![
                Cell::at(1.0, 1.0, 1.0),
                Cell::at(11.0, 1.0, 1.0),
                Cell::at(12.0, 1.0, 1.0),
                Cell::at(13.0, 1.0, 1.0),
            ],
            10,
        );
        let stats = PopulationStats::measure(&map);
        assert_eq!(stats.median_bucket, 2.0);
    }

    #[test]
    fn failure_shrinks_live_client_gauge() {
        let metrics = SimMetrics::new();
        metrics.record_client_added();
        metrics.record_client_added();
        metrics.record_call_failure();
        assert_eq!(metrics.live_clients(), 1);

        let snap = metrics.snapshot();
        assert_eq!(snap.call_failures, 1);
        assert_eq!(snap.live_clients, 1);
    }

    #[test]
    fn gauge_saturates_at_zero() {
        let metrics = SimMetrics::new();
        metrics.record_call_failure();
        assert_eq!(metrics.live_clients(), 0);
    }

    #[test]
    fn step_ring_evicts_oldest() {
        let metrics = SimMetrics::new();
        let map = BucketMap::build(vec![Cell::at(0.0, 0.0, 0.0)], 10);
        for step in 0..(STEP_RING_CAPACITY as u64 + 8) {
            metrics.observe_population(step, &map);
        }
        let snap = metrics.snapshot();
        assert_eq!(snap.steps.len(), STEP_RING_CAPACITY);
        assert_eq!(snap.steps[0].time_step, 8);
    }

    #[test]
    fn call_durations_aggregate() {
        let metrics = SimMetrics::new();
        metrics.record_call_duration(Duration::from_millis(100));
        metrics.record_call_duration(Duration::from_millis(300));
        let snap = metrics.snapshot();
        assert!((snap.mean_call_secs - 0.2).abs() < 1e-6);
        assert!((snap.max_call_secs - 0.3).abs() < 1e-6);
    }
}
