//! Spatial bucket index.
//!
//! The population is partitioned into cubic buckets of side `width`. A cell at
//! `(x, y, z)` belongs to the bucket keyed by the floor of each coordinate
//! divided by the width, so keys are signed and the space is unbounded.

use std::collections::hash_map;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::cell::Cell;

/// Integer coordinates of one cubic bucket.
///
/// Hash/equality are what the index operates on; the derived ordering exists
/// for stable debug output only.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct BucketKey {
    pub bx: i64,
    pub by: i64,
    pub bz: i64,
}

impl BucketKey {
    pub fn new(bx: i64, by: i64, bz: i64) -> Self {
        Self { bx, by, bz }
    }

    /// Key of the bucket containing `cell` for the given bucket width.
    pub fn containing(cell: &Cell, width: u32) -> Self {
        let w = f64::from(width);
        Self {
            bx: (f64::from(cell.pos.x) / w).floor() as i64,
            by: (f64::from(cell.pos.y) / w).floor() as i64,
            bz: (f64::from(cell.pos.z) / w).floor() as i64,
        }
    }

    /// The 26 axis-aligned neighbors (the open neighborhood).
    ///
    /// Enumeration order is fixed per key: `dx`, then `dy`, then `dz`, each
    /// running -1, 0, +1, with the center excluded.
    pub fn neighbors(&self) -> [BucketKey; 26] {
        let mut out = [*self; 26];
        let mut i = 0;
        for dx in -1i64..=1 {
            for dy in -1i64..=1 {
                for dz in -1i64..=1 {
                    if dx == 0 && dy == 0 && dz == 0 {
                        continue;
                    }
                    out[i] = BucketKey::new(self.bx + dx, self.by + dy, self.bz + dz);
                    i += 1;
                }
            }
        }
        out
    }

    /// The key itself plus its 26 neighbors (the closed neighborhood).
    pub fn closed_neighborhood(&self) -> [BucketKey; 27] {
        let mut out = [*self; 27];
        out[1..].copy_from_slice(&self.neighbors());
        out
    }
}

impl std::fmt::Display for BucketKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({},{},{})", self.bx, self.by, self.bz)
    }
}

/// The live spatial index: bucket key → cells in that bucket.
///
/// Empty buckets are never stored. The map is replaced wholesale at the end of
/// every simulation step and is read-only while a step runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketMap {
    width: u32,
    buckets: HashMap<BucketKey, Vec<Cell>>,
}

impl BucketMap {
    /// An empty map for the given bucket width.
    pub fn new(width: u32) -> Self {
        Self {
            width,
            buckets: HashMap::new(),
        }
    }

    /// Group cells into buckets. Empty groups never materialize.
    pub fn build(cells: Vec<Cell>, width: u32) -> Self {
        let mut map = Self::new(width);
        for cell in cells {
            let key = BucketKey::containing(&cell, width);
            map.buckets.entry(key).or_default().push(cell);
        }
        map
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn get(&self, key: &BucketKey) -> Option<&[Cell]> {
        self.buckets.get(key).map(Vec::as_slice)
    }

    /// Number of non-empty buckets.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &BucketKey> {
        self.buckets.keys()
    }

    pub fn iter(&self) -> hash_map::Iter<'_, BucketKey, Vec<Cell>> {
        self.buckets.iter()
    }

    /// Total cells across all buckets.
    pub fn cell_count(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    pub fn all_cells(&self) -> impl Iterator<Item = &Cell> {
        self.buckets.values().flatten()
    }

    /// Absorb `src`, taking ownership of its buckets.
    ///
    /// Within one step each origin bucket returns exactly once, so key
    /// collisions only occur when returned cells scattered across several
    /// batches land in the same destination bucket; those are concatenated.
    pub fn merge(&mut self, src: BucketMap) {
        for (key, mut cells) in src.buckets {
            if cells.is_empty() {
                continue;
            }
            self.buckets
                .entry(key)
                .and_modify(|b| b.append(&mut cells))
                .or_insert(cells);
        }
    }

    /// All cells in the 26 buckets surrounding `key`, cloned in neighbor
    /// enumeration order. This is the `cells_in_proximity` payload of a
    /// compute batch.
    pub fn proximity(&self, key: &BucketKey) -> Vec<Cell> {
        let mut out = Vec::new();
        for neighbor in key.neighbors() {
            if let Some(bucket) = self.buckets.get(&neighbor) {
                out.extend(bucket.iter().cloned());
            }
        }
        out
    }
}
