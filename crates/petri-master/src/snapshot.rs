//! Snapshot persistence.
//!
//! A snapshot is the broadcastable state of the simulation (the time step
//! and every live cell) encoded with MessagePack. File names start with the
//! zero-padded step so lexicographic order is step order, which is what
//! `load_latest` leans on.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use petri_core::Cell;

const SNAPSHOT_EXTENSION: &str = "state";

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("snapshot decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("no snapshots found in {0}")]
    NoSnapshots(PathBuf),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub time_step: u64,
    pub cells: Vec<Cell>,
}

/// Write a snapshot into `dir`, creating the directory if needed.
pub fn save(dir: &Path, snapshot: &Snapshot) -> Result<PathBuf, SnapshotError> {
    fs::create_dir_all(dir)?;
    let name = format!(
        "{:010}_{}.{}",
        snapshot.time_step,
        Utc::now().format("%Y%m%dT%H%M%S"),
        SNAPSHOT_EXTENSION
    );
    let path = dir.join(name);
    fs::write(&path, rmp_serde::to_vec(snapshot)?)?;
    Ok(path)
}

pub fn load(path: &Path) -> Result<Snapshot, SnapshotError> {
    let bytes = fs::read(path)?;
    Ok(rmp_serde::from_slice(&bytes)?)
}

/// Load the snapshot with the highest step (latest write wins at equal steps).
pub fn load_latest(dir: &Path) -> Result<Snapshot, SnapshotError> {
    let mut names: Vec<String> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with(&format!(".{SNAPSHOT_EXTENSION}")))
        .collect();
    names.sort_unstable();

    match names.last() {
        Some(name) => load(&dir.join(name)),
        None => Err(SnapshotError::NoSnapshots(dir.to_path_buf())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_states_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("petri_snap_{}_{}", tag, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = temp_states_dir("roundtrip");
        let snapshot = Snapshot {
            time_step: 42,
            cells: vec![Cell::at(1.0, 2.0, 3.0), Cell::at(-4.0, 5.0, -6.0)],
        };

        let path = save(&dir, &snapshot).unwrap();
        let loaded = load(&path).unwrap();

        assert_eq!(loaded.time_step, 42);
        assert_eq!(loaded.cells, snapshot.cells);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn load_latest_picks_highest_step() {
        let dir = temp_states_dir("latest");
        for step in [3u64, 12, 7] {
            let snapshot = Snapshot {
                time_step: step,
                cells: vec![Cell::at(step as f32, 0.0, 0.0)],
            };
            save(&dir, &snapshot).unwrap();
        }

        let latest = load_latest(&dir).unwrap();
        assert_eq!(latest.time_step, 12);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn load_latest_of_empty_dir_is_an_error() {
        let dir = temp_states_dir("empty");
        fs::create_dir_all(&dir).unwrap();
        assert!(matches!(
            load_latest(&dir),
            Err(SnapshotError::NoSnapshots(_))
        ));
        let _ = fs::remove_dir_all(&dir);
    }
}
