//! Big-bang seeding: ask a worker to generate the initial population.

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use petri_core::BucketMap;
use petri_wire::{BigBangRequest, WireError};

use crate::pool::WorkerPool;

#[derive(Debug, Error)]
pub enum SeedError {
    #[error("cannot read big-bang config: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot parse big-bang config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("big-bang call failed: {0}")]
    Wire(#[from] WireError),

    #[error("worker pool closed before a worker registered")]
    PoolClosed,
}

/// Big-bang parameters, loaded from a TOML file.
#[derive(Debug, Clone, Deserialize)]
pub struct BigBangConfig {
    pub cell_amount: u32,
    pub extent: f32,
    #[serde(default = "default_min_energy")]
    pub min_energy: u32,
    #[serde(default = "default_max_energy")]
    pub max_energy: u32,
}

fn default_min_energy() -> u32 {
    50
}

fn default_max_energy() -> u32 {
    150
}

impl BigBangConfig {
    pub fn from_path(path: &Path) -> Result<Self, SeedError> {
        Ok(toml::from_str(&std::fs::read_to_string(path)?)?)
    }

    pub fn to_request(&self) -> BigBangRequest {
        BigBangRequest {
            cell_amount: self.cell_amount,
            extent: self.extent,
            min_energy: self.min_energy,
            max_energy: self.max_energy,
        }
    }
}

/// Check out a client (waiting for the first registration if necessary),
/// stream the generated population, and bucket it.
pub async fn fetch_big_bang(
    pool: &WorkerPool,
    config: &BigBangConfig,
    bucket_width: u32,
) -> Result<BucketMap, SeedError> {
    info!(cells = config.cell_amount, "requesting big bang");
    let client = pool.checkout().await.ok_or(SeedError::PoolClosed)?;

    let mut stream = client.big_bang(config.to_request()).await?;
    let mut cells = Vec::with_capacity(config.cell_amount as usize);
    while let Some(chunk) = stream.recv().await {
        cells.extend(chunk?.cells);
    }
    pool.add(client).await;

    info!(cells = cells.len(), "big bang complete");
    Ok(BucketMap::build(cells, bucket_width))
}
