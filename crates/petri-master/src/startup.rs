//! Wiring: seed loading and signal handling for the binary.

use anyhow::Context;
use tokio::sync::watch;
use tracing::info;

use petri_core::{BucketMap, MasterConfig, SeedSource};

use crate::pool::WorkerPool;
use crate::seed::{self, BigBangConfig};
use crate::snapshot;
use crate::state::SimulationState;

/// Obtain the initial population according to the configured seed source.
/// Any failure here is fatal: a master with no population and no way to get
/// one has nothing to do.
pub async fn load_initial_state(
    config: &MasterConfig,
    pool: &WorkerPool,
) -> anyhow::Result<SimulationState> {
    let source = config.seed.resolve()?;
    info!(%source, "seeding simulation");

    let (buckets, time_step) = match source {
        SeedSource::StateFile(name) => {
            let path = config.states_dir.join(&name);
            let snap = snapshot::load(&path)
                .with_context(|| format!("loading state from {}", path.display()))?;
            (
                BucketMap::build(snap.cells, config.bucket_width),
                snap.time_step,
            )
        }
        SeedSource::LatestState => {
            let snap = snapshot::load_latest(&config.states_dir)
                .context("loading latest state")?;
            (
                BucketMap::build(snap.cells, config.bucket_width),
                snap.time_step,
            )
        }
        SeedSource::BigBang(path) => {
            let big_bang = BigBangConfig::from_path(&path)
                .with_context(|| format!("reading big-bang config {}", path.display()))?;
            let map = seed::fetch_big_bang(pool, &big_bang, config.bucket_width)
                .await
                .context("big bang failed")?;
            (map, 0)
        }
    };

    info!(
        time_step,
        cells = buckets.cell_count(),
        buckets = buckets.bucket_count(),
        "initial population ready"
    );
    Ok(SimulationState::new(buckets, time_step))
}

/// Flip the shutdown watch when SIGINT or SIGTERM arrives.
pub fn spawn_signal_handler(shutdown_tx: watch::Sender<bool>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    })
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to register SIGINT");
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM");
        tokio::select! {
            _ = sigint.recv() => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for ctrl_c");
    }
}
