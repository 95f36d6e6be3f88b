use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::info;

use petri_core::MasterConfig;
use petri_master::http::{self, AppState};
use petri_master::{registration, startup, Broadcaster, Master, SimMetrics, WorkerPool};
use petri_wire::{Endpoint, RequestListener};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    petri_core::config::load_dotenv();
    let config = MasterConfig::from_env();
    config.log_summary();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    startup::spawn_signal_handler(shutdown_tx.clone());

    let pool = Arc::new(WorkerPool::new(config.conn_buffer_size));
    let metrics = SimMetrics::new();
    let broadcaster = Broadcaster::new(64);

    // The registration listener must be up before seeding: a big bang blocks
    // on the pool until the first worker announces itself.
    let reg_listener =
        RequestListener::bind(&Endpoint::tcp("0.0.0.0", config.rpc_port)).await?;
    let reg_handle = tokio::spawn(registration::run_registration_listener(
        reg_listener,
        Arc::clone(&pool),
        metrics.clone(),
        shutdown_rx.clone(),
    ));

    let app_state = Arc::new(AppState {
        broadcast: broadcaster.sender(),
        metrics: metrics.clone(),
    });
    let http_handle = http::spawn_http_server(config.http_port, app_state, shutdown_rx.clone());

    let state = startup::load_initial_state(&config, &pool).await?;

    let mut master = Master::new(config, state, pool, metrics, broadcaster, shutdown_rx);
    master.run().await;

    // The loop is done (signal or extinction); take the listeners down too.
    let _ = shutdown_tx.send(true);
    let _ = tokio::time::timeout(Duration::from_secs(2), reg_handle).await;
    let _ = tokio::time::timeout(Duration::from_secs(2), http_handle).await;

    info!("master stopped");
    Ok(())
}
