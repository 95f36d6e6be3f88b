//! Worker-registration listener.
//!
//! Workers announce `{address, threads}`; for every declared thread the
//! master dials the worker's compute socket and drops a client handle into
//! the pool. Registration failures are logged and the listener keeps serving:
//! a bad worker must not take the control plane down.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

use petri_wire::{
    topics, Endpoint, Envelope, RegisterAck, RegisterWorker, ReplyToken, RequestListener,
    ZmqComputeClient,
};

use crate::metrics::SimMetrics;
use crate::pool::WorkerPool;

/// Serve registrations until shutdown flips.
pub async fn run_registration_listener(
    listener: RequestListener,
    pool: Arc<WorkerPool>,
    metrics: SimMetrics,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            request = listener.recv_request() => match request {
                Ok((token, envelope)) => {
                    handle_registration(&listener, &pool, &metrics, token, envelope).await;
                }
                Err(e) => {
                    warn!(error = %e, "registration receive failed");
                }
            }
        }
    }
    info!("registration listener stopped");
}

async fn handle_registration(
    listener: &RequestListener,
    pool: &WorkerPool,
    metrics: &SimMetrics,
    token: ReplyToken,
    envelope: Envelope,
) {
    if envelope.topic != topics::REGISTER {
        warn!(topic = %envelope.topic, "unexpected topic on registration socket");
        return;
    }

    let registration: RegisterWorker = match envelope.decode() {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "undecodable registration");
            return;
        }
    };

    let endpoint = match Endpoint::from_addr(&registration.address) {
        Ok(e) => e,
        Err(e) => {
            warn!(address = %registration.address, error = %e, "registration rejected");
            return;
        }
    };

    let mut accepted = 0u32;
    for _ in 0..registration.threads {
        match ZmqComputeClient::connect(&endpoint).await {
            Ok(client) => {
                pool.add(Arc::new(client)).await;
                metrics.record_client_added();
                accepted += 1;
            }
            Err(e) => {
                warn!(address = %registration.address, error = %e, "failed to dial worker");
                break;
            }
        }
    }

    info!(
        address = %registration.address,
        threads = registration.threads,
        accepted,
        "worker registered"
    );

    match envelope.reply_to(topics::REGISTER_ACK, &RegisterAck { accepted }) {
        Ok(ack) => {
            if let Err(e) = listener.send_reply(&token, &ack).await {
                warn!(error = %e, "failed to acknowledge registration");
            }
        }
        Err(e) => warn!(error = %e, "failed to encode registration ack"),
    }
}
