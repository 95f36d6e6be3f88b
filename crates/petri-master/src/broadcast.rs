//! Population fan-out to visualization subscribers.
//!
//! The broadcaster is a sink: after every step the scheduler hands it the new
//! population and moves on. Fan-out rides a `tokio::sync::broadcast` channel,
//! so a slow subscriber lags and loses frames instead of blocking the step
//! loop; whatever frames a subscriber does see arrive in step order.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use petri_core::BucketMap;

/// Frames delivered to every attached subscriber.
#[derive(Debug, Clone)]
pub enum Frame {
    /// A serialized population snapshot.
    Population(String),
    /// The simulation is over; connections should close.
    Close,
}

#[derive(Serialize)]
struct WsMessage<T: Serialize> {
    #[serde(rename = "type")]
    msg_type: &'static str,
    data: T,
}

pub(crate) fn ws_json<T: Serialize>(msg_type: &'static str, data: T) -> String {
    serde_json::to_string(&WsMessage { msg_type, data }).unwrap_or_default()
}

pub struct Broadcaster {
    tx: broadcast::Sender<Frame>,
}

impl Broadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Handle for attaching subscribers (the websocket layer subscribes per
    /// connection).
    pub fn sender(&self) -> broadcast::Sender<Frame> {
        self.tx.clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Fire-and-forget: emit the post-step population to every subscriber.
    pub fn broadcast_population(&self, time_step: u64, buckets: &BucketMap) {
        let cells: Vec<_> = buckets.all_cells().collect();
        let frame = ws_json(
            "population",
            serde_json::json!({
                "time_step": time_step,
                "cell_count": cells.len(),
                "cells": cells,
            }),
        );
        // No subscribers attached is not an error.
        let receivers = self.tx.send(Frame::Population(frame)).unwrap_or(0);
        debug!(time_step, receivers, "population broadcast");
    }

    /// Tell every subscriber to close. Called once when the simulation stops.
    pub fn shutdown(&self) {
        let _ = self.tx.send(Frame::Close);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use petri_core::Cell;

    #[tokio::test]
    async fn subscribers_receive_population_frames_in_step_order() {
        let broadcaster = Broadcaster::new(16);
        let mut rx = broadcaster.sender().subscribe();

        let map = BucketMap::build(vec![Cell::at(1.0, 2.0, 3.0)], 10);
        broadcaster.broadcast_population(1, &map);
        broadcaster.broadcast_population(2, &map);

        for expected in [1u64, 2] {
            match rx.recv().await.unwrap() {
                Frame::Population(json) => {
                    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
                    assert_eq!(value["type"], "population");
                    assert_eq!(value["data"]["time_step"], expected);
                    assert_eq!(value["data"]["cell_count"], 1);
                }
                Frame::Close => panic!("unexpected close frame"),
            }
        }
    }

    #[tokio::test]
    async fn broadcast_without_subscribers_does_not_block() {
        let broadcaster = Broadcaster::new(16);
        let map = BucketMap::new(10);
        broadcaster.broadcast_population(0, &map);
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn shutdown_sends_close_frame() {
        let broadcaster = Broadcaster::new(16);
        let mut rx = broadcaster.sender().subscribe();
        broadcaster.shutdown();
        assert!(matches!(rx.recv().await.unwrap(), Frame::Close));
    }
}
