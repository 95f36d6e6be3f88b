//! HTTP surface: websocket subscribers on `GET /`, metrics on `GET /metrics`.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use tokio::sync::{broadcast, watch};
use tracing::{error, info};

use crate::broadcast::Frame;
use crate::metrics::{MetricsResponse, SimMetrics};

pub struct AppState {
    pub broadcast: broadcast::Sender<Frame>,
    pub metrics: SimMetrics,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(ws_upgrade))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Bind and serve, shutting down gracefully when `shutdown` flips to true.
pub fn spawn_http_server(
    port: u16,
    state: Arc<AppState>,
    shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let app = build_router(state);
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = match tokio::net::TcpListener::bind(addr).await {
            Ok(l) => l,
            Err(e) => {
                error!(port, error = %e, "failed to bind HTTP server");
                return;
            }
        };

        info!(port, "HTTP server listening (subscribers + metrics)");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let mut rx = shutdown;
                while !*rx.borrow() {
                    if rx.changed().await.is_err() {
                        break;
                    }
                }
            })
            .await
            .ok();

        info!("HTTP server stopped");
    })
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> Json<MetricsResponse> {
    Json(state.metrics.snapshot())
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

/// One attached subscriber.
///
/// Population frames are forwarded until the client disconnects, the
/// subscriber lags out of the broadcast buffer, or the simulation announces
/// shutdown with a close frame.
async fn handle_ws(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut rx = state.broadcast.subscribe();

    let send_task = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(Frame::Population(json)) => {
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Ok(Frame::Close) | Err(broadcast::error::RecvError::Closed) => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
                // Fell behind the broadcast buffer: frames were dropped, the
                // stream stays in step order for whatever comes next.
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
            }
        }
    });

    // Consume incoming messages (pings, close frames) but ignore content.
    let recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            if matches!(msg, Message::Close(_)) {
                break;
            }
        }
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }
}
