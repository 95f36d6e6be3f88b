//! ROUTER-socket listener: the receiving half of the request/reply fabric.
//!
//! The master binds one of these for worker registrations; workers bind one
//! to serve compute calls. Each received request carries the peer's routing
//! identity, wrapped in a [`ReplyToken`] that must be handed back when
//! sending the reply so ZeroMQ can route it to the right DEALER.

use tokio::sync::Mutex;
use tracing::{debug, info};
use zeromq::prelude::*;
use zeromq::{RouterSocket, ZmqMessage};

use crate::endpoint::Endpoint;
use crate::envelope::Envelope;
use crate::error::WireError;

/// Opaque routing identity of the requesting peer.
#[derive(Debug, Clone)]
pub struct ReplyToken {
    identity: Vec<u8>,
}

pub struct RequestListener {
    socket: Mutex<RouterSocket>,
}

impl RequestListener {
    /// Bind a ROUTER socket on the given endpoint.
    pub async fn bind(endpoint: &Endpoint) -> Result<Self, WireError> {
        endpoint
            .ensure_ipc_dir()
            .map_err(|e| WireError::Transport(e.to_string()))?;
        endpoint
            .remove_stale_socket()
            .map_err(|e| WireError::Transport(e.to_string()))?;

        let mut socket = RouterSocket::new();
        let url = endpoint.url();
        info!(endpoint = %url, "binding request listener");
        socket.bind(&url).await?;
        Ok(Self {
            socket: Mutex::new(socket),
        })
    }

    /// Receive the next request from any connected peer.
    ///
    /// ROUTER recv frames are `[identity, topic, envelope]`: zeromq-rs
    /// prepends the identity, the rest is what the DEALER sent.
    pub async fn recv_request(&self) -> Result<(ReplyToken, Envelope), WireError> {
        let msg = {
            let mut socket = self.socket.lock().await;
            socket.recv().await?
        };

        let frames: Vec<_> = msg.iter().collect();
        if frames.len() < 2 {
            return Err(WireError::Transport(format!(
                "expected at least 2 frames from ROUTER, got {}",
                frames.len()
            )));
        }

        let identity = frames[0].as_ref().to_vec();
        let data: Vec<_> = frames[1..]
            .iter()
            .skip_while(|f| f.as_ref().is_empty())
            .collect();
        if data.len() < 2 {
            return Err(WireError::Transport(format!(
                "expected [topic, envelope] after identity, got {} frames",
                data.len()
            )));
        }

        let envelope = Envelope::from_bytes(data[1].as_ref())?;
        debug!(
            correlation_id = %envelope.correlation_id,
            topic = %envelope.topic,
            "received request"
        );
        Ok((ReplyToken { identity }, envelope))
    }

    /// Send a reply (or one chunk of a streamed reply) to the peer behind
    /// `token`. Frames sent: `[identity, topic, envelope]`.
    pub async fn send_reply(&self, token: &ReplyToken, reply: &Envelope) -> Result<(), WireError> {
        let bytes = reply.to_bytes()?;
        let mut msg = ZmqMessage::from(token.identity.clone());
        msg.push_back(reply.topic.as_bytes().to_vec().into());
        msg.push_back(bytes.into());

        let mut socket = self.socket.lock().await;
        socket.send(msg).await?;
        debug!(
            correlation_id = %reply.correlation_id,
            topic = %reply.topic,
            "sent reply"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_token_is_cloneable() {
        let token = ReplyToken {
            identity: vec![9, 8, 7],
        };
        assert_eq!(token.clone().identity, token.identity);
    }
}
