//! Request/response transport between page agents and the coordinator
//!
//! [`ChannelTransport`] is the in-process channel: each request travels as an
//! [`Envelope`] with a oneshot reply slot. A full queue maps to
//! "channel not ready"; a closed queue or a dropped reply slot maps to
//! "no receiver", the same two failures a browser messaging layer produces.

use std::sync::Arc;

use async_trait::async_trait;
use psp_core::protocol::MessageSender;
use psp_core::{Request, Response};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::coordinator::Coordinator;
use crate::error::TransportError;
use crate::router::route;

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &Request) -> Result<Response, TransportError>;
}

/// One message in flight.
#[derive(Debug)]
pub struct Envelope {
    pub sender: MessageSender,
    pub message: Value,
    pub reply: oneshot::Sender<Response>,
}

/// Create the coordinator inbox.
pub fn channel(capacity: usize) -> (mpsc::Sender<Envelope>, mpsc::Receiver<Envelope>) {
    mpsc::channel(capacity.max(1))
}

/// Page-agent end of the channel, bound to the agent's identity.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    tx: mpsc::Sender<Envelope>,
    sender: MessageSender,
}

impl ChannelTransport {
    pub fn new(tx: mpsc::Sender<Envelope>, sender: MessageSender) -> Self {
        Self { tx, sender }
    }

    /// Send an arbitrary JSON message.
    pub async fn send_value(&self, message: Value) -> Result<Response, TransportError> {
        let (reply, response) = oneshot::channel();
        let envelope = Envelope {
            sender: self.sender.clone(),
            message,
            reply,
        };
        self.tx.try_send(envelope).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TransportError::ChannelNotReady,
            mpsc::error::TrySendError::Closed(_) => TransportError::NoReceiver,
        })?;
        response.await.map_err(|_| TransportError::NoReceiver)
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&self, request: &Request) -> Result<Response, TransportError> {
        let message = serde_json::to_value(request)?;
        self.send_value(message).await
    }
}

/// Serve the inbox until every sender is gone. Each message is routed on its
/// own task so slow store I/O for one tab does not hold up another.
pub fn serve(coordinator: Arc<Coordinator>, mut inbox: mpsc::Receiver<Envelope>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(envelope) = inbox.recv().await {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move {
                let response = route(&coordinator, &envelope.sender, &envelope.message).await;
                if envelope.reply.send(response).is_err() {
                    log::debug!("caller went away before the response was ready");
                }
            });
        }
        log::debug!("coordinator inbox closed");
    })
}
