//! In-memory connector for tests and offline demos
//!
//! [`memory_network`] returns a connected pair: the [`MemoryConnector`] handed to
//! a session, and a [`MemoryServer`] that accepts each connection attempt as a
//! [`ServerConnection`] speaking the same JSON events as the real server.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;
use url::Url;

use crate::channel::{Connection, Connector, Inbound};
use crate::error::{TransportError, TransportResult};

/// Frames travelling from the server to a client
#[derive(Debug, Clone)]
enum ServerFrame {
    Text(String),
    Close(Option<String>),
}

/// Create a connector and the server that accepts its connections
pub fn memory_network() -> (MemoryConnector, MemoryServer) {
    let (accept_tx, accept_rx) = mpsc::unbounded_channel();
    let refusals = Arc::new(AtomicUsize::new(0));

    (
        MemoryConnector {
            accept: accept_tx,
            refusals: refusals.clone(),
        },
        MemoryServer {
            accept: accept_rx,
            refusals,
        },
    )
}

// ----------------------------------------------------------------------------
// Client Side
// ----------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MemoryConnector {
    accept: mpsc::UnboundedSender<ServerConnection>,
    refusals: Arc<AtomicUsize>,
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, endpoint: &Url) -> TransportResult<Box<dyn Connection>> {
        let refused = self
            .refusals
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(TransportError::ConnectFailed {
                url: endpoint.to_string(),
                reason: "connection refused".to_string(),
            });
        }

        let (to_server, from_client) = mpsc::unbounded_channel();
        let (to_client, from_server) = mpsc::unbounded_channel();
        let server_side = ServerConnection {
            endpoint: endpoint.clone(),
            incoming: from_client,
            outgoing: to_client,
        };

        self.accept
            .send(server_side)
            .map_err(|_| TransportError::ConnectFailed {
                url: endpoint.to_string(),
                reason: "server is gone".to_string(),
            })?;

        Ok(Box::new(MemoryConnection {
            outgoing: Some(to_server),
            incoming: from_server,
        }))
    }
}

struct MemoryConnection {
    outgoing: Option<mpsc::UnboundedSender<String>>,
    incoming: mpsc::UnboundedReceiver<ServerFrame>,
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn send(&mut self, frame: String) -> TransportResult<()> {
        match &self.outgoing {
            Some(outgoing) => outgoing
                .send(frame)
                .map_err(|_| TransportError::ConnectionClosed),
            None => Err(TransportError::ConnectionClosed),
        }
    }

    async fn recv(&mut self) -> TransportResult<Inbound> {
        match self.incoming.recv().await {
            Some(ServerFrame::Text(text)) => Ok(Inbound::Frame(text)),
            Some(ServerFrame::Close(reason)) => Ok(Inbound::Closed(reason)),
            None => Err(TransportError::ConnectionClosed),
        }
    }

    async fn close(&mut self) {
        self.outgoing = None;
        self.incoming.close();
    }
}

// ----------------------------------------------------------------------------
// Server Side
// ----------------------------------------------------------------------------

#[derive(Debug)]
pub struct MemoryServer {
    accept: mpsc::UnboundedReceiver<ServerConnection>,
    refusals: Arc<AtomicUsize>,
}

impl MemoryServer {
    /// Wait for the next connection attempt
    pub async fn accept(&mut self) -> Option<ServerConnection> {
        self.accept.recv().await
    }

    /// Refuse the next `count` connection attempts
    pub fn refuse_next(&self, count: usize) {
        self.refusals.store(count, Ordering::SeqCst);
    }
}

/// Server end of one client connection
#[derive(Debug)]
pub struct ServerConnection {
    endpoint: Url,
    incoming: mpsc::UnboundedReceiver<String>,
    outgoing: mpsc::UnboundedSender<ServerFrame>,
}

impl ServerConnection {
    /// URL the client connected to
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Next raw frame from the client; `None` once the client closed
    pub async fn recv_text(&mut self) -> Option<String> {
        self.incoming.recv().await
    }

    /// Next frame from the client, decoded as JSON
    pub async fn recv_json(&mut self) -> Option<Value> {
        let text = self.recv_text().await?;
        match serde_json::from_str(&text) {
            Ok(value) => Some(value),
            Err(err) => {
                debug!(error = %err, "Client sent non-JSON frame");
                Some(Value::String(text))
            }
        }
    }

    /// Send a JSON event to the client; false if the client is gone
    pub fn send_json(&self, value: Value) -> bool {
        self.send_text(value.to_string())
    }

    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.outgoing.send(ServerFrame::Text(text.into())).is_ok()
    }

    /// Close the connection in an orderly way
    pub fn close(self, reason: Option<&str>) {
        let _ = self
            .outgoing
            .send(ServerFrame::Close(reason.map(str::to_string)));
    }

    /// Drop the connection without a close frame
    pub fn abort(self) {}

    /// Whether the client has closed its side
    pub fn is_client_closed(&self) -> bool {
        self.outgoing.is_closed()
    }
}
