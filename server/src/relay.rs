//! Relay server: accepts WebSocket connections and fans every well-formed
//! JSON text frame out to all other connections, unmodified.

use crate::peers::{ConnId, PeerRegistry};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use serde_json::Value;
use shared::{encode, EntityId, Packet, DEFAULT_HOST, DEFAULT_PORT};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

pub const DEFAULT_MAX_CLIENTS: usize = 64;

/// Where the relay listens and how many connections it serves at once
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub host: String,
    pub port: u16,
    pub max_clients: usize,
}

impl RelayConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            max_clients: DEFAULT_MAX_CLIENTS,
        }
    }
}

/// Stateless fan-out relay.
///
/// Holds no positions and assigns no identities. The only per-connection
/// state is the entity identifier a connection announced, kept so that its
/// departure can be reported.
pub struct RelayServer {
    listener: TcpListener,
    peers: Arc<RwLock<PeerRegistry>>,
}

impl RelayServer {
    /// Binds the listening socket. Port 0 picks a free port.
    pub async fn bind(config: RelayConfig) -> std::io::Result<Self> {
        let listener = TcpListener::bind(config.bind_addr()).await?;
        info!(
            "Relay listening on {} (max {} clients)",
            listener.local_addr()?,
            config.max_clients
        );

        Ok(RelayServer {
            listener,
            peers: Arc::new(RwLock::new(PeerRegistry::new(config.max_clients))),
        })
    }

    /// Address actually bound, useful after binding port 0
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Shared handle to the registry of open connections
    pub fn peers(&self) -> Arc<RwLock<PeerRegistry>> {
        Arc::clone(&self.peers)
    }

    /// Accepts connections forever, one task per connection
    pub async fn run(self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    let peers = Arc::clone(&self.peers);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, addr, peers).await {
                            warn!("Connection from {} ended with error: {}", addr, e);
                        }
                    });
                }
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    peers: Arc<RwLock<PeerRegistry>>,
) -> Result<(), WsError> {
    let ws_stream = accept_async(stream).await?;
    let (mut sink, mut source) = ws_stream.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let registered = peers.write().await.add_peer(addr, tx);
    let Some(conn_id) = registered else {
        warn!("Rejecting {}: relay is full", addr);
        let frame = CloseFrame {
            code: CloseCode::Again,
            reason: "relay full".into(),
        };
        sink.send(Message::Close(Some(frame))).await?;
        return Ok(());
    };

    // Ends once the registry drops this connection's queue
    let writer = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if let Err(e) = sink.send(Message::Text(text.into())).await {
                debug!("Write to connection {} failed: {}", conn_id, e);
                break;
            }
        }
        let _ = sink.close().await;
    });

    let mut result = Ok(());
    while let Some(frame) = source.next().await {
        match frame {
            Ok(Message::Text(text)) => relay_frame(&peers, conn_id, text.as_str()).await,
            Ok(Message::Binary(_)) => warn!("Ignoring binary frame from connection {}", conn_id),
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                result = Err(e);
                break;
            }
        }
    }

    {
        let mut registry = peers.write().await;
        let departed = registry
            .remove_peer(conn_id)
            .and_then(|peer| peer.entity)
            .filter(|id| !registry.speaks_for(id));

        if let Some(id) = departed {
            match encode(&Packet::Leave { id: id.clone() }) {
                Ok(leave) => {
                    registry.broadcast(&leave, None);
                    info!("Entity {} left with connection {}", id, conn_id);
                }
                Err(e) => error!("Could not encode leave for {}: {}", id, e),
            }
        }
    }

    let _ = writer.await;
    result
}

/// Forwards a frame verbatim to everyone but its sender.
///
/// Only JSON validity is checked here; field-level validation belongs to the
/// receiving clients. A string `id` field records which entity the sender
/// speaks for.
async fn relay_frame(peers: &RwLock<PeerRegistry>, conn_id: ConnId, text: &str) {
    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => {
            warn!("Dropping non-JSON frame from connection {}: {}", conn_id, e);
            return;
        }
    };

    let mut registry = peers.write().await;
    if let Some(id) = value.get("id").and_then(Value::as_str) {
        registry.set_entity(conn_id, EntityId::new(id));
    }
    let delivered = registry.broadcast(text, Some(conn_id));
    debug!("Relayed frame from connection {} to {} peers", conn_id, delivered);
}
