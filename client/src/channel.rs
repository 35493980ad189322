//! Bidirectional message channel to the relay with an explicit lifecycle
//!
//! ```text
//! Disconnected ──open()──▶ Connecting ──handshake ok──▶ Open
//!                              │                         │
//!                        handshake failed      transport error / remote close
//!                              ▼                         ▼
//!                          ClosedWithError ◀─────────────┘
//! ```
//!
//! The socket itself lives in a spawned I/O task. The task reports what
//! happens on the wire through an unbounded event queue and drains a second
//! queue of outbound frames, so `send` never blocks the caller. All state
//! transitions are applied by the channel owner in [`ConnectionChannel::next_event`].

use crate::error::{ChannelError, ConnectionError, SendError};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

/// Lifecycle of one channel.
///
/// A channel starts `Connecting`, becomes `Open` once the handshake
/// completes, and ends either `Disconnected` (closed locally) or
/// `ClosedWithError`. Both end states are final; reconnecting means opening a
/// new channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    ClosedWithError,
}

/// What the owner observes after each transport event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Handshake finished, sends are now accepted
    Opened,
    /// An inbound frame was passed to the installed handler
    Received,
    /// The channel reached `ClosedWithError`
    Closed(ConnectionError),
}

/// Events reported by the I/O task
#[derive(Debug)]
enum TransportEvent {
    Opened,
    Frame(String),
    Failed(ConnectionError),
}

/// Callback receiving each inbound text frame while the channel is open
pub type MessageHandler = Box<dyn FnMut(&str) + Send>;

/// One WebSocket connection to the relay.
///
/// The socket itself lives in a spawned task; the channel only sees it
/// through queues. State changes are applied by [`ConnectionChannel::next_event`],
/// so the owner decides when they happen.
pub struct ConnectionChannel {
    endpoint: String,
    state: ConnectionState,
    outgoing: Option<mpsc::UnboundedSender<String>>,
    transport: mpsc::UnboundedReceiver<TransportEvent>,
    handler: Option<MessageHandler>,
}

impl ConnectionChannel {
    /// Starts connecting to `endpoint` (a `ws://host:port` URL).
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();

        tokio::spawn(run_transport(endpoint.clone(), event_tx, out_rx));

        let mut channel = Self {
            endpoint,
            state: ConnectionState::Disconnected,
            outgoing: Some(out_tx),
            transport: event_rx,
            handler: None,
        };
        channel.transition(ConnectionState::Connecting);
        channel
    }

    /// The `ws://` URL this channel was opened against
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Returns true if sends are currently accepted.
    ///
    /// Input is armed only while this holds.
    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    /// Queues one text frame for transmission. Rejected unless `Open`.
    pub fn send(&self, text: String) -> Result<(), SendError> {
        if self.state != ConnectionState::Open {
            return Err(SendError::NotOpen);
        }

        match &self.outgoing {
            Some(tx) => tx.send(text).map_err(|_| SendError::NotOpen),
            None => Err(SendError::NotOpen),
        }
    }

    /// Installs the single inbound message handler
    pub fn on_message(&mut self, handler: MessageHandler) -> Result<(), ChannelError> {
        if self.handler.is_some() {
            return Err(ChannelError::HandlerInstalled);
        }
        self.handler = Some(handler);
        Ok(())
    }

    /// Waits for the next transport event and applies it.
    ///
    /// Returns `None` once the channel is closed, either locally or with an
    /// error. Cancel safe: an event is only consumed right before it is applied.
    pub async fn next_event(&mut self) -> Option<ChannelEvent> {
        loop {
            if matches!(
                self.state,
                ConnectionState::Disconnected | ConnectionState::ClosedWithError
            ) {
                return None;
            }

            let event = self.transport.recv().await.unwrap_or_else(|| {
                TransportEvent::Failed(ConnectionError::Transport(
                    "transport task ended".to_string(),
                ))
            });

            match event {
                TransportEvent::Opened => {
                    if self.state != ConnectionState::Connecting {
                        warn!("Ignoring handshake completion in state {:?}", self.state);
                        continue;
                    }
                    self.transition(ConnectionState::Open);
                    return Some(ChannelEvent::Opened);
                }

                TransportEvent::Frame(text) => {
                    if self.state != ConnectionState::Open {
                        continue;
                    }
                    match self.handler.as_mut() {
                        Some(handler) => handler(&text),
                        None => debug!("No handler installed, dropping frame"),
                    }
                    return Some(ChannelEvent::Received);
                }

                TransportEvent::Failed(err) => {
                    error!("Connection to {} failed: {}", self.endpoint, err);
                    self.outgoing = None;
                    self.transition(ConnectionState::ClosedWithError);
                    return Some(ChannelEvent::Closed(err));
                }
            }
        }
    }

    /// Closes the channel. In-flight frames already handed to the socket may
    /// still be delivered; queued ones are not retried.
    pub fn close(&mut self) {
        self.outgoing = None;
        self.transport.close();
        if self.state != ConnectionState::ClosedWithError {
            self.transition(ConnectionState::Disconnected);
        }
    }

    fn transition(&mut self, next: ConnectionState) {
        if self.state != next {
            info!("Channel {}: {:?} -> {:?}", self.endpoint, self.state, next);
            self.state = next;
        }
    }
}

/// Owns the WebSocket for the lifetime of one channel
async fn run_transport(
    endpoint: String,
    events: mpsc::UnboundedSender<TransportEvent>,
    mut outgoing: mpsc::UnboundedReceiver<String>,
) {
    let ws_stream = match tokio_tungstenite::connect_async(endpoint.as_str()).await {
        Ok((stream, _)) => stream,
        Err(e) => {
            let _ = events.send(TransportEvent::Failed(ConnectionError::Handshake(
                e.to_string(),
            )));
            return;
        }
    };

    if events.send(TransportEvent::Opened).is_err() {
        return;
    }

    let (mut sink, mut stream) = ws_stream.split();

    loop {
        tokio::select! {
            queued = outgoing.recv() => match queued {
                Some(text) => {
                    if let Err(e) = sink.send(Message::Text(text.into())).await {
                        let _ = events.send(TransportEvent::Failed(
                            ConnectionError::Transport(e.to_string()),
                        ));
                        break;
                    }
                }
                None => {
                    debug!("Closing connection to {}", endpoint);
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            },

            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if events.send(TransportEvent::Frame(text.as_str().to_owned())).is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Binary(_))) => {
                    warn!("Ignoring binary frame from {}", endpoint);
                }
                Some(Ok(Message::Close(_))) | None => {
                    let _ = events.send(TransportEvent::Failed(ConnectionError::RemoteClosed));
                    break;
                }
                // Ping/pong are answered by tungstenite
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    let _ = events.send(TransportEvent::Failed(
                        ConnectionError::Transport(e.to_string()),
                    ));
                    break;
                }
            },
        }
    }
}

#[cfg(test)]
impl ConnectionChannel {
    /// Channel in `Connecting` whose transport is driven by the test
    fn scripted() -> (
        Self,
        mpsc::UnboundedSender<TransportEvent>,
        mpsc::UnboundedReceiver<String>,
    ) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let channel = Self {
            endpoint: "ws://scripted".to_string(),
            state: ConnectionState::Connecting,
            outgoing: Some(out_tx),
            transport: event_rx,
            handler: None,
        };
        (channel, event_tx, out_rx)
    }

    /// Already open channel without a transport; only the send path is live
    pub(crate) fn scripted_open() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (mut channel, _events, out_rx) = Self::scripted();
        channel.state = ConnectionState::Open;
        (channel, out_rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio_test::{assert_err, assert_ok};

    fn recording_handler() -> (MessageHandler, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler: MessageHandler = Box::new(move |text: &str| {
            sink.lock().unwrap().push(text.to_string());
        });
        (handler, seen)
    }

    #[tokio::test]
    async fn test_send_before_open_is_rejected() {
        let (channel, _events, mut out) = ConnectionChannel::scripted();

        assert_eq!(channel.state(), ConnectionState::Connecting);
        assert_eq!(channel.send("hello".to_string()), Err(SendError::NotOpen));
        assert!(out.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_open_enables_send() {
        let (mut channel, events, mut out) = ConnectionChannel::scripted();

        events.send(TransportEvent::Opened).unwrap();
        assert_eq!(channel.next_event().await, Some(ChannelEvent::Opened));
        assert!(channel.is_open());

        assert_ok!(channel.send("hello".to_string()));
        assert_eq!(out.recv().await, Some("hello".to_string()));
    }

    #[tokio::test]
    async fn test_frames_reach_handler_only_when_open() {
        let (mut channel, events, _out) = ConnectionChannel::scripted();
        let (handler, seen) = recording_handler();
        assert_ok!(channel.on_message(handler));

        // Frames before the handshake completes are discarded
        events.send(TransportEvent::Frame("early".to_string())).unwrap();
        events.send(TransportEvent::Opened).unwrap();
        assert_eq!(channel.next_event().await, Some(ChannelEvent::Opened));

        events.send(TransportEvent::Frame("first".to_string())).unwrap();
        assert_eq!(channel.next_event().await, Some(ChannelEvent::Received));

        assert_eq!(*seen.lock().unwrap(), vec!["first".to_string()]);
    }

    #[tokio::test]
    async fn test_single_handler() {
        let (mut channel, _events, _out) = ConnectionChannel::scripted();
        let (first, _) = recording_handler();
        let (second, _) = recording_handler();

        assert_ok!(channel.on_message(first));
        assert_eq!(
            channel.on_message(second),
            Err(ChannelError::HandlerInstalled)
        );
    }

    #[tokio::test]
    async fn test_handshake_failure_is_terminal() {
        let (mut channel, events, _out) = ConnectionChannel::scripted();

        events
            .send(TransportEvent::Failed(ConnectionError::Handshake(
                "refused".to_string(),
            )))
            .unwrap();

        assert_eq!(
            channel.next_event().await,
            Some(ChannelEvent::Closed(ConnectionError::Handshake(
                "refused".to_string()
            )))
        );
        assert_eq!(channel.state(), ConnectionState::ClosedWithError);

        // Late events are never applied once closed
        let _ = events.send(TransportEvent::Opened);
        assert_eq!(channel.next_event().await, None);
        assert_eq!(channel.state(), ConnectionState::ClosedWithError);
        assert_err!(channel.send("late".to_string()));
    }

    #[tokio::test]
    async fn test_remote_close_after_open() {
        let (mut channel, events, _out) = ConnectionChannel::scripted();

        events.send(TransportEvent::Opened).unwrap();
        channel.next_event().await;
        events
            .send(TransportEvent::Failed(ConnectionError::RemoteClosed))
            .unwrap();

        assert_eq!(
            channel.next_event().await,
            Some(ChannelEvent::Closed(ConnectionError::RemoteClosed))
        );
        assert_eq!(channel.send("x".to_string()), Err(SendError::NotOpen));
    }

    #[tokio::test]
    async fn test_vanished_transport_task_closes_channel() {
        let (mut channel, events, _out) = ConnectionChannel::scripted();
        drop(events);

        match channel.next_event().await {
            Some(ChannelEvent::Closed(ConnectionError::Transport(_))) => {}
            other => panic!("Expected transport error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_local_close() {
        let (mut channel, events, mut out) = ConnectionChannel::scripted();
        events.send(TransportEvent::Opened).unwrap();
        channel.next_event().await;

        channel.close();

        assert_eq!(channel.state(), ConnectionState::Disconnected);
        assert_eq!(channel.send("x".to_string()), Err(SendError::NotOpen));
        assert_eq!(channel.next_event().await, None);
        // The I/O side sees the queue closing
        assert_eq!(out.recv().await, None);
    }

    #[tokio::test]
    async fn test_open_against_closed_port_fails_handshake() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut channel = ConnectionChannel::open(format!("ws://127.0.0.1:{}", port));
        assert_eq!(channel.state(), ConnectionState::Connecting);

        match channel.next_event().await {
            Some(ChannelEvent::Closed(ConnectionError::Handshake(_))) => {}
            other => panic!("Expected handshake failure, got {:?}", other),
        }
        assert_eq!(channel.state(), ConnectionState::ClosedWithError);
    }
}
