//! Client run loop tying the channel, the drag session and the protocol together

use crate::channel::{ChannelEvent, ConnectionChannel, ConnectionState};
use crate::config::{ClientConfig, ReconnectPolicy};
use crate::error::ConnectionError;
use crate::input::{Command, DragInputSession, DragState, PositionChanged};
use crate::protocol::SyncProtocol;
use crate::table::PositionTable;
use log::{debug, info, warn};
use rand::Rng;
use shared::EntityId;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};

/// Exponential reconnect delays with jitter
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: ReconnectPolicy,
    attempt: u32,
}

impl Backoff {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Delay before the next attempt, or `None` when retrying is over
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.policy.enabled {
            return None;
        }
        if let Some(max) = self.policy.max_attempts {
            if self.attempt >= max {
                return None;
            }
        }

        let exponential = self
            .policy
            .base_delay
            .saturating_mul(2u32.saturating_pow(self.attempt))
            .min(self.policy.max_delay);
        let jitter_bound = (self.policy.base_delay.as_millis() as u64).max(1);
        let jitter_ms = rand::thread_rng().gen_range(0..jitter_bound);

        self.attempt += 1;
        Some(exponential + Duration::from_millis(jitter_ms))
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}

/// One participant: owns the local entity, its drag session and the
/// connection to the relay.
///
/// The identifier is generated once in [`Client::new`] and kept across
/// reconnects, as is the outbound sequence counter, so peers keep accepting
/// updates after a reconnect.
pub struct Client {
    config: ClientConfig,
    protocol: SyncProtocol,
    drag: DragInputSession,
    channel: ConnectionChannel,
    backoff: Backoff,
    reconnect_at: Option<Instant>,
    state_tx: watch::Sender<ConnectionState>,
}

impl Client {
    /// Generates the local identifier and starts connecting.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: ClientConfig) -> Self {
        let id = EntityId::generate();
        info!("Local entity {} at {}", id, config.spawn);

        let (table, local) = PositionTable::new(id, config.spawn);
        let drag = DragInputSession::new(local, config.min_move_interval);
        let channel = ConnectionChannel::open(config.endpoint());
        let (state_tx, _) = watch::channel(channel.state());
        let backoff = Backoff::new(config.reconnect.clone());

        Client {
            config,
            protocol: SyncProtocol::new(table),
            drag,
            channel,
            backoff,
            reconnect_at: None,
            state_tx,
        }
    }

    /// Identifier of the local entity
    pub fn id(&self) -> &EntityId {
        self.protocol.local_id()
    }

    /// Read-only view for rendering
    pub fn table(&self) -> Arc<PositionTable> {
        Arc::clone(self.protocol.table())
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.channel.state()
    }

    /// Follows connection state changes, including those of replacement
    /// channels opened by reconnects
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn drag_state(&self) -> DragState {
        self.drag.state()
    }

    /// Runs until `Quit`, the command sender is dropped, or the connection
    /// fails with reconnection disabled or exhausted.
    pub async fn run(
        &mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
    ) -> Result<(), ConnectionError> {
        loop {
            let channel_active = matches!(
                self.channel.state(),
                ConnectionState::Connecting | ConnectionState::Open
            );
            let reconnect_at = self.reconnect_at;

            tokio::select! {
                event = self.channel.next_event(), if channel_active => match event {
                    Some(ChannelEvent::Opened) => self.on_open(),
                    Some(ChannelEvent::Received) => {}
                    Some(ChannelEvent::Closed(err)) => self.on_closed(err)?,
                    None => {}
                },

                _ = sleep_until(reconnect_at.unwrap_or_else(Instant::now)), if reconnect_at.is_some() => {
                    self.reconnect();
                },

                command = commands.recv() => match command {
                    Some(Command::Quit) | None => {
                        info!("Shutting down");
                        self.channel.close();
                        self.publish_state();
                        return Ok(());
                    }
                    Some(command) => self.handle_command(command),
                },
            }
        }
    }

    fn on_open(&mut self) {
        self.backoff.reset();

        if let Err(e) = self.channel.on_message(self.protocol.inbound_handler()) {
            warn!("Could not install inbound handler: {}", e);
        }
        if let Err(e) = self.protocol.announce(&self.channel) {
            warn!("Could not announce local position: {}", e);
        }

        info!("Connected to {}, input armed", self.channel.endpoint());
        self.publish_state();
    }

    fn on_closed(&mut self, err: ConnectionError) -> Result<(), ConnectionError> {
        self.publish_state();

        // The resting position is re-announced when the next channel opens
        if self.drag.state() == DragState::Dragging {
            let _ = self.drag.end();
        }

        match self.backoff.next_delay() {
            Some(delay) => {
                warn!(
                    "Reconnecting to {} in {:?} (attempt {})",
                    self.config.endpoint(),
                    delay,
                    self.backoff.attempts()
                );
                self.reconnect_at = Some(Instant::now() + delay);
                Ok(())
            }
            None => Err(err),
        }
    }

    fn reconnect(&mut self) {
        self.reconnect_at = None;
        self.channel = ConnectionChannel::open(self.config.endpoint());
        self.publish_state();
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Begin => self.begin(),
            Command::Move(position) => {
                let change = self.drag.move_to(position);
                self.transmit(change);
            }
            Command::End => {
                let change = self.drag.end();
                self.transmit(change);
            }
            Command::Drag(position) => {
                self.begin();
                let change = self.drag.move_to(position);
                self.transmit(change);
                let change = self.drag.end();
                self.transmit(change);
            }
            Command::Show => {
                for (id, position) in self.protocol.table().all_entries() {
                    if &id != self.id() {
                        println!("  {} {}", id, position);
                    } else if self.drag.is_highlighted() {
                        println!("* {} {} (dragging)", id, position);
                    } else {
                        println!("* {} {}", id, position);
                    }
                }
            }
            Command::Id => println!("{}", self.id()),
            Command::Quit => {}
        }
    }

    /// Gestures are only accepted once the channel can carry their updates
    fn begin(&mut self) {
        if !self.channel.is_open() {
            warn!("Ignoring drag start, channel is {:?}", self.channel.state());
            return;
        }
        if self.drag.begin() {
            debug!("Drag started");
        }
    }

    fn transmit(&mut self, change: Option<PositionChanged>) {
        if let Some(change) = change {
            if let Err(e) = self.protocol.publish(&change, &self.channel) {
                warn!("Dropping update {}: {}", change.position, e);
            }
        }
    }

    fn publish_state(&self) {
        self.state_tx.send_replace(self.channel.state());
    }
}
