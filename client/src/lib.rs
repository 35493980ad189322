//! # Position Sync Client Library
//!
//! Client side of the real-time entity-position synchronization system. Each
//! client owns exactly one movable entity, publishes its moves to a relay and
//! merges every other participant's moves into a local position table.
//!
//! ## Data Flow
//!
//! ```text
//! gesture ─▶ DragInputSession ─▶ SyncProtocol ─▶ ConnectionChannel ─▶ relay
//!                  │                                                    │
//!                  ▼                                                    ▼
//!            PositionTable ◀── SyncProtocol (inbound) ◀── ConnectionChannel
//! ```
//!
//! ## Module Organization
//!
//! ### Channel Module (`channel`)
//! One WebSocket connection with an explicit lifecycle
//! (`Disconnected → Connecting → Open → ClosedWithError`). Sends are rejected
//! unless the channel is open; inbound frames go to a single installed handler.
//!
//! ### Input Module (`input`)
//! The begin/move/end drag state machine for the local entity and the line
//! commands that drive it from a terminal.
//!
//! ### Table Module (`table`)
//! Last known position per entity identifier. The local entry can only be
//! written through the `LocalEntity` handle owned by the drag session; remote
//! entries are merged last-write-wins on the sender's sequence number.
//!
//! ### Protocol Module (`protocol`)
//! Encodes local changes as `move` packets and applies inbound `move` and
//! `leave` packets to the table. Malformed frames are dropped.
//!
//! ### Network Module (`network`)
//! The `Client` run loop: connects, arms input once the channel is open,
//! re-announces the local position after every (re)connect and reconnects
//! with exponential backoff.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::config::ClientConfig;
//! use client::input::Command;
//! use client::network::Client;
//! use shared::Position;
//! use tokio::sync::mpsc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = Client::new(ClientConfig::new("127.0.0.1", 8080));
//!     let (commands, rx) = mpsc::unbounded_channel();
//!
//!     commands.send(Command::Drag(Position::new(120.0, 80.0)))?;
//!     commands.send(Command::Quit)?;
//!
//!     client.run(rx).await?;
//!     Ok(())
//! }
//! ```

pub mod channel;
pub mod config;
pub mod error;
pub mod input;
pub mod network;
pub mod protocol;
pub mod table;
