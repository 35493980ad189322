//! # Position Relay Library
//!
//! The relay is the only shared infrastructure between clients. It holds no
//! entity state and assigns no identities: every well-formed JSON text frame
//! a client sends is forwarded, byte for byte, to every other open
//! connection. Clients own the meaning of those frames.
//!
//! ## Responsibilities
//!
//! - Accept WebSocket connections up to a configured capacity
//! - Forward each valid JSON frame to all connections except its sender
//! - Drop frames that are not JSON, and ignore binary frames
//! - Remember which entity each connection speaks for, so that a `leave`
//!   packet can be broadcast when that connection closes
//!
//! ## Module Organization
//!
//! ### Peers Module (`peers`)
//! Tracks open connections, their outbound queues and announced entities.
//!
//! ### Relay Module (`relay`)
//! Listener, per-connection tasks and the fan-out rule.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::relay::{RelayConfig, RelayServer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let relay = RelayServer::bind(RelayConfig::default()).await?;
//!     relay.run().await;
//!     Ok(())
//! }
//! ```
//!
//! Each connection is served by two tasks: a reader that applies the fan-out
//! rule and a writer that drains the connection's queue. Queues are unbounded,
//! so one slow reader never stalls delivery to the others.

pub mod peers;
pub mod relay;
