//! Error types for the client side of the synchronization protocol

use thiserror::Error;

/// Handshake or transport failure. Moves the channel to `ClosedWithError`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("connection closed by remote")]
    RemoteClosed,
}

/// Why an outbound update was dropped
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SendError {
    #[error("channel is not open")]
    NotOpen,
    #[error("could not encode packet: {0}")]
    Encode(String),
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ChannelError {
    #[error("an inbound message handler is already installed")]
    HandlerInstalled,
}
