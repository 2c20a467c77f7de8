//! Connectivity boundary
//!
//! The orchestrator talks to the speech service through [`Connection`]. Events
//! arrive on an mpsc channel in the order the connection produced them;
//! current state is published on a watch channel so callers can wait for
//! `Connected` with a deadline instead of polling.

mod link;
mod uplink;
mod websocket;

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

pub use link::{HostLink, NetworkLink, server_endpoint};
pub use uplink::Uplink;
pub use websocket::WsConnection;

use crate::Result;

/// Something the connection reports to the orchestrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Handshake completed
    Connected,
    /// The peer or the network closed the connection
    Disconnected,
    /// Transport error; usually followed by `Disconnected`
    Error(String),
    /// Control-plane text message
    Text(String),
    /// Reply audio
    Binary(Vec<u8>),
}

/// Connection lifecycle as observed from outside
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Duplex message channel to the speech service
#[async_trait]
pub trait Connection: Send + Sync {
    /// Open the connection; returns once connected or failed
    async fn connect(&self) -> Result<()>;

    /// Close the connection without reporting a `Disconnected` event
    async fn disconnect(&self);

    /// Check if connected
    fn is_connected(&self) -> bool;

    /// Send a binary message, returning the bytes sent
    async fn send_binary(&self, data: Vec<u8>) -> Result<usize>;

    /// Send a text message, returning the bytes sent
    async fn send_text(&self, text: String) -> Result<usize>;

    /// Watch the connection state
    fn subscribe_state(&self) -> watch::Receiver<ConnectionState>;
}

/// Wait until `state` reports `Connected`, for at most `limit`
pub async fn wait_connected(state: &mut watch::Receiver<ConnectionState>, limit: Duration) -> bool {
    matches!(
        tokio::time::timeout(limit, state.wait_for(|s| *s == ConnectionState::Connected)).await,
        Ok(Ok(_))
    )
}
