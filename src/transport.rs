//! The abstract bidirectional message channel.
//!
//! The engine treats the network as a pair of in-order, at-most-once message
//! streams. This module provides the in-process reference transport: two
//! unbounded channels, one per direction. A real deployment substitutes a
//! socket; nothing else in the engine changes.

use tokio::sync::mpsc;

use crate::protocol::{ClientMessage, ServerMessage};

/// The client's end of a connection.
pub struct ClientChannel {
    pub outbound: mpsc::UnboundedSender<ClientMessage>,
    pub inbound: mpsc::UnboundedReceiver<ServerMessage>,
}

/// The server's end of a connection.
pub struct ServerChannel {
    pub outbound: mpsc::UnboundedSender<ServerMessage>,
    pub inbound: mpsc::UnboundedReceiver<ClientMessage>,
}

/// Create a connected channel pair.
pub fn pair() -> (ClientChannel, ServerChannel) {
    let (client_tx, server_rx) = mpsc::unbounded_channel();
    let (server_tx, client_rx) = mpsc::unbounded_channel();
    (
        ClientChannel {
            outbound: client_tx,
            inbound: client_rx,
        },
        ServerChannel {
            outbound: server_tx,
            inbound: server_rx,
        },
    )
}
