//! Fan-out of shutdown ops across a snapshot of live connections.
//!
//! The snapshot is taken under the server's global lock; the fan-out itself
//! runs lock-free and concurrently with everything else. Each snapshotted
//! connection holds one broadcast reference, released as soon as its op has
//! been issued.

use bytes::Bytes;
use std::sync::Arc;
use tracing::debug;

use crate::channel::Connection;
use crate::transport::{GoAway, TransportOp};

/// Message carried on graceful-close notices.
pub(crate) const GOAWAY_MESSAGE: &[u8] = b"Server shutdown";

pub(crate) struct ChannelBroadcaster {
    channels: Vec<Arc<Connection>>,
}

impl ChannelBroadcaster {
    /// Caller must hold the global lock while collecting `channels`.
    pub fn new(channels: Vec<Arc<Connection>>) -> Self {
        Self { channels }
    }

    /// Issue one op per snapshotted connection: GOAWAY for graceful
    /// shutdown, disconnect for cancellation, or both.
    pub fn shutdown(self, send_goaway: bool, force_disconnect: bool) {
        debug!(
            connections = self.channels.len(),
            send_goaway, force_disconnect, "broadcasting shutdown op"
        );
        for channel in self.channels {
            let op = TransportOp {
                goaway: send_goaway.then(|| GoAway {
                    message: Bytes::from_static(GOAWAY_MESSAGE),
                }),
                disconnect: force_disconnect,
                ..TransportOp::default()
            };
            channel.perform(op);
            // channel's broadcast reference drops here
        }
    }
}
