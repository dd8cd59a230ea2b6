//! Outbound side of a device connection.
//!
//! Writes are fire-and-forget: `send` only enqueues, a writer task owned by
//! the server drains the queue onto the socket. This keeps callers that hold
//! in-memory locks away from socket I/O.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::protocol::ServerMessage;

/// Write handle for one device connection.
pub trait Transport: Send + Sync {
    /// Queue a message for the device.
    fn send(&self, message: ServerMessage) -> Result<(), TransportError>;

    /// Close the connection. Calling this more than once is a no-op.
    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// Shared transport handle.
pub type SharedTransport = Arc<dyn Transport>;

/// Item consumed by the connection writer.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Message(ServerMessage),
    Close,
}

/// Transport backed by an unbounded mpsc queue.
#[derive(Debug)]
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<Outbound>,
    closed: AtomicBool,
}

impl ChannelTransport {
    /// Create a transport and the receiver the writer task drains.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            tx,
            closed: AtomicBool::new(false),
        });
        (transport, rx)
    }
}

impl Transport for ChannelTransport {
    fn send(&self, message: ServerMessage) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        self.tx
            .send(Outbound::Message(message))
            .map_err(|_| TransportError::Send("connection writer is gone".to_string()))
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        // The writer may already have exited; nothing left to close then.
        let _ = self.tx.send(Outbound::Close);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::TimeValue;

    #[test]
    fn test_send_then_close() {
        let (transport, mut rx) = ChannelTransport::new();
        let ping = ServerMessage::PingResult {
            time_value: TimeValue::new(1, 2),
        };
        transport.send(ping.clone()).unwrap();
        transport.close();
        transport.close();

        assert_eq!(rx.try_recv().unwrap(), Outbound::Message(ping.clone()));
        assert_eq!(rx.try_recv().unwrap(), Outbound::Close);
        assert!(rx.try_recv().is_err());
        assert_eq!(transport.send(ping), Err(TransportError::Closed));
    }

    #[test]
    fn test_send_after_writer_dropped() {
        let (transport, rx) = ChannelTransport::new();
        drop(rx);
        let result = transport.send(ServerMessage::PingResult {
            time_value: TimeValue::default(),
        });
        assert!(matches!(result, Err(TransportError::Send(_))));
    }
}
