//! Delivery primitive between the batcher and the UI process.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("destination closed")]
    Closed,
    #[error("send failed: {0}")]
    Send(String),
}

/// "Send to the other process" plus a liveness check.
///
/// `send` is called from inside a flush and must not call back into the
/// batcher that owns it.
pub trait Transport: Send + Sync + 'static {
    fn send(&self, channel: &str, payload: Value) -> Result<(), TransportError>;

    /// False once the destination is known to be gone. Pending batches are
    /// dropped rather than sent.
    fn is_alive(&self) -> bool {
        true
    }
}

/// A named message as it crosses the process boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub channel: String,
    pub payload: Value,
}

/// In-process duplex stand-in: envelopes go into an unbounded channel read
/// by the consumer side.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<Envelope>,
}

impl ChannelTransport {
    pub fn pair() -> (Self, mpsc::UnboundedReceiver<Envelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Transport for ChannelTransport {
    fn send(&self, channel: &str, payload: Value) -> Result<(), TransportError> {
        self.tx
            .send(Envelope {
                channel: channel.to_string(),
                payload,
            })
            .map_err(|_| TransportError::Closed)
    }

    fn is_alive(&self) -> bool {
        !self.tx.is_closed()
    }
}

#[cfg(feature = "tauri")]
impl<R: tauri::Runtime> Transport for tauri::AppHandle<R> {
    fn send(&self, channel: &str, payload: Value) -> Result<(), TransportError> {
        tauri::Emitter::emit(self, channel, payload).map_err(|e| TransportError::Send(e.to_string()))
    }
}
