// tests/common/recording_transport.rs
//! Transport that records what crosses the boundary instead of sending it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use ui_relay::bus::{Envelope, Transport, TransportError};

/// Records every envelope in send order. Can be switched to "destination
/// gone" to exercise the drop path.
#[derive(Clone, Default)]
pub struct RecordingTransport {
    sent: Arc<Mutex<Vec<Envelope>>>,
    dead: Arc<AtomicBool>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the destination as gone.
    pub fn kill(&self) {
        self.dead.store(true, Ordering::SeqCst);
    }

    pub fn envelopes(&self) -> Vec<Envelope> {
        self.sent.lock().unwrap().clone()
    }

    pub fn channels(&self) -> Vec<String> {
        self.envelopes().into_iter().map(|e| e.channel).collect()
    }

    /// Remove and return everything recorded so far.
    pub fn take(&self) -> Vec<Envelope> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }
}

impl Transport for RecordingTransport {
    fn send(&self, channel: &str, payload: Value) -> Result<(), TransportError> {
        if self.dead.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.sent.lock().unwrap().push(Envelope {
            channel: channel.to_string(),
            payload,
        });
        Ok(())
    }

    fn is_alive(&self) -> bool {
        !self.dead.load(Ordering::SeqCst)
    }
}
