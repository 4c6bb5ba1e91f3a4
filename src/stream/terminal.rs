use crate::config::StreamConfig;
use crate::store::{Action, Store};
use crate::RelayError;

use super::coalescer::{Coalescer, Flushed};

/// Terminal output coalescer keyed by terminal id.
///
/// Bursts of small writes become one `AppendTerminalOutput` per terminal,
/// emitted in the order terminals first produced output.
pub struct TerminalBuffer {
    coalescer: Coalescer<u32>,
}

impl TerminalBuffer {
    pub fn new(config: &StreamConfig, store: Store) -> Result<Self, RelayError> {
        let sink = Box::new(move |flushed: Vec<Flushed<u32>>| {
            let actions = flushed
                .into_iter()
                .map(|chunk| Action::AppendTerminalOutput {
                    terminal_id: chunk.key,
                    data: chunk.text,
                })
                .collect();
            store.dispatch_batch(actions);
        });
        let coalescer = Coalescer::new(
            "terminal",
            config.terminal_flush_interval(),
            config.terminal_max_bytes,
            str::len,
            sink,
        )?;
        Ok(Self { coalescer })
    }

    pub fn append(&self, terminal_id: u32, data: &str) {
        self.coalescer.append(terminal_id, data);
    }

    pub fn flush_all(&self) {
        self.coalescer.flush_all();
    }

    pub fn pending(&self) -> usize {
        self.coalescer.pending()
    }

    pub fn shutdown(&self) {
        self.coalescer.shutdown();
    }
}
