//! UI relay library.
//!
//! Moves a high-volume stream of agent activity (text deltas, tool
//! lifecycle, progress, terminal bytes) from a backend process to UI state
//! without flooding the receiving side.
//!
//! # Architecture
//!
//! - `bus`: producer side. Priority classification, batching, merging and
//!   workspace-scoped background throttling in front of a `Transport`.
//! - `consumer`: decodes `(channel, payload)` into a closed `UiEvent` and
//!   routes each kind into stream buffers or store actions.
//! - `stream`: coalescing buffers for streamed text and terminal output.
//! - `store`: immutable `AppState` behind a pure reducer, with batched
//!   subscriber notification and a session delta computer.
//! - `pipeline`: explicit bootstrap and ordered teardown of the above.

pub mod bench;
pub mod bus;
pub mod config;
pub mod consumer;
pub mod pipeline;
pub mod store;
pub mod stream;

#[cfg(test)]
mod tests;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use bus::{EventBatcher, EventBus, Priority, Transport};
pub use config::PipelineConfig;
pub use consumer::{EventHandler, UiEvent};
pub use pipeline::Pipeline;
pub use store::Store;

// ---------------------------------------------------------------------------
// Shared error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("{0}")]
    Config(#[from] config::ConfigError),
    #[error("{0}")]
    Transport(#[from] bus::TransportError),
    #[error("{0}")]
    Decode(#[from] consumer::DecodeError),
    #[error("no tokio runtime available: {0}")]
    Runtime(String),
}

// ---------------------------------------------------------------------------
// Shared helper functions
// ---------------------------------------------------------------------------

/// Lock a mutex, recovering the data if a previous holder panicked. State
/// guarded here stays consistent across a panicking subscriber.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Install the fmt subscriber. `RUST_LOG` wins over the default filter.
/// Safe to call more than once.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("ui_relay=debug,info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
