//! Consumer-side coalescing buffers.
//!
//! Incoming fragments are accumulated per key and applied to the store as
//! one action per key on a short interval, independent of the producer's
//! batching cadence.

mod coalescer;
mod delta_buffer;
mod terminal;

pub use coalescer::Flushed;
pub use delta_buffer::StreamingDeltaBuffer;
pub use terminal::TerminalBuffer;
