// tests/common/mod.rs
//! Common test utilities for relay integration tests.

pub mod recording_transport;

pub use recording_transport::RecordingTransport;
