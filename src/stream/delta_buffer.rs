use crate::config::StreamConfig;
use crate::store::{Action, Store, StreamKind};
use crate::RelayError;

use super::coalescer::{Coalescer, Flushed};

type MessageKey = (String, String);

/// Per-(session, message) text accumulator.
///
/// Fragments are concatenated and dispatched as one `AppendMessageText`
/// action per message on a fixed interval, or as soon as a message's
/// pending text reaches `max_buffer_chars`. The primary and reasoning
/// streams use separate instances.
///
/// Store listeners reached from a flush run under this buffer's emit lock
/// and must not call back into it.
pub struct StreamingDeltaBuffer {
    kind: StreamKind,
    coalescer: Coalescer<MessageKey>,
}

impl StreamingDeltaBuffer {
    pub fn new(kind: StreamKind, config: &StreamConfig, store: Store) -> Result<Self, RelayError> {
        let name = match kind {
            StreamKind::Primary => "primary",
            StreamKind::Reasoning => "reasoning",
        };
        let sink = Box::new(move |flushed: Vec<Flushed<MessageKey>>| {
            let actions = flushed
                .into_iter()
                .map(|Flushed { key: (session_id, message_id), text, .. }| Action::AppendMessageText {
                    session_id,
                    message_id,
                    text,
                    stream: kind,
                })
                .collect();
            store.dispatch_batch(actions);
        });
        let coalescer = Coalescer::new(
            name,
            config.flush_interval(),
            config.max_buffer_chars,
            |text| text.chars().count(),
            sink,
        )?;
        Ok(Self { kind, coalescer })
    }

    pub fn append_delta(&self, session_id: &str, message_id: &str, text: &str) {
        self.coalescer
            .append((session_id.to_string(), message_id.to_string()), text);
    }

    /// Drop pending text for a session without applying it.
    pub fn clear_buffer(&self, session_id: &str) -> usize {
        let dropped = self.coalescer.discard_where(|(session, _)| session == session_id);
        if dropped > 0 {
            tracing::debug!(session_id, stream = ?self.kind, dropped, "discarded buffered deltas");
        }
        dropped
    }

    /// Apply a session's pending text now. `force = false` only flushes
    /// entries that have already waited a full interval.
    pub fn flush_session(&self, session_id: &str, force: bool) {
        self.coalescer
            .flush_where(|(session, _)| session == session_id, force);
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::store::Session;
    use std::sync::Arc;
    use std::time::Duration;

    fn store_with_session() -> Store {
        let store = Store::new(&StoreConfig::default());
        store.dispatch(Action::ReplaceSession(Arc::new(Session::new("s1", None))));
        store
    }

    fn content(store: &Store, message_id: &str) -> Option<(String, String)> {
        let state = store.get_state();
        let message = state.session("s1")?.message(message_id)?.clone();
        Some((message.content, message.reasoning))
    }

    #[tokio::test(start_paused = true)]
    async fn test_fragments_coalesce_into_one_dispatch() {
        let store = store_with_session();
        let before = store.notification_count();
        let buffer = StreamingDeltaBuffer::new(StreamKind::Primary, &StreamConfig::default(), store.clone()).unwrap();

        for fragment in ["He", "l", "lo"] {
            buffer.append_delta("s1", "m1", fragment);
        }
        assert_eq!(content(&store, "m1"), None);

        tokio::time::sleep(Duration::from_millis(33)).await;
        assert_eq!(content(&store, "m1"), Some(("Hello".into(), String::new())));
        assert_eq!(store.notification_count(), before + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reasoning_instance_writes_reasoning_field() {
        let store = store_with_session();
        let primary = StreamingDeltaBuffer::new(StreamKind::Primary, &StreamConfig::default(), store.clone()).unwrap();
        let reasoning =
            StreamingDeltaBuffer::new(StreamKind::Reasoning, &StreamConfig::default(), store.clone()).unwrap();

        reasoning.append_delta("s1", "m1", "let me think");
        primary.append_delta("s1", "m1", "answer");
        primary.flush_session("s1", true);
        reasoning.flush_session("s1", true);

        assert_eq!(content(&store, "m1"), Some(("answer".into(), "let me think".into())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_size_cap_flushes_early() {
        let store = store_with_session();
        let config = StreamConfig {
            max_buffer_chars: 5,
            ..StreamConfig::default()
        };
        let buffer = StreamingDeltaBuffer::new(StreamKind::Primary, &config, store.clone()).unwrap();
        buffer.append_delta("s1", "m1", "héllo");
        assert_eq!(content(&store, "m1"), Some(("héllo".into(), String::new())));
        assert_eq!(buffer.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_buffer_drops_only_that_session() {
        let store = store_with_session();
        let buffer = StreamingDeltaBuffer::new(StreamKind::Primary, &StreamConfig::default(), store.clone()).unwrap();
        buffer.append_delta("s1", "m1", "partial");
        buffer.append_delta("s2", "m9", "other");

        assert_eq!(buffer.clear_buffer("s1"), 1);
        assert_eq!(buffer.pending(), 1);
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(content(&store, "m1"), None);
    }
}
