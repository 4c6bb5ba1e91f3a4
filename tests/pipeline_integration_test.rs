//! End-to-end tests across the process boundary: producer-side batcher on
//! one end, consumer-side handler and store on the other, with a recording
//! transport in between.

mod common;

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use serde_json::json;
use tokio::time::sleep;

use common::RecordingTransport;
use ui_relay::bus::event_types::{
    CHANNEL_AGENT_EVENT, CHANNEL_AGENT_STATUS, CHANNEL_METRICS, CHANNEL_SESSION_UPDATED,
};
use ui_relay::config::{BatcherConfig, StoreConfig, StreamConfig};
use ui_relay::store::state::SessionStatus;
use ui_relay::{EventBatcher, EventHandler, Store};

fn consumer() -> EventHandler {
    let store = Store::new(&StoreConfig::default());
    EventHandler::new(store, &StreamConfig::default()).unwrap()
}

fn batcher(transport: &RecordingTransport) -> EventBatcher {
    EventBatcher::new(BatcherConfig::default(), Arc::new(transport.clone())).unwrap()
}

fn delta(text: &str) -> serde_json::Value {
    json!({ "type": "message_delta", "session_id": "s1", "message_id": "m1", "delta": text })
}

#[tokio::test(start_paused = true)]
async fn test_critical_crosses_first_and_deltas_merge() {
    let transport = RecordingTransport::new();
    let batcher = batcher(&transport);

    batcher.send(CHANNEL_METRICS, json!({ "session_id": "s1", "output_tokens": 5 }), None);
    batcher.send(CHANNEL_AGENT_EVENT, delta("He"), None);
    batcher.send(CHANNEL_AGENT_EVENT, delta("llo"), None);
    batcher.send(
        CHANNEL_AGENT_STATUS,
        json!({ "type": "status_changed", "session_id": "s1", "status": "running" }),
        None,
    );

    assert_eq!(transport.channels(), vec![CHANNEL_AGENT_STATUS.to_string()]);

    sleep(Duration::from_millis(17)).await;
    let envelopes = transport.envelopes();
    assert_eq!(
        transport.channels(),
        vec![
            CHANNEL_AGENT_STATUS.to_string(),
            CHANNEL_AGENT_EVENT.to_string(),
            CHANNEL_METRICS.to_string(),
        ]
    );
    assert_eq!(envelopes[1].payload["delta"], "Hello");
    assert_eq!(batcher.stats().merged, 1);

    batcher.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_recorded_traffic_replays_into_store() {
    let transport = RecordingTransport::new();
    let batcher = batcher(&transport);
    let handler = consumer();

    batcher.send(
        CHANNEL_SESSION_UPDATED,
        json!({ "session": { "id": "s1", "status": "running" } }),
        None,
    );
    for piece in ["The ", "answer ", "is ", "42"] {
        batcher.send(CHANNEL_AGENT_EVENT, delta(piece), None);
    }
    sleep(Duration::from_millis(17)).await;

    for envelope in transport.take() {
        handler.handle_envelope(envelope);
    }
    sleep(Duration::from_millis(40)).await;

    let state = handler.store().get_state();
    let session = state.session("s1").unwrap();
    assert_eq!(session.status, SessionStatus::Running);
    assert_eq!(session.message("m1").unwrap().content, "The answer is 42");

    handler.handle(CHANNEL_AGENT_STATUS, json!({ "type": "run_finished", "session_id": "s1" }));
    assert_eq!(
        handler.store().get_state().session("s1").unwrap().status,
        SessionStatus::Idle
    );

    batcher.shutdown();
    handler.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_gone_destination_drops_and_counts() {
    let transport = RecordingTransport::new();
    let batcher = batcher(&transport);

    batcher.send(CHANNEL_AGENT_EVENT, delta("lost"), None);
    transport.kill();
    sleep(Duration::from_millis(17)).await;

    assert!(transport.envelopes().is_empty());
    assert_eq!(batcher.stats().dropped, 1);
    assert_eq!(batcher.queued(), (0, 0));

    batcher.shutdown();
}

#[test]
fn test_malformed_traffic_is_skipped() {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    runtime.block_on(async {
        let handler = consumer();
        handler.handle(CHANNEL_AGENT_EVENT, json!({ "type": "message_delta" }));
        handler.handle("nobody:listens", json!({}));
        handler.handle(CHANNEL_SESSION_UPDATED, json!({ "session": { "id": "s1" } }));

        let stats = handler.stats();
        assert_eq!(stats.malformed, 2);
        assert_eq!(stats.handled, 1);
        assert!(handler.store().get_state().session("s1").is_some());
        handler.shutdown();
    });
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_any_fragmentation_yields_the_same_text(
        fragments in prop::collection::vec("[a-z ]{0,12}", 1..40)
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .start_paused(true)
            .build()
            .unwrap();
        let expected: String = fragments.concat();
        let stored = runtime.block_on(async {
            let transport = RecordingTransport::new();
            let batcher = batcher(&transport);
            let handler = consumer();
            handler.handle(CHANNEL_SESSION_UPDATED, json!({ "session": { "id": "s1" } }));

            for (i, fragment) in fragments.iter().enumerate() {
                batcher.send(CHANNEL_AGENT_EVENT, delta(fragment), None);
                if i % 7 == 6 {
                    sleep(Duration::from_millis(5)).await;
                }
            }
            batcher.shutdown();
            for envelope in transport.take() {
                handler.handle_envelope(envelope);
            }
            handler.shutdown();

            handler
                .store()
                .get_state()
                .session("s1")
                .and_then(|s| s.message("m1").map(|m| m.content.clone()))
                .unwrap_or_default()
        });
        prop_assert_eq!(stored, expected);
    }
}
