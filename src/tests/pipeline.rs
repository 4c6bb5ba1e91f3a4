use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;
use tokio::time::sleep;

use super::{delta, snapshot, SETTLE};
use crate::bus::event_types::{
    CHANNEL_AGENT_ERROR, CHANNEL_AGENT_EVENT, CHANNEL_AGENT_STATUS, CHANNEL_METRICS, CHANNEL_SESSION_IDENTITY,
    CHANNEL_SESSION_UPDATED, CHANNEL_TERMINAL_OUTPUT,
};
use crate::bus::{EventScope, Priority};
use crate::config::PipelineConfig;
use crate::pipeline::Pipeline;
use crate::store::state::{SessionStatus, StreamKind};

fn content(pipeline: &Pipeline, session_id: &str, message_id: &str) -> Option<String> {
    let state = pipeline.store().get_state();
    let session = state.session(session_id)?;
    session.message(message_id).map(|m| m.content.clone())
}

fn started() -> Pipeline {
    let pipeline = Pipeline::start(PipelineConfig::default()).unwrap();
    pipeline.batcher().set_focused_workspace(Some("ws-a"));
    pipeline
}

#[tokio::test(start_paused = true)]
async fn test_streamed_text_lands_once_and_matching_snapshot_is_skipped() {
    let pipeline = started();
    let bus = pipeline.bus().clone();
    let scope = || EventScope::new("ws-a", "s1");

    bus.emit(CHANNEL_SESSION_UPDATED, snapshot("s1", "ws-a", &[("m1", "")]), scope());
    for piece in ["He", "llo", ", ", "world"] {
        bus.emit(CHANNEL_AGENT_EVENT, delta("m1", piece), scope());
    }
    sleep(SETTLE).await;
    assert_eq!(content(&pipeline, "s1", "m1").as_deref(), Some("Hello, world"));

    let notified = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&notified);
    let _subscription = pipeline.store().subscribe(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    bus.emit(
        CHANNEL_SESSION_UPDATED,
        snapshot("s1", "ws-a", &[("m1", "Hello, world")]),
        scope(),
    );
    sleep(SETTLE).await;

    assert_eq!(content(&pipeline, "s1", "m1").as_deref(), Some("Hello, world"));
    assert_eq!(notified.load(Ordering::SeqCst), 0);
    assert_eq!(pipeline.handler().stats().snapshots_skipped, 1);
    assert!(pipeline.batcher().stats().merged >= 3);

    pipeline.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_snapshot_flushes_buffered_text_before_patching() {
    let pipeline = started();
    let bus = pipeline.bus().clone();
    let scope = || EventScope::new("ws-a", "s1");

    bus.emit(CHANNEL_SESSION_UPDATED, snapshot("s1", "ws-a", &[("m1", "")]), scope());
    bus.emit(CHANNEL_AGENT_EVENT, delta("m1", "partial"), scope());
    // Past the batch interval, short of the stream flush interval.
    sleep(Duration::from_millis(20)).await;
    assert_eq!(pipeline.handler().buffer(StreamKind::Primary).pending(), 1);

    bus.emit(
        CHANNEL_SESSION_UPDATED,
        snapshot("s1", "ws-a", &[("m1", "partial answer")]),
        scope(),
    );
    sleep(SETTLE).await;

    assert_eq!(content(&pipeline, "s1", "m1").as_deref(), Some("partial answer"));
    assert_eq!(pipeline.handler().stats().snapshots_patched, 1);

    pipeline.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_agent_error_discards_buffered_text() {
    let pipeline = started();
    let bus = pipeline.bus().clone();
    let scope = || EventScope::new("ws-a", "s1");

    bus.emit(CHANNEL_SESSION_UPDATED, snapshot("s1", "ws-a", &[("m1", "")]), scope());
    bus.emit(CHANNEL_AGENT_EVENT, delta("m1", "doomed"), scope());
    sleep(Duration::from_millis(20)).await;

    bus.emit(CHANNEL_AGENT_ERROR, json!({ "message": "model overloaded" }), scope());
    sleep(SETTLE).await;

    let state = pipeline.store().get_state();
    let session = state.session("s1").unwrap();
    assert_eq!(session.status, SessionStatus::Error);
    assert_eq!(session.message("m1").unwrap().content, "");
    assert_eq!(
        state.activity("s1").and_then(|a| a.last_error.as_deref()),
        Some("model overloaded")
    );

    pipeline.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_background_workspace_waits_for_focus() {
    let pipeline = started();
    let bus = pipeline.bus().clone();
    let scope = || EventScope::new("ws-b", "s2");

    bus.emit(CHANNEL_SESSION_UPDATED, snapshot("s2", "ws-b", &[]), scope());
    sleep(Duration::from_millis(50)).await;
    assert!(pipeline.store().get_state().session("s2").is_none());
    assert_eq!(pipeline.batcher().queued(), (0, 1));

    pipeline.batcher().set_focused_workspace(Some("ws-b"));
    sleep(Duration::from_millis(1)).await;
    assert!(pipeline.store().get_state().session("s2").is_some());

    pipeline.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_running_session_lifts_background_throttle() {
    let pipeline = started();
    let bus = pipeline.bus().clone();
    pipeline.batcher().set_session_running("s2", true);
    assert!(pipeline.batcher().throttle_status().throttling_bypassed);

    bus.emit(CHANNEL_SESSION_UPDATED, snapshot("s2", "ws-b", &[]), EventScope::new("ws-b", "s2"));
    // One foreground interval, well short of the background interval.
    sleep(Duration::from_millis(20)).await;
    assert!(pipeline.store().get_state().session("s2").is_some());

    pipeline.batcher().set_session_running("s2", false);
    assert!(!pipeline.batcher().throttle_status().throttling_bypassed);

    pipeline.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_run_finished_settles_session() {
    let pipeline = started();
    let bus = pipeline.bus().clone();
    let scope = || EventScope::new("ws-a", "s1");

    bus.emit(CHANNEL_SESSION_UPDATED, snapshot("s1", "ws-a", &[]), scope());
    // Status and tool events overtake a queued snapshot.
    sleep(SETTLE).await;
    bus.emit(
        CHANNEL_AGENT_STATUS,
        json!({ "type": "status_changed", "status": "running" }),
        scope(),
    );
    bus.emit(
        CHANNEL_AGENT_EVENT,
        json!({ "type": "tool_started", "tool_call_id": "t1", "tool_name": "grep" }),
        scope(),
    );
    bus.emit(CHANNEL_METRICS, json!({ "output_tokens": 42 }), scope());
    sleep(SETTLE).await;

    {
        let state = pipeline.store().get_state();
        assert_eq!(state.session("s1").unwrap().status, SessionStatus::Running);
        let activity = state.activity("s1").unwrap();
        assert_eq!(activity.pending_tool.as_ref().map(|t| t.tool_name.as_str()), Some("grep"));
        assert_eq!(activity.metrics.map(|m| m.output_tokens), Some(42));
    }

    bus.emit(CHANNEL_AGENT_STATUS, json!({ "type": "run_finished" }), scope());
    sleep(SETTLE).await;

    let state = pipeline.store().get_state();
    assert_eq!(state.session("s1").unwrap().status, SessionStatus::Idle);
    assert!(state.activity("s1").unwrap().pending_tool.is_none());

    pipeline.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_identity_change_rekeys_session() {
    let pipeline = started();
    let bus = pipeline.bus().clone();

    bus.emit(
        CHANNEL_SESSION_UPDATED,
        snapshot("draft", "ws-a", &[("m1", "hi")]),
        EventScope::new("ws-a", "draft"),
    );
    sleep(SETTLE).await;

    bus.emit(
        CHANNEL_SESSION_IDENTITY,
        json!({ "previous_id": "draft", "session_id": "s-final" }),
        EventScope::unscoped(),
    );
    sleep(SETTLE).await;

    let state = pipeline.store().get_state();
    assert!(state.session("draft").is_none());
    assert_eq!(state.session("s-final").unwrap().message("m1").unwrap().content, "hi");

    pipeline.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_delivers_everything_in_flight() {
    let pipeline = started();
    let bus = pipeline.bus().clone();
    let scope = || EventScope::new("ws-a", "s1");

    bus.emit(CHANNEL_SESSION_UPDATED, snapshot("s1", "ws-a", &[("m1", "")]), scope());
    bus.emit(CHANNEL_AGENT_EVENT, delta("m1", "last words"), scope());
    bus.emit(
        CHANNEL_TERMINAL_OUTPUT,
        json!({ "terminal_id": 7, "data": "$ ls\n" }),
        EventScope::unscoped(),
    );
    // Let the bridge queue them; no timer has fired yet.
    sleep(Duration::from_millis(1)).await;
    assert!(pipeline.store().get_state().session("s1").is_none());

    let store = pipeline.store().clone();
    pipeline.shutdown().await;

    let state = store.get_state();
    assert_eq!(state.session("s1").unwrap().message("m1").unwrap().content, "last words");
    assert_eq!(state.terminal_output(7), Some("$ ls\n"));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_right_after_emit_loses_nothing() {
    let pipeline = started();
    let bus = pipeline.bus().clone();
    let scope = || EventScope::new("ws-a", "s1");

    bus.emit(CHANNEL_SESSION_UPDATED, snapshot("s1", "ws-a", &[("m1", "")]), scope());
    bus.emit(CHANNEL_AGENT_EVENT, delta("m1", "said in time"), scope());

    let store = pipeline.store().clone();
    pipeline.shutdown().await;

    let state = store.get_state();
    assert_eq!(state.session("s1").unwrap().message("m1").unwrap().content, "said in time");
}

#[tokio::test(start_paused = true)]
async fn test_focusing_a_session_mid_message_keeps_text_in_order() {
    let pipeline = started();
    let bus = pipeline.bus().clone();
    let scope = || EventScope::new("ws-b", "s2");

    bus.emit(CHANNEL_SESSION_UPDATED, snapshot("s2", "ws-b", &[("m1", "")]), scope());
    bus.emit(CHANNEL_AGENT_EVENT, delta("m1", "Hel"), scope());
    sleep(Duration::from_millis(1)).await;
    assert_eq!(pipeline.batcher().queued(), (0, 2));

    pipeline.batcher().set_focused_session(Some("s2"));
    bus.emit(CHANNEL_AGENT_EVENT, delta("m1", "lo"), scope());
    sleep(SETTLE).await;

    assert_eq!(content(&pipeline, "s2", "m1").as_deref(), Some("Hello"));

    pipeline.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_status_for_unseen_session_is_ignored() {
    let pipeline = started();
    let bus = pipeline.bus().clone();
    let scope = || EventScope::new("ws-a", "s1");

    let notified = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&notified);
    let _subscription = pipeline.store().subscribe(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    bus.emit(
        CHANNEL_AGENT_STATUS,
        json!({ "type": "status_changed", "status": "running" }),
        EventScope::new("ws-a", "ghost"),
    );
    sleep(SETTLE).await;
    assert!(pipeline.store().get_state().session("ghost").is_none());
    assert_eq!(notified.load(Ordering::SeqCst), 0);

    // Status is sent immediately and overtakes the queued snapshot, so it
    // lands on a session that does not exist yet and the snapshot wins.
    bus.emit(CHANNEL_SESSION_UPDATED, snapshot("s1", "ws-a", &[]), scope());
    bus.emit(
        CHANNEL_AGENT_STATUS,
        json!({ "type": "status_changed", "status": "running" }),
        scope(),
    );
    sleep(SETTLE).await;

    let state = pipeline.store().get_state();
    assert_eq!(state.session("s1").unwrap().status, SessionStatus::Idle);
    assert_eq!(notified.load(Ordering::SeqCst), 1);
    assert_eq!(pipeline.handler().stats().handled, 3);

    pipeline.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_explicit_priority_skips_the_queue() {
    let pipeline = started();
    let bus = pipeline.bus().clone();

    bus.emit_with_priority(
        CHANNEL_SESSION_UPDATED,
        snapshot("s1", "ws-a", &[]),
        EventScope::new("ws-a", "s1"),
        Some(Priority::Critical),
    );
    // Well before the batch interval.
    sleep(Duration::from_millis(1)).await;

    assert!(pipeline.store().get_state().session("s1").is_some());
    assert_eq!(pipeline.batcher().stats().immediate, 1);

    pipeline.shutdown().await;
}
