//! Synthetic streaming load through the full pipeline.
//!
//! Several sessions across several workspaces stream message deltas, tool
//! lifecycle, progress and metrics through the bus. At the end each session
//! gets a final snapshot and a run-finished notice, and the store's text is
//! checked against what was streamed.

use std::time::{Duration, Instant};

use chrono::Utc;
use indicatif::ProgressBar;
use serde::Serialize;
use serde_json::json;

use crate::bus::event_types::{
    CHANNEL_AGENT_EVENT, CHANNEL_AGENT_STATUS, CHANNEL_METRICS, CHANNEL_SESSION_UPDATED,
};
use crate::bus::{BatcherStats, EventScope};
use crate::config::PipelineConfig;
use crate::consumer::HandlerStats;
use crate::pipeline::Pipeline;
use crate::RelayError;

/// Give the bus bridge a turn well before the broadcast ring fills.
const YIELD_EVERY: usize = 256;

#[derive(Debug, Clone)]
pub struct StreamLoadOptions {
    pub sessions: usize,
    pub workspaces: usize,
    pub messages_per_session: usize,
    pub fragments_per_message: usize,
    /// Pause between rounds so timers get a chance to fire.
    pub tick: Duration,
    /// Mark every session as running for the whole run.
    pub live_activity: bool,
    pub config: PipelineConfig,
}

impl Default for StreamLoadOptions {
    fn default() -> Self {
        Self {
            sessions: 8,
            workspaces: 3,
            messages_per_session: 4,
            fragments_per_message: 200,
            tick: Duration::from_millis(2),
            live_activity: false,
            config: PipelineConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamLoadReport {
    pub generated_at: String,
    pub sessions: usize,
    pub workspaces: usize,
    pub live_activity: bool,
    pub events_emitted: u64,
    pub elapsed_ms: f64,
    pub events_per_sec: f64,
    pub batcher: BatcherStats,
    pub handler: HandlerStats,
    pub store_notifications: u64,
    /// Store notifications per emitted event; lower means more coalescing.
    pub notification_ratio: f64,
    pub consistent_sessions: usize,
    pub inconsistent_sessions: Vec<String>,
}

struct SyntheticSession {
    id: String,
    workspace_id: String,
    /// Expected content per message, in order.
    messages: Vec<(String, String)>,
}

impl SyntheticSession {
    fn scope(&self) -> EventScope {
        EventScope::new(&self.workspace_id, &self.id)
    }

    fn snapshot(&self) -> serde_json::Value {
        let messages: Vec<_> = self
            .messages
            .iter()
            .map(|(id, content)| json!({ "id": id, "role": "assistant", "content": content }))
            .collect();
        json!({
            "session": {
                "id": self.id,
                "workspace_id": self.workspace_id,
                "title": format!("synthetic {}", self.id),
                "status": "idle",
                "messages": messages,
            }
        })
    }
}

pub async fn run_stream_load(
    options: &StreamLoadOptions,
    progress: Option<&ProgressBar>,
) -> Result<StreamLoadReport, RelayError> {
    let pipeline = Pipeline::start(options.config.clone())?;
    let bus = pipeline.bus().clone();
    let workspaces = options.workspaces.max(1);
    pipeline.batcher().set_focused_workspace(Some("ws-0"));

    let mut sessions: Vec<SyntheticSession> = (0..options.sessions)
        .map(|index| SyntheticSession {
            id: format!("session-{index}"),
            workspace_id: format!("ws-{}", index % workspaces),
            messages: Vec::new(),
        })
        .collect();

    let started = Instant::now();
    let mut emitted = 0u64;

    for session in &sessions {
        bus.emit(CHANNEL_SESSION_UPDATED, session.snapshot(), session.scope());
        emitted += 1;
        if options.live_activity {
            pipeline.batcher().set_session_running(&session.id, true);
        }
    }

    for round in 0..options.messages_per_session {
        for session in sessions.iter_mut() {
            let message_id = format!("m{round}");
            let tool_call_id = format!("{}-tool-{round}", session.id);
            bus.emit(
                CHANNEL_AGENT_EVENT,
                json!({ "type": "tool_started", "tool_call_id": tool_call_id, "tool_name": "search" }),
                session.scope(),
            );

            let mut content = String::new();
            for fragment in 0..options.fragments_per_message {
                let text = format!("w{fragment} ");
                bus.emit(
                    CHANNEL_AGENT_EVENT,
                    json!({ "type": "message_delta", "message_id": message_id, "delta": text }),
                    session.scope(),
                );
                content.push_str(&text);
                if fragment % YIELD_EVERY == YIELD_EVERY - 1 {
                    tokio::task::yield_now().await;
                }
                if fragment % 50 == 0 {
                    bus.emit(
                        CHANNEL_AGENT_EVENT,
                        json!({
                            "type": "progress",
                            "current": fragment,
                            "total": options.fragments_per_message,
                        }),
                        session.scope(),
                    );
                    emitted += 1;
                }
            }

            bus.emit(
                CHANNEL_AGENT_EVENT,
                json!({ "type": "tool_result", "tool_call_id": tool_call_id, "tool_name": "search" }),
                session.scope(),
            );
            bus.emit(
                CHANNEL_METRICS,
                json!({ "output_tokens": (round + 1) * options.fragments_per_message }),
                session.scope(),
            );
            emitted += options.fragments_per_message as u64 + 3;
            session.messages.push((message_id, content));

            if let Some(pb) = progress {
                pb.inc(1);
            }
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(options.tick).await;
    }

    for session in &sessions {
        bus.emit(CHANNEL_SESSION_UPDATED, session.snapshot(), session.scope());
        bus.emit(CHANNEL_AGENT_STATUS, json!({ "type": "run_finished" }), session.scope());
        emitted += 2;
        if options.live_activity {
            pipeline.batcher().set_session_running(&session.id, false);
        }
    }

    // Long enough for the slowest queue and the consumer buffers to drain.
    let settle = options.config.batcher.background_interval() + options.config.stream.flush_interval() * 2;
    tokio::time::sleep(settle).await;

    let batcher = pipeline.batcher().stats();
    let handler = pipeline.handler().stats();
    let store = pipeline.store().clone();
    pipeline.shutdown().await;
    let elapsed = started.elapsed();

    let state = store.get_state();
    let mut inconsistent_sessions = Vec::new();
    for session in &sessions {
        let Some(stored) = state.session(&session.id) else {
            inconsistent_sessions.push(session.id.clone());
            continue;
        };
        let matches = stored.messages.len() == session.messages.len()
            && stored
                .messages
                .iter()
                .zip(&session.messages)
                .all(|(stored, (id, content))| stored.id == *id && stored.content == *content);
        if !matches {
            inconsistent_sessions.push(session.id.clone());
        }
    }

    let store_notifications = store.notification_count();
    let elapsed_secs = elapsed.as_secs_f64();
    Ok(StreamLoadReport {
        generated_at: Utc::now().to_rfc3339(),
        sessions: sessions.len(),
        workspaces,
        live_activity: options.live_activity,
        events_emitted: emitted,
        elapsed_ms: elapsed_secs * 1000.0,
        events_per_sec: if elapsed_secs > 0.0 { emitted as f64 / elapsed_secs } else { 0.0 },
        batcher,
        handler,
        store_notifications,
        notification_ratio: if emitted > 0 {
            store_notifications as f64 / emitted as f64
        } else {
            0.0
        },
        consistent_sessions: sessions.len() - inconsistent_sessions.len(),
        inconsistent_sessions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_small_load_is_consistent_and_coalesced() {
        let options = StreamLoadOptions {
            sessions: 3,
            workspaces: 2,
            messages_per_session: 2,
            fragments_per_message: 20,
            ..StreamLoadOptions::default()
        };
        let report = run_stream_load(&options, None).await.unwrap();

        assert_eq!(report.inconsistent_sessions, Vec::<String>::new());
        assert_eq!(report.consistent_sessions, 3);
        assert!(report.batcher.merged > 0);
        assert_eq!(report.batcher.dropped, 0);
        assert!(report.store_notifications < report.events_emitted);
    }
}
