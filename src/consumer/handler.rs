use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::bus::Envelope;
use crate::config::StreamConfig;
use crate::store::delta::compute_delta;
use crate::store::state::{PendingTool, Progress, Session, SessionStatus, ToolOutcome};
use crate::store::{Action, Store, StreamKind};
use crate::stream::{StreamingDeltaBuffer, TerminalBuffer};
use crate::RelayError;

use super::events::{AgentActivity, LogLevel, StatusNotice, UiEvent};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HandlerStats {
    pub handled: u64,
    pub malformed: u64,
    /// Snapshots identical to the stored session.
    pub snapshots_skipped: u64,
    pub snapshots_patched: u64,
    pub snapshots_replaced: u64,
}

#[derive(Default)]
struct Counters {
    handled: AtomicU64,
    malformed: AtomicU64,
    snapshots_skipped: AtomicU64,
    snapshots_patched: AtomicU64,
    snapshots_replaced: AtomicU64,
}

/// Routes each decoded event into the stream buffers or the store.
///
/// Status and errors go straight to the store. Text deltas and terminal
/// output go through their buffers. Snapshots are diffed against the stored
/// session, after that session's buffered text has been flushed.
pub struct EventHandler {
    store: Store,
    primary: StreamingDeltaBuffer,
    reasoning: StreamingDeltaBuffer,
    terminal: TerminalBuffer,
    counters: Counters,
}

impl EventHandler {
    pub fn new(store: Store, config: &StreamConfig) -> Result<Self, RelayError> {
        Ok(Self {
            primary: StreamingDeltaBuffer::new(StreamKind::Primary, config, store.clone())?,
            reasoning: StreamingDeltaBuffer::new(StreamKind::Reasoning, config, store.clone())?,
            terminal: TerminalBuffer::new(config, store.clone())?,
            store,
            counters: Counters::default(),
        })
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn buffer(&self, kind: StreamKind) -> &StreamingDeltaBuffer {
        match kind {
            StreamKind::Primary => &self.primary,
            StreamKind::Reasoning => &self.reasoning,
        }
    }

    pub fn terminal(&self) -> &TerminalBuffer {
        &self.terminal
    }

    pub fn stats(&self) -> HandlerStats {
        let c = &self.counters;
        HandlerStats {
            handled: c.handled.load(Ordering::Relaxed),
            malformed: c.malformed.load(Ordering::Relaxed),
            snapshots_skipped: c.snapshots_skipped.load(Ordering::Relaxed),
            snapshots_patched: c.snapshots_patched.load(Ordering::Relaxed),
            snapshots_replaced: c.snapshots_replaced.load(Ordering::Relaxed),
        }
    }

    /// Decode and apply one message. Malformed payloads are logged and
    /// skipped.
    pub fn handle(&self, channel: &str, payload: Value) {
        match UiEvent::decode(channel, payload) {
            Ok(event) => self.apply(event),
            Err(e) => {
                self.counters.malformed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("skipping event: {e}");
            }
        }
    }

    pub fn handle_envelope(&self, envelope: Envelope) {
        self.handle(&envelope.channel, envelope.payload);
    }

    pub fn apply(&self, event: UiEvent) {
        self.counters.handled.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(channel = event.channel(), session_id = ?event.session_id(), "applying event");
        match event {
            UiEvent::Activity(activity) => self.apply_activity(activity),

            UiEvent::Status(StatusNotice::StatusChanged { session_id, status }) => {
                if status.ends_stream() {
                    self.clear_buffers(&session_id);
                }
                self.store.dispatch(Action::SetStatus { session_id, status });
            }

            UiEvent::Status(StatusNotice::RunFinished { session_id }) => {
                self.clear_buffers(&session_id);
                self.store.dispatch_batch(vec![
                    Action::ClearPendingTool {
                        session_id: session_id.clone(),
                    },
                    Action::ClearError {
                        session_id: session_id.clone(),
                    },
                    Action::SetStatus {
                        session_id,
                        status: SessionStatus::Idle,
                    },
                ]);
            }

            UiEvent::AgentError(notice) => {
                self.clear_buffers(&notice.session_id);
                self.store.dispatch_batch(vec![
                    Action::ClearPendingTool {
                        session_id: notice.session_id.clone(),
                    },
                    Action::SetError {
                        session_id: notice.session_id.clone(),
                        message: notice.message,
                    },
                    Action::SetStatus {
                        session_id: notice.session_id,
                        status: SessionStatus::Error,
                    },
                ]);
            }

            UiEvent::WorkspaceError(notice) => self.store.dispatch(Action::SetWorkspaceError {
                workspace_id: notice.workspace_id,
                message: notice.message,
            }),

            UiEvent::SessionSnapshot(session) => self.apply_snapshot(session),

            UiEvent::SessionIdentity(change) => {
                self.flush_buffers(&change.previous_id);
                self.store.dispatch(Action::RekeySession {
                    previous_id: change.previous_id,
                    session_id: change.session_id,
                });
            }

            UiEvent::TerminalOutput(chunk) => self.terminal.append(chunk.terminal_id, &chunk.data),

            UiEvent::Metrics(update) => self.store.dispatch(Action::UpdateMetrics {
                session_id: update.session_id,
                metrics: update.metrics,
            }),

            UiEvent::Diagnostic(log) => match log.level {
                LogLevel::Debug => tracing::debug!(target: "ui_relay::diagnostics", "{}", log.message),
                LogLevel::Info => tracing::info!(target: "ui_relay::diagnostics", "{}", log.message),
                LogLevel::Warn => tracing::warn!(target: "ui_relay::diagnostics", "{}", log.message),
                LogLevel::Error => tracing::error!(target: "ui_relay::diagnostics", "{}", log.message),
            },
        }
    }

    fn apply_activity(&self, activity: AgentActivity) {
        match activity {
            AgentActivity::MessageDelta {
                session_id,
                message_id,
                delta,
                is_reasoning,
            } => self
                .buffer(StreamKind::from_reasoning_flag(is_reasoning))
                .append_delta(&session_id, &message_id, &delta),

            AgentActivity::ToolStarted {
                session_id,
                tool_call_id,
                tool_name,
            } => self.store.dispatch(Action::ToolStarted {
                session_id,
                tool: PendingTool {
                    tool_call_id,
                    tool_name,
                },
            }),

            AgentActivity::ToolResult {
                session_id,
                tool_call_id,
                tool_name,
                success,
                summary,
            } => self.store.dispatch(Action::ToolFinished {
                session_id,
                outcome: ToolOutcome {
                    tool_call_id,
                    tool_name,
                    success,
                    summary,
                },
            }),

            AgentActivity::Progress {
                session_id,
                label,
                current,
                total,
            } => self.store.dispatch(Action::SetProgress {
                session_id,
                progress: Some(Progress { label, current, total }),
            }),
        }
    }

    /// Buffered text for the session is applied first, so the snapshot's
    /// completed text overwrites it instead of being appended to.
    fn apply_snapshot(&self, session: Session) {
        self.flush_buffers(&session.id);

        let state = self.store.get_state();
        let existing = state.session(&session.id);
        let action = match existing {
            Some(existing) if existing.workspace_id == session.workspace_id => {
                match compute_delta(existing, &session) {
                    None => {
                        self.counters.snapshots_skipped.fetch_add(1, Ordering::Relaxed);
                        return;
                    }
                    Some(patch) => {
                        self.counters.snapshots_patched.fetch_add(1, Ordering::Relaxed);
                        Action::PatchSession {
                            patch,
                            snapshot: Arc::new(session),
                        }
                    }
                }
            }
            _ => {
                self.counters.snapshots_replaced.fetch_add(1, Ordering::Relaxed);
                Action::ReplaceSession(Arc::new(session))
            }
        };
        self.store.dispatch(action);
    }

    fn flush_buffers(&self, session_id: &str) {
        self.primary.flush_session(session_id, true);
        self.reasoning.flush_session(session_id, true);
    }

    fn clear_buffers(&self, session_id: &str) {
        self.primary.clear_buffer(session_id);
        self.reasoning.clear_buffer(session_id);
    }

    /// Consume envelopes until the channel closes or `stop` fires. On stop,
    /// whatever is already in the channel is handled before returning.
    pub fn spawn(
        self: Arc<Self>,
        mut rx: mpsc::UnboundedReceiver<Envelope>,
        mut stop: oneshot::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = &mut stop => {
                        while let Ok(envelope) = rx.try_recv() {
                            self.handle_envelope(envelope);
                        }
                        break;
                    }
                    received = rx.recv() => match received {
                        Some(envelope) => self.handle_envelope(envelope),
                        None => break,
                    },
                }
            }
            tracing::debug!("event handler loop exited");
        })
    }

    /// Flush every buffer once and stop their timers.
    pub fn shutdown(&self) {
        self.primary.shutdown();
        self.reasoning.shutdown();
        self.terminal.shutdown();
    }
}
