//! Pure reducer over [`AppState`].
//!
//! `reduce` never mutates its input. When an action changes nothing it
//! returns the same `Arc`, which is how the store decides not to notify.

use std::sync::Arc;

use super::delta::{apply_patch, SessionPatch};
use super::state::{
    AppState, Message, Metrics, PendingTool, Progress, Session, SessionActivity, SessionStatus,
    StreamKind, ToolOutcome, TERMINAL_SCROLLBACK_BYTES, TOOL_HISTORY_LIMIT,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    ReplaceSession(Arc<Session>),
    /// Field-level update. `snapshot` is the full session the patch was
    /// computed from and replaces the stored one if the patch does not fit.
    PatchSession {
        patch: SessionPatch,
        snapshot: Arc<Session>,
    },
    /// A provisional session id became permanent.
    RekeySession {
        previous_id: String,
        session_id: String,
    },
    SetStatus {
        session_id: String,
        status: SessionStatus,
    },
    AppendMessageText {
        session_id: String,
        message_id: String,
        text: String,
        stream: StreamKind,
    },
    ToolStarted {
        session_id: String,
        tool: PendingTool,
    },
    ToolFinished {
        session_id: String,
        outcome: ToolOutcome,
    },
    ClearPendingTool {
        session_id: String,
    },
    SetError {
        session_id: String,
        message: String,
    },
    ClearError {
        session_id: String,
    },
    SetWorkspaceError {
        workspace_id: String,
        message: Option<String>,
    },
    SetProgress {
        session_id: String,
        progress: Option<Progress>,
    },
    UpdateMetrics {
        session_id: String,
        metrics: Metrics,
    },
    AppendTerminalOutput {
        terminal_id: u32,
        data: String,
    },
}

impl Action {
    /// Cosmetic updates the store may hold back for one micro-batch.
    pub fn is_deferrable(&self) -> bool {
        matches!(self, Self::SetProgress { .. } | Self::UpdateMetrics { .. })
    }
}

pub fn reduce(state: &Arc<AppState>, action: Action) -> Arc<AppState> {
    match apply(state, action) {
        Some(next) => Arc::new(next),
        None => Arc::clone(state),
    }
}

/// `None` means the action was a no-op.
fn apply(state: &AppState, action: Action) -> Option<AppState> {
    match action {
        Action::ReplaceSession(session) => replace_session(state, session),

        Action::PatchSession { patch, snapshot } => {
            let patched = state
                .session(&patch.session_id)
                .and_then(|existing| apply_patch(existing, &patch));
            match patched {
                Some(session) => replace_session(state, Arc::new(session)),
                None => replace_session(state, snapshot),
            }
        }

        Action::RekeySession { previous_id, session_id } => rekey_session(state, &previous_id, session_id),

        Action::SetStatus { session_id, status } => update_session(state, &session_id, |session| {
            (session.status != status).then(|| Session {
                status,
                ..session.clone()
            })
        }),

        Action::AppendMessageText {
            session_id,
            message_id,
            text,
            stream,
        } => {
            if text.is_empty() {
                return None;
            }
            update_session(state, &session_id, |session| {
                let mut next = session.clone();
                let index = match next.messages.iter().position(|m| m.id == message_id) {
                    Some(index) => index,
                    None => {
                        next.messages.push(Message::assistant(message_id));
                        next.messages.len() - 1
                    }
                };
                let message = &mut next.messages[index];
                match stream {
                    StreamKind::Primary => message.content.push_str(&text),
                    StreamKind::Reasoning => message.reasoning.push_str(&text),
                }
                Some(next)
            })
        }

        Action::ToolStarted { session_id, tool } => update_activity(state, &session_id, |activity| {
            if activity.pending_tool.as_ref() == Some(&tool) {
                return false;
            }
            activity.pending_tool = Some(tool);
            true
        }),

        Action::ToolFinished { session_id, outcome } => update_activity(state, &session_id, |activity| {
            if activity
                .pending_tool
                .as_ref()
                .is_some_and(|pending| pending.tool_call_id == outcome.tool_call_id)
            {
                activity.pending_tool = None;
            }
            activity.tool_results.push(outcome);
            let overflow = activity.tool_results.len().saturating_sub(TOOL_HISTORY_LIMIT);
            activity.tool_results.drain(..overflow);
            true
        }),

        Action::ClearPendingTool { session_id } => {
            update_activity(state, &session_id, |activity| activity.pending_tool.take().is_some())
        }

        Action::SetError { session_id, message } => update_activity(state, &session_id, |activity| {
            if activity.last_error.as_deref() == Some(message.as_str()) {
                return false;
            }
            activity.last_error = Some(message);
            true
        }),

        Action::ClearError { session_id } => {
            update_activity(state, &session_id, |activity| activity.last_error.take().is_some())
        }

        Action::SetWorkspaceError { workspace_id, message } => {
            if state.workspace_errors.get(&workspace_id) == message.as_ref() {
                return None;
            }
            let mut next = state.clone();
            match message {
                Some(message) => next.workspace_errors.insert(workspace_id, message),
                None => next.workspace_errors.remove(&workspace_id),
            };
            Some(next)
        }

        Action::SetProgress { session_id, progress } => update_activity(state, &session_id, |activity| {
            if activity.progress == progress {
                return false;
            }
            activity.progress = progress;
            true
        }),

        Action::UpdateMetrics { session_id, metrics } => update_activity(state, &session_id, |activity| {
            if activity.metrics == Some(metrics) {
                return false;
            }
            activity.metrics = Some(metrics);
            true
        }),

        Action::AppendTerminalOutput { terminal_id, data } => {
            if data.is_empty() {
                return None;
            }
            let mut next = state.clone();
            let output = next.terminals.entry(terminal_id).or_default();
            output.push_str(&data);
            trim_front(output, TERMINAL_SCROLLBACK_BYTES);
            Some(next)
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn replace_session(state: &AppState, session: Arc<Session>) -> Option<AppState> {
    if let Some(existing) = state.sessions.get(&session.id) {
        if Arc::ptr_eq(existing, &session) || **existing == *session {
            return None;
        }
    }
    let mut next = state.clone();
    if !next.sessions.contains_key(&session.id) {
        next.session_order.push(session.id.clone());
    }
    next.sessions.insert(session.id.clone(), session);
    Some(next)
}

/// Unknown sessions are a silent no-op.
fn update_session<F>(state: &AppState, session_id: &str, update: F) -> Option<AppState>
where
    F: FnOnce(&Session) -> Option<Session>,
{
    let session = update(state.sessions.get(session_id)?)?;
    let mut next = state.clone();
    next.sessions.insert(session_id.to_string(), Arc::new(session));
    Some(next)
}

/// `update` returns whether it changed anything.
fn update_activity<F>(state: &AppState, session_id: &str, update: F) -> Option<AppState>
where
    F: FnOnce(&mut SessionActivity) -> bool,
{
    let mut activity = state.activity.get(session_id).cloned().unwrap_or_default();
    if !update(&mut activity) {
        return None;
    }
    let mut next = state.clone();
    next.activity.insert(session_id.to_string(), activity);
    Some(next)
}

fn rekey_session(state: &AppState, previous_id: &str, session_id: String) -> Option<AppState> {
    if previous_id == session_id {
        return None;
    }
    let session = state.sessions.get(previous_id)?;

    let mut next = state.clone();
    next.sessions.remove(previous_id);
    if next.sessions.contains_key(&session_id) {
        // The permanent session already arrived; the provisional one is stale.
        next.session_order.retain(|id| id != previous_id);
    } else {
        let renamed = Session {
            id: session_id.clone(),
            ..Session::clone(session)
        };
        for id in next.session_order.iter_mut().filter(|id| id.as_str() == previous_id) {
            *id = session_id.clone();
        }
        next.sessions.insert(session_id.clone(), Arc::new(renamed));
    }
    if let Some(activity) = next.activity.remove(previous_id) {
        next.activity.entry(session_id).or_insert(activity);
    }
    Some(next)
}

/// Drop bytes from the front so `text` fits in `limit`, cutting on a char
/// boundary.
fn trim_front(text: &mut String, limit: usize) {
    if text.len() <= limit {
        return;
    }
    let mut cut = text.len() - limit;
    while !text.is_char_boundary(cut) {
        cut += 1;
    }
    text.drain(..cut);
}
