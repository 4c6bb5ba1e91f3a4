use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Most recent tool outcomes kept per session.
pub const TOOL_HISTORY_LIMIT: usize = 50;
/// Bytes of terminal scrollback kept per terminal.
pub const TERMINAL_SCROLLBACK_BYTES: usize = 256 * 1024;

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Idle,
    Running,
    Error,
    Cancelled,
}

impl SessionStatus {
    /// Whether partial in-flight text should be discarded on entering this
    /// status.
    pub fn ends_stream(self) -> bool {
        matches!(self, Self::Idle | Self::Error | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    #[default]
    Assistant,
    System,
    Tool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub content: String,
    /// Secondary reasoning stream, kept apart from `content`.
    #[serde(default)]
    pub reasoning: String,
}

impl Message {
    pub fn assistant(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: Role::Assistant,
            ..Self::default()
        }
    }
}

/// One conversation as the UI sees it. Shared as `Arc<Session>` and never
/// mutated in place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    #[serde(default)]
    pub workspace_id: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub status: SessionStatus,
    #[serde(default)]
    pub config: SessionConfig,
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl Session {
    pub fn new(id: impl Into<String>, workspace_id: Option<&str>) -> Self {
        Self {
            id: id.into(),
            workspace_id: workspace_id.map(str::to_string),
            ..Self::default()
        }
    }

    pub fn message(&self, message_id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == message_id)
    }
}

// ---------------------------------------------------------------------------
// Per-session activity (not part of the snapshot)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Primary,
    Reasoning,
}

impl StreamKind {
    pub fn from_reasoning_flag(is_reasoning: bool) -> Self {
        if is_reasoning {
            Self::Reasoning
        } else {
            Self::Primary
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTool {
    pub tool_call_id: String,
    pub tool_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub tool_call_id: String,
    pub tool_name: String,
    pub success: bool,
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub current: u64,
    #[serde(default)]
    pub total: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metrics {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionActivity {
    pub pending_tool: Option<PendingTool>,
    pub last_error: Option<String>,
    pub progress: Option<Progress>,
    pub metrics: Option<Metrics>,
    pub tool_results: Vec<ToolOutcome>,
}

// ---------------------------------------------------------------------------
// Application state
// ---------------------------------------------------------------------------

/// Authoritative consumer-side state. The store holds it as
/// `Arc<AppState>`; a reducer that changes nothing hands back the same Arc.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AppState {
    pub sessions: HashMap<String, Arc<Session>>,
    /// Session ids in first-seen order.
    pub session_order: Vec<String>,
    pub activity: HashMap<String, SessionActivity>,
    pub terminals: HashMap<u32, String>,
    pub workspace_errors: HashMap<String, String>,
}

impl AppState {
    pub fn session(&self, session_id: &str) -> Option<&Arc<Session>> {
        self.sessions.get(session_id)
    }

    pub fn activity(&self, session_id: &str) -> Option<&SessionActivity> {
        self.activity.get(session_id)
    }

    pub fn terminal_output(&self, terminal_id: u32) -> Option<&str> {
        self.terminals.get(&terminal_id).map(String::as_str)
    }

    pub fn sessions_in_order(&self) -> impl Iterator<Item = &Arc<Session>> {
        self.session_order.iter().filter_map(|id| self.sessions.get(id))
    }

    pub fn running_session_count(&self) -> usize {
        self.sessions
            .values()
            .filter(|s| s.status == SessionStatus::Running)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_session_deserializes_with_defaults() {
        let session: Session = serde_json::from_value(json!({
            "id": "s1",
            "messages": [{ "id": "m1", "content": "hi" }],
        }))
        .unwrap();

        assert_eq!(session.status, SessionStatus::Idle);
        assert_eq!(session.workspace_id, None);
        assert_eq!(session.messages[0].role, Role::Assistant);
        assert_eq!(session.message("m1").map(|m| m.content.as_str()), Some("hi"));
    }

    #[test]
    fn test_status_wire_names() {
        let status: SessionStatus = serde_json::from_value(json!("cancelled")).unwrap();
        assert_eq!(status, SessionStatus::Cancelled);
        assert!(status.ends_stream());
        assert!(!SessionStatus::Running.ends_stream());
    }

    #[test]
    fn test_sessions_in_order_skips_missing() {
        let mut state = AppState::default();
        state.sessions.insert("b".into(), Arc::new(Session::new("b", None)));
        state.session_order = vec!["b".into(), "gone".into()];
        let ids: Vec<_> = state.sessions_in_order().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["b"]);
    }
}
