//! Closed set of events the consumer understands.
//!
//! Every `(channel, payload)` pair either decodes into exactly one
//! [`UiEvent`] variant or fails with a [`DecodeError`]. Adding a kind means
//! adding a variant, and the handler's exhaustive match will not compile
//! until it is routed.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::bus::event_types::{
    CHANNEL_AGENT_ERROR, CHANNEL_AGENT_EVENT, CHANNEL_AGENT_STATUS, CHANNEL_DIAGNOSTICS, CHANNEL_METRICS,
    CHANNEL_SESSION_IDENTITY, CHANNEL_SESSION_UPDATED, CHANNEL_TERMINAL_OUTPUT, CHANNEL_WORKSPACE_ERROR,
};
use crate::store::state::{Metrics, Session, SessionStatus};

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("unknown channel: {0}")]
    UnknownChannel(String),
    #[error("malformed {channel} payload: {source}")]
    Payload {
        channel: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentActivity {
    MessageDelta {
        session_id: String,
        message_id: String,
        delta: String,
        #[serde(default)]
        is_reasoning: bool,
    },
    ToolStarted {
        session_id: String,
        tool_call_id: String,
        tool_name: String,
    },
    ToolResult {
        session_id: String,
        tool_call_id: String,
        tool_name: String,
        #[serde(default = "default_success")]
        success: bool,
        #[serde(default)]
        summary: Option<String>,
    },
    Progress {
        session_id: String,
        #[serde(default)]
        label: Option<String>,
        #[serde(default)]
        current: u64,
        #[serde(default)]
        total: Option<u64>,
    },
}

fn default_success() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StatusNotice {
    StatusChanged { session_id: String, status: SessionStatus },
    RunFinished { session_id: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentErrorNotice {
    pub session_id: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceErrorNotice {
    pub workspace_id: String,
    /// `None` clears the workspace's error.
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityChange {
    pub previous_id: String,
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerminalChunk {
    pub terminal_id: u32,
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsUpdate {
    pub session_id: String,
    #[serde(flatten)]
    pub metrics: Metrics,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticLog {
    #[serde(default)]
    pub level: LogLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct SnapshotPayload {
    session: Session,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    Activity(AgentActivity),
    Status(StatusNotice),
    AgentError(AgentErrorNotice),
    WorkspaceError(WorkspaceErrorNotice),
    SessionSnapshot(Session),
    SessionIdentity(IdentityChange),
    TerminalOutput(TerminalChunk),
    Metrics(MetricsUpdate),
    Diagnostic(DiagnosticLog),
}

impl UiEvent {
    pub fn decode(channel: &str, payload: Value) -> Result<Self, DecodeError> {
        let malformed = |source: serde_json::Error| DecodeError::Payload {
            channel: channel.to_string(),
            source,
        };
        let event = match channel {
            CHANNEL_AGENT_EVENT => Self::Activity(serde_json::from_value(payload).map_err(malformed)?),
            CHANNEL_AGENT_STATUS => Self::Status(serde_json::from_value(payload).map_err(malformed)?),
            CHANNEL_AGENT_ERROR => Self::AgentError(serde_json::from_value(payload).map_err(malformed)?),
            CHANNEL_WORKSPACE_ERROR => Self::WorkspaceError(serde_json::from_value(payload).map_err(malformed)?),
            CHANNEL_SESSION_UPDATED => {
                let snapshot: SnapshotPayload = serde_json::from_value(payload).map_err(malformed)?;
                Self::SessionSnapshot(snapshot.session)
            }
            CHANNEL_SESSION_IDENTITY => Self::SessionIdentity(serde_json::from_value(payload).map_err(malformed)?),
            CHANNEL_TERMINAL_OUTPUT => Self::TerminalOutput(serde_json::from_value(payload).map_err(malformed)?),
            CHANNEL_METRICS => Self::Metrics(serde_json::from_value(payload).map_err(malformed)?),
            CHANNEL_DIAGNOSTICS => Self::Diagnostic(serde_json::from_value(payload).map_err(malformed)?),
            other => return Err(DecodeError::UnknownChannel(other.to_string())),
        };
        Ok(event)
    }

    pub fn channel(&self) -> &'static str {
        match self {
            Self::Activity(_) => CHANNEL_AGENT_EVENT,
            Self::Status(_) => CHANNEL_AGENT_STATUS,
            Self::AgentError(_) => CHANNEL_AGENT_ERROR,
            Self::WorkspaceError(_) => CHANNEL_WORKSPACE_ERROR,
            Self::SessionSnapshot(_) => CHANNEL_SESSION_UPDATED,
            Self::SessionIdentity(_) => CHANNEL_SESSION_IDENTITY,
            Self::TerminalOutput(_) => CHANNEL_TERMINAL_OUTPUT,
            Self::Metrics(_) => CHANNEL_METRICS,
            Self::Diagnostic(_) => CHANNEL_DIAGNOSTICS,
        }
    }

    /// Payload as the producer would send it on [`UiEvent::channel`].
    pub fn to_payload(&self) -> Result<Value, serde_json::Error> {
        match self {
            Self::Activity(activity) => serde_json::to_value(activity),
            Self::Status(notice) => serde_json::to_value(notice),
            Self::AgentError(notice) => serde_json::to_value(notice),
            Self::WorkspaceError(notice) => serde_json::to_value(notice),
            Self::SessionSnapshot(session) => serde_json::to_value(SnapshotPayload {
                session: session.clone(),
            }),
            Self::SessionIdentity(change) => serde_json::to_value(change),
            Self::TerminalOutput(chunk) => serde_json::to_value(chunk),
            Self::Metrics(update) => serde_json::to_value(update),
            Self::Diagnostic(log) => serde_json::to_value(log),
        }
    }

    /// Session the event belongs to, if any.
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Self::Activity(
                AgentActivity::MessageDelta { session_id, .. }
                | AgentActivity::ToolStarted { session_id, .. }
                | AgentActivity::ToolResult { session_id, .. }
                | AgentActivity::Progress { session_id, .. },
            ) => Some(session_id.as_str()),
            Self::Status(
                StatusNotice::StatusChanged { session_id, .. } | StatusNotice::RunFinished { session_id },
            ) => Some(session_id.as_str()),
            Self::AgentError(notice) => Some(notice.session_id.as_str()),
            Self::SessionSnapshot(session) => Some(session.id.as_str()),
            Self::SessionIdentity(change) => Some(change.session_id.as_str()),
            Self::Metrics(update) => Some(update.session_id.as_str()),
            Self::WorkspaceError(_) | Self::TerminalOutput(_) | Self::Diagnostic(_) => None,
        }
    }
}
