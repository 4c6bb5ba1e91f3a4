//! Channel names, priority classes and batching policy.
//!
//! Single source of truth for which channels are sent to the UI without
//! batching, which are queued, and which queued events may be merged.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Channels
// ---------------------------------------------------------------------------

/// Fine-grained agent activity: text deltas, tool lifecycle, progress.
pub const CHANNEL_AGENT_EVENT: &str = "agent:event";
/// User-facing status transitions (running, idle, run finished).
pub const CHANNEL_AGENT_STATUS: &str = "agent:status";
pub const CHANNEL_AGENT_ERROR: &str = "agent:error";
pub const CHANNEL_WORKSPACE_ERROR: &str = "workspace:error";
/// Full session snapshots.
pub const CHANNEL_SESSION_UPDATED: &str = "session:updated";
/// A provisional session id was replaced by its permanent id.
pub const CHANNEL_SESSION_IDENTITY: &str = "session:identity";
pub const CHANNEL_TERMINAL_OUTPUT: &str = "terminal:output";
pub const CHANNEL_METRICS: &str = "metrics:update";
pub const CHANNEL_DIAGNOSTICS: &str = "diagnostics:log";

// ---------------------------------------------------------------------------
// Event types (the `type` discriminator inside a payload)
// ---------------------------------------------------------------------------

pub const EVENT_MESSAGE_DELTA: &str = "message_delta";
pub const EVENT_TOOL_STARTED: &str = "tool_started";
pub const EVENT_TOOL_RESULT: &str = "tool_result";
pub const EVENT_PROGRESS: &str = "progress";
pub const EVENT_STATUS_CHANGED: &str = "status_changed";
pub const EVENT_RUN_FINISHED: &str = "run_finished";

// ---------------------------------------------------------------------------
// Payload fields the pipeline reads or stamps
// ---------------------------------------------------------------------------

pub const FIELD_TYPE: &str = "type";
pub const FIELD_WORKSPACE_ID: &str = "workspace_id";
pub const FIELD_SESSION_ID: &str = "session_id";
pub const FIELD_MESSAGE_ID: &str = "message_id";
pub const FIELD_DELTA: &str = "delta";
pub const FIELD_IS_REASONING: &str = "is_reasoning";
pub const FIELD_TERMINAL_ID: &str = "terminal_id";
pub const FIELD_DATA: &str = "data";

// ---------------------------------------------------------------------------
// Priority
// ---------------------------------------------------------------------------

/// Urgency class of an outbound event. Lower sorts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Status changes and fatal errors. Never batched.
    Critical,
    /// Tool results, session identity changes.
    High,
    /// Streaming text, progress, snapshots.
    Normal,
    /// Metrics and diagnostics.
    Low,
}

impl Priority {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
        }
    }

    pub fn is_high_or_better(self) -> bool {
        self <= Self::High
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Channels that always bypass the queues, whatever priority a caller asks for.
pub const NEVER_BATCH_CHANNELS: &[&str] = &[CHANNEL_AGENT_ERROR, CHANNEL_WORKSPACE_ERROR];

/// Channels the batcher is allowed to queue. Anything else is sent as-is.
pub const BATCH_ELIGIBLE_CHANNELS: &[&str] = &[
    CHANNEL_AGENT_EVENT,
    CHANNEL_SESSION_UPDATED,
    CHANNEL_SESSION_IDENTITY,
    CHANNEL_TERMINAL_OUTPUT,
    CHANNEL_METRICS,
    CHANNEL_DIAGNOSTICS,
];

/// Read the `type` discriminator of a payload, if it has one.
pub fn event_type(payload: &Value) -> Option<&str> {
    payload.get(FIELD_TYPE).and_then(Value::as_str)
}

/// Priority assigned by channel and event type.
///
/// Snapshots share `Normal` with text deltas: a stable sort must never move
/// a snapshot ahead of deltas that were queued before it.
pub fn priority_for(channel: &str, payload: &Value) -> Priority {
    match channel {
        CHANNEL_AGENT_STATUS | CHANNEL_AGENT_ERROR | CHANNEL_WORKSPACE_ERROR => Priority::Critical,
        CHANNEL_SESSION_IDENTITY => Priority::High,
        CHANNEL_AGENT_EVENT => match event_type(payload) {
            Some(EVENT_TOOL_STARTED) | Some(EVENT_TOOL_RESULT) => Priority::High,
            _ => Priority::Normal,
        },
        CHANNEL_METRICS | CHANNEL_DIAGNOSTICS => Priority::Low,
        _ => Priority::Normal,
    }
}

/// Returns true if this event must reach the transport right away instead
/// of waiting in a queue.
pub fn should_send_immediately(channel: &str, priority: Priority) -> bool {
    if NEVER_BATCH_CHANNELS.contains(&channel) {
        return true;
    }
    if priority == Priority::Critical {
        return true;
    }
    !BATCH_ELIGIBLE_CHANNELS.contains(&channel)
}

// ---------------------------------------------------------------------------
// Merge policy
// ---------------------------------------------------------------------------

/// Describes a family of events whose text field may be concatenated when
/// adjacent entries share a merge key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeRule {
    pub channel: &'static str,
    /// `None` matches every event on the channel.
    pub event_type: Option<&'static str>,
    /// Field whose string value is concatenated.
    pub text_field: &'static str,
    /// Field identifying the stream inside a session (message id, terminal id).
    pub scope_field: &'static str,
}

pub const MERGE_RULES: &[MergeRule] = &[
    MergeRule {
        channel: CHANNEL_AGENT_EVENT,
        event_type: Some(EVENT_MESSAGE_DELTA),
        text_field: FIELD_DELTA,
        scope_field: FIELD_MESSAGE_ID,
    },
    MergeRule {
        channel: CHANNEL_TERMINAL_OUTPUT,
        event_type: None,
        text_field: FIELD_DATA,
        scope_field: FIELD_TERMINAL_ID,
    },
];

pub fn merge_rule_for(channel: &str, payload: &Value) -> Option<&'static MergeRule> {
    MERGE_RULES.iter().find(|rule| {
        rule.channel == channel
            && rule
                .event_type
                .map_or(true, |expected| event_type(payload) == Some(expected))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_priority_ordering_is_declaration_order() {
        let mut all = vec![Priority::Low, Priority::Critical, Priority::Normal, Priority::High];
        all.sort();
        assert_eq!(
            all,
            vec![Priority::Critical, Priority::High, Priority::Normal, Priority::Low]
        );
        assert!(Priority::High.is_high_or_better());
        assert!(!Priority::Normal.is_high_or_better());
    }

    #[test]
    fn test_priority_lookup_by_channel_and_type() {
        let delta = json!({ "type": "message_delta", "delta": "x" });
        let tool = json!({ "type": "tool_result", "tool_call_id": "t1" });
        assert_eq!(priority_for(CHANNEL_AGENT_EVENT, &delta), Priority::Normal);
        assert_eq!(priority_for(CHANNEL_AGENT_EVENT, &tool), Priority::High);
        assert_eq!(priority_for(CHANNEL_AGENT_STATUS, &json!({})), Priority::Critical);
        assert_eq!(priority_for(CHANNEL_SESSION_UPDATED, &json!({})), Priority::Normal);
        assert_eq!(priority_for(CHANNEL_METRICS, &json!({})), Priority::Low);
    }

    #[test]
    fn test_immediate_policy() {
        assert!(should_send_immediately(CHANNEL_AGENT_ERROR, Priority::Low));
        assert!(should_send_immediately(CHANNEL_AGENT_EVENT, Priority::Critical));
        assert!(should_send_immediately("custom:unknown", Priority::Normal));
        assert!(!should_send_immediately(CHANNEL_AGENT_EVENT, Priority::Normal));
        assert!(!should_send_immediately(CHANNEL_METRICS, Priority::Low));
    }

    #[test]
    fn test_merge_rule_matches_type() {
        let delta = json!({ "type": "message_delta" });
        let tool = json!({ "type": "tool_started" });
        assert!(merge_rule_for(CHANNEL_AGENT_EVENT, &delta).is_some());
        assert!(merge_rule_for(CHANNEL_AGENT_EVENT, &tool).is_none());
        assert!(merge_rule_for(CHANNEL_TERMINAL_OUTPUT, &json!({ "data": "ls" })).is_some());
        assert!(merge_rule_for(CHANNEL_METRICS, &json!({})).is_none());
    }
}
