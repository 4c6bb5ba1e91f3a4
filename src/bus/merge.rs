//! Priority ordering and adjacent-run merging for queued events.

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::event_types::{
    event_type, merge_rule_for, MergeRule, Priority, FIELD_IS_REASONING, FIELD_SESSION_ID,
    FIELD_WORKSPACE_ID,
};

/// An event waiting in one of the batcher queues.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedEvent {
    pub channel: String,
    pub payload: Value,
    pub priority: Priority,
    pub queued_at: DateTime<Utc>,
    pub workspace_scope: Option<String>,
    pub session_scope: Option<String>,
}

impl QueuedEvent {
    /// Build a queued event, reading scopes from the payload when present.
    pub fn new(channel: impl Into<String>, payload: Value, priority: Priority) -> Self {
        let workspace_scope = string_field(&payload, FIELD_WORKSPACE_ID);
        let session_scope = string_field(&payload, FIELD_SESSION_ID);
        Self {
            channel: channel.into(),
            payload,
            priority,
            queued_at: Utc::now(),
            workspace_scope,
            session_scope,
        }
    }

    pub fn with_scope(mut self, workspace: Option<String>, session: Option<String>) -> Self {
        if workspace.is_some() {
            self.workspace_scope = workspace;
        }
        if session.is_some() {
            self.session_scope = session;
        }
        self
    }
}

fn string_field(payload: &Value, field: &str) -> Option<String> {
    payload.get(field).and_then(Value::as_str).map(str::to_string)
}

/// Identity of a merge group. Two adjacent events merge only when every
/// component is equal, including the secondary-stream tag.
#[derive(Debug, PartialEq)]
struct MergeKey<'a> {
    channel: &'a str,
    event_type: Option<&'a str>,
    session: Option<&'a str>,
    scope: Option<&'a Value>,
    secondary: bool,
}

impl<'a> MergeKey<'a> {
    fn of(event: &'a QueuedEvent, rule: &MergeRule) -> Self {
        Self {
            channel: &event.channel,
            event_type: event_type(&event.payload),
            session: event.session_scope.as_deref(),
            scope: event.payload.get(rule.scope_field),
            secondary: event
                .payload
                .get(FIELD_IS_REASONING)
                .and_then(Value::as_bool)
                .unwrap_or(false),
        }
    }
}

#[derive(Debug)]
pub struct MergeOutcome {
    pub events: Vec<QueuedEvent>,
    /// Raw events absorbed into an earlier event of their run.
    pub collapsed: usize,
}

/// Stable sort by priority; equal priorities keep arrival order.
pub fn sort_by_priority(queue: &mut [QueuedEvent]) {
    queue.sort_by_key(|event| event.priority);
}

/// Collapse maximal runs of adjacent mergeable events.
///
/// The merged event keeps every field of the first event in its run except
/// the rule's text field, which becomes the ordered concatenation of the run.
pub fn merge_adjacent(queue: Vec<QueuedEvent>) -> MergeOutcome {
    let mut events: Vec<QueuedEvent> = Vec::with_capacity(queue.len());
    let mut collapsed = 0;
    let mut iter = queue.into_iter().peekable();

    while let Some(mut head) = iter.next() {
        let Some(rule) = merge_rule_for(&head.channel, &head.payload) else {
            events.push(head);
            continue;
        };

        let mut text: Option<String> = None;
        while let Some(next) = iter.peek() {
            if MergeKey::of(next, rule) != MergeKey::of(&head, rule) {
                break;
            }
            let Some(fragment) = next
                .payload
                .get(rule.text_field)
                .and_then(Value::as_str)
                .filter(|fragment| !fragment.is_empty())
            else {
                break;
            };

            let buffer = text.get_or_insert_with(|| {
                head.payload
                    .get(rule.text_field)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string()
            });
            buffer.push_str(fragment);
            iter.next();
            collapsed += 1;
        }

        if let (Some(text), Some(fields)) = (text, head.payload.as_object_mut()) {
            fields.insert(rule.text_field.to_string(), Value::String(text));
        }
        events.push(head);
    }

    MergeOutcome { events, collapsed }
}

/// Sort and merge a queue in one step.
pub fn prepare_batch(mut queue: Vec<QueuedEvent>) -> MergeOutcome {
    sort_by_priority(&mut queue);
    merge_adjacent(queue)
}

/// Split a background queue by workspace, keeping first-seen workspace order
/// and arrival order inside each group.
pub fn group_by_workspace(queue: Vec<QueuedEvent>) -> Vec<(Option<String>, Vec<QueuedEvent>)> {
    let mut groups: Vec<(Option<String>, Vec<QueuedEvent>)> = Vec::new();
    for event in queue {
        match groups
            .iter_mut()
            .find(|(workspace, _)| *workspace == event.workspace_scope)
        {
            Some((_, members)) => members.push(event),
            None => groups.push((event.workspace_scope.clone(), vec![event])),
        }
    }
    groups
}
