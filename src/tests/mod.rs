//! Scenario tests that drive a whole `Pipeline` under paused tokio time.
//!
//! Shared payload builders live here; scenarios live in submodules.

use std::time::Duration;

use serde_json::{json, Value};

#[cfg(test)]
mod pipeline;

/// Past every default timer: batch, background, stream flush and store
/// micro-batch.
pub const SETTLE: Duration = Duration::from_millis(250);

/// `session:updated` payload for an idle session whose messages are all
/// assistant messages.
pub fn snapshot(session_id: &str, workspace_id: &str, messages: &[(&str, &str)]) -> Value {
    let messages: Vec<Value> = messages
        .iter()
        .map(|(id, content)| json!({ "id": id, "role": "assistant", "content": content }))
        .collect();
    json!({
        "session": {
            "id": session_id,
            "workspace_id": workspace_id,
            "title": format!("session {session_id}"),
            "messages": messages,
        }
    })
}

/// `agent:event` message delta. The session id is stamped from the scope.
pub fn delta(message_id: &str, text: &str) -> Value {
    json!({ "type": "message_delta", "message_id": message_id, "delta": text })
}
