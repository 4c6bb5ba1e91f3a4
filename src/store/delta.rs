//! Session delta computer.
//!
//! Compares two snapshots of the same session and describes the difference
//! as a field-level patch, so long conversations are not replaced wholesale
//! on every snapshot. Replacing the whole session is always a correct
//! fallback when a patch cannot be applied.

use serde::Serialize;

use super::state::{Message, Session, SessionConfig, SessionStatus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessagesPatch {
    /// New messages after an unchanged prefix.
    Append { messages: Vec<Message> },
    /// Everything from index `from` onward is replaced.
    Splice { from: usize, messages: Vec<Message> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionPatch {
    pub session_id: String,
    pub title: Option<String>,
    pub status: Option<SessionStatus>,
    pub config: Option<SessionConfig>,
    pub messages: Option<MessagesPatch>,
}

/// Returns `None` when the display-relevant fields are identical.
pub fn compute_delta(old: &Session, new: &Session) -> Option<SessionPatch> {
    let patch = SessionPatch {
        session_id: new.id.clone(),
        title: (old.title != new.title).then(|| new.title.clone()),
        status: (old.status != new.status).then_some(new.status),
        config: (old.config != new.config).then(|| new.config.clone()),
        messages: diff_messages(&old.messages, &new.messages),
    };

    let unchanged =
        patch.title.is_none() && patch.status.is_none() && patch.config.is_none() && patch.messages.is_none();
    (!unchanged).then_some(patch)
}

fn diff_messages(old: &[Message], new: &[Message]) -> Option<MessagesPatch> {
    let common = old.iter().zip(new).take_while(|(a, b)| a == b).count();
    if common == old.len() && common == new.len() {
        return None;
    }
    let tail = new[common..].to_vec();
    if common == old.len() {
        Some(MessagesPatch::Append { messages: tail })
    } else {
        Some(MessagesPatch::Splice { from: common, messages: tail })
    }
}

/// Apply a patch to the session it was computed against. Returns `None` if
/// the patch does not fit (wrong session, splice past the end).
pub fn apply_patch(session: &Session, patch: &SessionPatch) -> Option<Session> {
    if session.id != patch.session_id {
        return None;
    }

    let mut next = session.clone();
    if let Some(title) = &patch.title {
        next.title = title.clone();
    }
    if let Some(status) = patch.status {
        next.status = status;
    }
    if let Some(config) = &patch.config {
        next.config = config.clone();
    }
    match &patch.messages {
        Some(MessagesPatch::Append { messages }) => next.messages.extend(messages.iter().cloned()),
        Some(MessagesPatch::Splice { from, messages }) => {
            if *from > next.messages.len() {
                return None;
            }
            next.messages.truncate(*from);
            next.messages.extend(messages.iter().cloned());
        }
        None => {}
    }
    Some(next)
}
