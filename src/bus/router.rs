//! Workspace-scoped background routing.
//!
//! Events for a workspace the user is not looking at are moved to a slower
//! queue, unless some session is actively running. While anything runs,
//! the background interval collapses to the foreground interval.

use std::collections::BTreeSet;
use std::time::Duration;

use crate::config::BatcherConfig;

use super::event_types::Priority;
use super::merge::QueuedEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lane {
    Foreground,
    Background,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveActivityChange {
    Activated,
    Deactivated,
    Unchanged,
}

#[derive(Debug)]
pub struct BackgroundRouter {
    workspace_filtering: bool,
    foreground_interval: Duration,
    background_interval: Duration,
    focused_workspace: Option<String>,
    focused_session: Option<String>,
    running_sessions: BTreeSet<String>,
    agent_running: bool,
}

impl BackgroundRouter {
    pub fn new(config: &BatcherConfig) -> Self {
        Self {
            workspace_filtering: config.workspace_filtering,
            foreground_interval: config.batch_interval(),
            background_interval: config.background_interval(),
            focused_workspace: None,
            focused_session: None,
            running_sessions: BTreeSet::new(),
            agent_running: false,
        }
    }

    /// Pick the queue for an event.
    pub fn route(&self, event: &QueuedEvent) -> Lane {
        if !self.workspace_filtering || self.live_activity() {
            return Lane::Foreground;
        }
        if event.priority < Priority::Normal {
            return Lane::Foreground;
        }
        let (Some(focused), Some(scope)) = (&self.focused_workspace, &event.workspace_scope) else {
            return Lane::Foreground;
        };
        if focused == scope {
            return Lane::Foreground;
        }
        if self.focused_session.is_some() && self.focused_session == event.session_scope {
            return Lane::Foreground;
        }
        Lane::Background
    }

    /// Returns true if the focused workspace actually changed.
    pub fn set_focused_workspace(&mut self, workspace: Option<String>) -> bool {
        if self.focused_workspace == workspace {
            return false;
        }
        self.focused_workspace = workspace;
        true
    }

    pub fn set_focused_session(&mut self, session: Option<String>) -> bool {
        if self.focused_session == session {
            return false;
        }
        self.focused_session = session;
        true
    }

    pub fn focused_workspace(&self) -> Option<&str> {
        self.focused_workspace.as_deref()
    }

    pub fn focused_session(&self) -> Option<&str> {
        self.focused_session.as_deref()
    }

    pub fn set_session_running(&mut self, session_id: &str, running: bool) -> LiveActivityChange {
        let before = self.live_activity();
        if running {
            self.running_sessions.insert(session_id.to_string());
        } else {
            self.running_sessions.remove(session_id);
        }
        transition(before, self.live_activity())
    }

    pub fn set_agent_running(&mut self, running: bool) -> LiveActivityChange {
        let before = self.live_activity();
        self.agent_running = running;
        transition(before, self.live_activity())
    }

    pub fn live_activity(&self) -> bool {
        self.agent_running || !self.running_sessions.is_empty()
    }

    pub fn active_session_count(&self) -> usize {
        self.running_sessions.len()
    }

    pub fn effective_background_interval(&self) -> Duration {
        if self.live_activity() {
            self.foreground_interval
        } else {
            self.background_interval
        }
    }

    /// True when background traffic currently moves at foreground speed.
    pub fn throttling_bypassed(&self) -> bool {
        !self.workspace_filtering || self.live_activity()
    }
}

fn transition(before: bool, after: bool) -> LiveActivityChange {
    match (before, after) {
        (false, true) => LiveActivityChange::Activated,
        (true, false) => LiveActivityChange::Deactivated,
        _ => LiveActivityChange::Unchanged,
    }
}
