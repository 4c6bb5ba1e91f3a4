use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, oneshot};
use tokio::task::{AbortHandle, JoinHandle};

use crate::config::BatcherConfig;
use crate::{lock, RelayError};

use super::event_types::{priority_for, should_send_immediately, Priority, FIELD_SESSION_ID, FIELD_WORKSPACE_ID};
use super::merge::{group_by_workspace, prepare_batch, QueuedEvent};
use super::router::{BackgroundRouter, Lane, LiveActivityChange};
use super::transport::{Transport, TransportError};
use super::BusEvent;

/// Counters exposed through [`EventBatcher::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatcherStats {
    pub received: u64,
    pub sent: u64,
    /// Events that went through a queue instead of the immediate path.
    pub batched: u64,
    /// Raw events absorbed into a merged event.
    pub merged: u64,
    pub dropped: u64,
    pub immediate: u64,
    pub flushes: u64,
    pub live_activity_activations: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThrottleStatus {
    pub effective_background_interval_ms: u64,
    pub active_sessions: usize,
    pub throttling_bypassed: bool,
    pub focused_workspace: Option<String>,
    pub focused_session: Option<String>,
    pub background_queued: usize,
}

#[derive(Default)]
struct Counters {
    received: AtomicU64,
    sent: AtomicU64,
    batched: AtomicU64,
    merged: AtomicU64,
    dropped: AtomicU64,
    immediate: AtomicU64,
    flushes: AtomicU64,
    live_activity_activations: AtomicU64,
}

fn bump(counter: &AtomicU64, by: usize) {
    counter.fetch_add(by as u64, Ordering::Relaxed);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerKind {
    Foreground,
    HighPriority,
    Background,
}

#[derive(Default)]
struct Timers {
    foreground: Option<AbortHandle>,
    high_priority: Option<AbortHandle>,
    background: Option<AbortHandle>,
}

impl Timers {
    fn slot(&mut self, kind: TimerKind) -> &mut Option<AbortHandle> {
        match kind {
            TimerKind::Foreground => &mut self.foreground,
            TimerKind::HighPriority => &mut self.high_priority,
            TimerKind::Background => &mut self.background,
        }
    }

    fn cancel(&mut self, kind: TimerKind) {
        if let Some(handle) = self.slot(kind).take() {
            handle.abort();
        }
    }

    fn cancel_all(&mut self) {
        self.cancel(TimerKind::Foreground);
        self.cancel(TimerKind::HighPriority);
        self.cancel(TimerKind::Background);
    }
}

struct BatcherState {
    foreground: Vec<QueuedEvent>,
    background: Vec<QueuedEvent>,
    router: BackgroundRouter,
    timers: Timers,
    closed: bool,
}

struct Inner {
    config: BatcherConfig,
    transport: Arc<dyn Transport>,
    runtime: Handle,
    state: Mutex<BatcherState>,
    /// Held for the whole drain-and-send of a flush so batches reach the
    /// transport in the order they were drained. Always taken before `state`.
    delivery: Mutex<()>,
    counters: Counters,
}

/// Prioritizing, merging batcher between backend activity and the UI.
///
/// - Critical events, never-batch channels and channels outside the
///   batch-eligible set go straight to the transport.
/// - Everything else is queued. The foreground queue flushes on a short
///   timer (shorter still when high-priority content is waiting) or when it
///   reaches `max_batch_size`. Unfocused, non-urgent traffic goes to the
///   background queue while no session is running.
/// - A flush sorts by priority (stable), merges adjacent deltas and sends.
#[derive(Clone)]
pub struct EventBatcher {
    inner: Arc<Inner>,
}

impl EventBatcher {
    /// Must be called from within a tokio runtime; timers are spawned on it.
    pub fn new(config: BatcherConfig, transport: Arc<dyn Transport>) -> Result<Self, RelayError> {
        let runtime = Handle::try_current().map_err(|e| RelayError::Runtime(e.to_string()))?;
        if config.compression {
            tracing::info!("payload compression is reserved; events are sent uncompressed");
        }
        let router = BackgroundRouter::new(&config);
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                transport,
                runtime,
                state: Mutex::new(BatcherState {
                    foreground: Vec::new(),
                    background: Vec::new(),
                    router,
                    timers: Timers::default(),
                    closed: false,
                }),
                delivery: Mutex::new(()),
                counters: Counters::default(),
            }),
        })
    }

    /// Spawn a task forwarding bus events into the batcher until the bus
    /// shuts down or `stop` fires (or its sender is dropped). On stop, every
    /// event already published is forwarded before the task exits. Both
    /// queues are flushed on the way out.
    pub fn attach(
        &self,
        mut rx: broadcast::Receiver<BusEvent>,
        mut stop: oneshot::Receiver<()>,
    ) -> JoinHandle<()> {
        let batcher = self.clone();
        self.inner.runtime.spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = &mut stop => {
                        loop {
                            match rx.try_recv() {
                                Ok(event) => batcher.forward(event),
                                Err(broadcast::error::TryRecvError::Lagged(n)) => batcher.lagged(n),
                                Err(_) => break,
                            }
                        }
                        break;
                    }
                    received = rx.recv() => match received {
                        Ok(event) => batcher.forward(event),
                        Err(broadcast::error::RecvError::Lagged(n)) => batcher.lagged(n),
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            tracing::debug!("event bus bridge stopped, flushing batcher queues");
            batcher.flush_foreground();
            batcher.flush_background();
        })
    }

    fn forward(&self, event: BusEvent) {
        self.send_scoped(
            &event.channel,
            event.payload,
            event.workspace_id.as_deref(),
            event.session_id.as_deref(),
            event.priority,
        );
    }

    fn lagged(&self, n: u64) {
        tracing::warn!("event batcher lagged, dropped {n} events");
        bump(&self.inner.counters.dropped, n as usize);
    }

    // -----------------------------------------------------------------------
    // Producer surface
    // -----------------------------------------------------------------------

    /// Forward or enqueue an event. `priority: None` uses the channel table.
    pub fn send(&self, channel: &str, payload: Value, priority: Option<Priority>) {
        self.dispatch(channel, payload, priority, None, None);
    }

    /// Stamp workspace/session ids into an object payload, then send.
    pub fn send_scoped(
        &self,
        channel: &str,
        mut payload: Value,
        workspace_id: Option<&str>,
        session_id: Option<&str>,
        priority: Option<Priority>,
    ) {
        if let Some(fields) = payload.as_object_mut() {
            if let Some(workspace_id) = workspace_id {
                fields.insert(FIELD_WORKSPACE_ID.to_string(), Value::String(workspace_id.to_string()));
            }
            if let Some(session_id) = session_id {
                fields.insert(FIELD_SESSION_ID.to_string(), Value::String(session_id.to_string()));
            }
        }
        self.dispatch(
            channel,
            payload,
            priority,
            workspace_id.map(str::to_string),
            session_id.map(str::to_string),
        );
    }

    fn dispatch(
        &self,
        channel: &str,
        payload: Value,
        priority: Option<Priority>,
        workspace_scope: Option<String>,
        session_scope: Option<String>,
    ) {
        let counters = &self.inner.counters;
        bump(&counters.received, 1);
        let priority = priority.unwrap_or_else(|| priority_for(channel, &payload));

        if should_send_immediately(channel, priority) {
            self.send_now(channel, payload);
            return;
        }

        let event = QueuedEvent::new(channel, payload, priority).with_scope(workspace_scope, session_scope);
        let mut state = lock(&self.inner.state);
        if state.closed {
            bump(&counters.dropped, 1);
            return;
        }
        bump(&counters.batched, 1);

        let max = self.inner.config.max_batch_size;
        match state.router.route(&event) {
            Lane::Background => {
                state.background.push(event);
                if state.background.len() >= max {
                    drop(state);
                    self.flush_background();
                    return;
                }
                let delay = state.router.effective_background_interval();
                self.arm(&mut state, TimerKind::Background, delay);
            }
            Lane::Foreground => {
                let urgent = event.priority.is_high_or_better();
                state.foreground.push(event);
                if state.foreground.len() >= max {
                    drop(state);
                    self.flush_foreground();
                    return;
                }
                if urgent {
                    self.arm(&mut state, TimerKind::HighPriority, self.inner.config.high_priority_max_delay());
                }
                self.arm(&mut state, TimerKind::Foreground, self.inner.config.batch_interval());
            }
        }
    }

    fn send_now(&self, channel: &str, payload: Value) {
        let _delivery = lock(&self.inner.delivery);
        if lock(&self.inner.state).closed {
            bump(&self.inner.counters.dropped, 1);
            return;
        }
        bump(&self.inner.counters.immediate, 1);
        if !self.inner.transport.is_alive() {
            bump(&self.inner.counters.dropped, 1);
            return;
        }
        self.transmit(vec![QueuedEvent::new(channel, payload, Priority::Critical)]);
    }

    // -----------------------------------------------------------------------
    // Focus and live activity
    // -----------------------------------------------------------------------

    pub fn set_focused_workspace(&self, workspace_id: Option<&str>) {
        let changed = lock(&self.inner.state)
            .router
            .set_focused_workspace(workspace_id.map(str::to_string));
        if changed {
            tracing::debug!(workspace = ?workspace_id, "focused workspace changed");
            self.flush_background();
        }
    }

    /// Events for the focused session skip the background queue, so a
    /// change flushes it first. Otherwise earlier fragments of the same
    /// message would land after later ones.
    pub fn set_focused_session(&self, session_id: Option<&str>) {
        let changed = lock(&self.inner.state)
            .router
            .set_focused_session(session_id.map(str::to_string));
        if changed {
            tracing::debug!(session = ?session_id, "focused session changed");
            self.flush_background();
        }
    }

    pub fn set_session_running(&self, session_id: &str, running: bool) {
        let change = lock(&self.inner.state).router.set_session_running(session_id, running);
        self.on_live_activity_change(change);
    }

    /// Coarse override: treat the agent as running regardless of sessions.
    pub fn set_agent_running(&self, running: bool) {
        let change = lock(&self.inner.state).router.set_agent_running(running);
        self.on_live_activity_change(change);
    }

    fn on_live_activity_change(&self, change: LiveActivityChange) {
        match change {
            LiveActivityChange::Activated => {
                bump(&self.inner.counters.live_activity_activations, 1);
                tracing::debug!("live activity started, background throttle bypassed");
                self.flush_background();
            }
            LiveActivityChange::Deactivated => {
                tracing::debug!("live activity ended, background throttle restored");
            }
            LiveActivityChange::Unchanged => {}
        }
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    pub fn stats(&self) -> BatcherStats {
        let c = &self.inner.counters;
        BatcherStats {
            received: c.received.load(Ordering::Relaxed),
            sent: c.sent.load(Ordering::Relaxed),
            batched: c.batched.load(Ordering::Relaxed),
            merged: c.merged.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
            immediate: c.immediate.load(Ordering::Relaxed),
            flushes: c.flushes.load(Ordering::Relaxed),
            live_activity_activations: c.live_activity_activations.load(Ordering::Relaxed),
        }
    }

    pub fn throttle_status(&self) -> ThrottleStatus {
        let state = lock(&self.inner.state);
        ThrottleStatus {
            effective_background_interval_ms: state.router.effective_background_interval().as_millis() as u64,
            active_sessions: state.router.active_session_count(),
            throttling_bypassed: state.router.throttling_bypassed(),
            focused_workspace: state.router.focused_workspace().map(str::to_string),
            focused_session: state.router.focused_session().map(str::to_string),
            background_queued: state.background.len(),
        }
    }

    pub fn queued(&self) -> (usize, usize) {
        let state = lock(&self.inner.state);
        (state.foreground.len(), state.background.len())
    }

    // -----------------------------------------------------------------------
    // Timers and flushing
    // -----------------------------------------------------------------------

    fn arm(&self, state: &mut BatcherState, kind: TimerKind, delay: Duration) {
        let slot = state.timers.slot(kind);
        if slot.is_some() {
            return;
        }
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let task = self.inner.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                EventBatcher { inner }.on_timer(kind);
            }
        });
        *slot = Some(task.abort_handle());
    }

    fn on_timer(&self, kind: TimerKind) {
        // Release our own slot first so the flush does not abort this task.
        lock(&self.inner.state).timers.slot(kind).take();
        match kind {
            TimerKind::Foreground | TimerKind::HighPriority => self.flush_foreground(),
            TimerKind::Background => self.flush_background(),
        }
    }

    /// Drain the foreground queue: sort, merge, send.
    pub fn flush_foreground(&self) {
        let _delivery = lock(&self.inner.delivery);
        let batch = {
            let mut state = lock(&self.inner.state);
            state.timers.cancel(TimerKind::Foreground);
            state.timers.cancel(TimerKind::HighPriority);
            std::mem::take(&mut state.foreground)
        };
        if batch.is_empty() {
            return;
        }
        if !self.destination_alive(batch.len()) {
            return;
        }

        let raw = batch.len();
        let outcome = prepare_batch(batch);
        bump(&self.inner.counters.merged, outcome.collapsed);
        bump(&self.inner.counters.flushes, 1);
        tracing::debug!(raw, sent = outcome.events.len(), "flushing foreground batch");
        self.transmit(outcome.events);
    }

    /// Drain the background queue, merging per workspace.
    pub fn flush_background(&self) {
        let _delivery = lock(&self.inner.delivery);
        let batch = {
            let mut state = lock(&self.inner.state);
            state.timers.cancel(TimerKind::Background);
            std::mem::take(&mut state.background)
        };
        if batch.is_empty() {
            return;
        }
        if !self.destination_alive(batch.len()) {
            return;
        }

        let raw = batch.len();
        let mut events = Vec::with_capacity(raw);
        for (workspace, group) in group_by_workspace(batch) {
            let outcome = prepare_batch(group);
            tracing::trace!(workspace = ?workspace, merged = outcome.collapsed, "background group");
            bump(&self.inner.counters.merged, outcome.collapsed);
            events.extend(outcome.events);
        }
        bump(&self.inner.counters.flushes, 1);
        tracing::debug!(raw, sent = events.len(), "flushing background batch");
        self.transmit(events);
    }

    fn destination_alive(&self, pending: usize) -> bool {
        if self.inner.transport.is_alive() {
            return true;
        }
        tracing::debug!(pending, "destination gone, dropping batch");
        bump(&self.inner.counters.dropped, pending);
        false
    }

    fn transmit(&self, events: Vec<QueuedEvent>) {
        let total = events.len();
        for (index, event) in events.into_iter().enumerate() {
            match self.inner.transport.send(&event.channel, event.payload) {
                Ok(()) => bump(&self.inner.counters.sent, 1),
                Err(TransportError::Closed) => {
                    tracing::warn!("transport closed mid-flush, dropping {} events", total - index);
                    bump(&self.inner.counters.dropped, total - index);
                    return;
                }
                Err(e) => {
                    tracing::warn!("failed to emit {} to frontend: {e}", event.channel);
                    bump(&self.inner.counters.dropped, 1);
                }
            }
        }
    }

    /// Cancel every timer, flush both queues once, and drop anything sent
    /// afterwards.
    pub fn shutdown(&self) {
        {
            let mut state = lock(&self.inner.state);
            if state.closed {
                return;
            }
            state.closed = true;
            state.timers.cancel_all();
        }
        self.flush_foreground();
        self.flush_background();
        tracing::info!("event batcher shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        lock(&self.inner.state).closed
    }
}
