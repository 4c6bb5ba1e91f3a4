//! Keyed text coalescer shared by the streaming buffers.
//!
//! Entries live in a Vec so iteration and flush order follow insertion
//! order, not hash order. One timer per coalescer; a flush emits every
//! drained entry through the sink in a single call.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tokio::time::Instant;

use crate::{lock, RelayError};

/// Text drained from one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flushed<K> {
    pub key: K,
    pub text: String,
    /// Appends coalesced into `text`.
    pub fragments: usize,
}

/// Called with the `emit` lock held. A sink must not call back into the
/// coalescer that owns it, directly or through a store listener.
pub(crate) type Sink<K> = Box<dyn Fn(Vec<Flushed<K>>) + Send + Sync>;

struct Entry<K> {
    key: K,
    text: String,
    size: usize,
    fragments: usize,
    since: Instant,
}

impl<K> Entry<K> {
    fn into_flushed(self) -> Flushed<K> {
        Flushed {
            key: self.key,
            text: self.text,
            fragments: self.fragments,
        }
    }
}

struct State<K> {
    entries: Vec<Entry<K>>,
    timer: Option<AbortHandle>,
    closed: bool,
}

struct Inner<K> {
    name: &'static str,
    interval: Duration,
    cap: usize,
    measure: fn(&str) -> usize,
    runtime: Handle,
    state: Mutex<State<K>>,
    /// Held across drain and sink so flushes reach the sink in drain order.
    emit: Mutex<()>,
    sink: Sink<K>,
}

pub(crate) struct Coalescer<K> {
    inner: Arc<Inner<K>>,
}

impl<K> Coalescer<K>
where
    K: PartialEq + Clone + Send + 'static,
{
    pub(crate) fn new(
        name: &'static str,
        interval: Duration,
        cap: usize,
        measure: fn(&str) -> usize,
        sink: Sink<K>,
    ) -> Result<Self, RelayError> {
        let runtime = Handle::try_current().map_err(|e| RelayError::Runtime(e.to_string()))?;
        Ok(Self {
            inner: Arc::new(Inner {
                name,
                interval,
                cap,
                measure,
                runtime,
                state: Mutex::new(State {
                    entries: Vec::new(),
                    timer: None,
                    closed: false,
                }),
                emit: Mutex::new(()),
                sink,
            }),
        })
    }

    pub(crate) fn append(&self, key: K, fragment: &str) {
        if fragment.is_empty() {
            return;
        }
        let _emit = lock(&self.inner.emit);
        let mut state = lock(&self.inner.state);

        let size = (self.inner.measure)(fragment);
        let index = match state.entries.iter().position(|e| e.key == key) {
            Some(index) => index,
            None => {
                state.entries.push(Entry {
                    key,
                    text: String::new(),
                    size: 0,
                    fragments: 0,
                    since: Instant::now(),
                });
                state.entries.len() - 1
            }
        };
        let entry = &mut state.entries[index];
        entry.text.push_str(fragment);
        entry.size += size;
        entry.fragments += 1;
        let full = entry.size >= self.inner.cap;

        if state.closed || full {
            let entry = state.entries.remove(index);
            if state.entries.is_empty() {
                cancel(&mut state.timer);
            }
            drop(state);
            tracing::trace!(buffer = self.inner.name, "size cap reached, flushing entry");
            (self.inner.sink)(vec![entry.into_flushed()]);
            return;
        }

        if state.timer.is_none() {
            state.timer = Some(self.spawn_timer());
        }
    }

    fn spawn_timer(&self) -> AbortHandle {
        let weak: Weak<Inner<K>> = Arc::downgrade(&self.inner);
        let interval = self.inner.interval;
        self.inner
            .runtime
            .spawn(async move {
                tokio::time::sleep(interval).await;
                if let Some(inner) = weak.upgrade() {
                    let coalescer = Coalescer { inner };
                    lock(&coalescer.inner.state).timer.take();
                    coalescer.flush_all();
                }
            })
            .abort_handle()
    }

    /// Flush entries whose key matches. Without `force`, only entries that
    /// have waited at least one interval are flushed.
    pub(crate) fn flush_where<P>(&self, matches: P, force: bool)
    where
        P: Fn(&K) -> bool,
    {
        let interval = self.inner.interval;
        self.drain_and_emit(|entry| matches(&entry.key) && (force || entry.since.elapsed() >= interval));
    }

    pub(crate) fn flush_all(&self) {
        self.drain_and_emit(|_| true);
    }

    /// Drop entries whose key matches without emitting them. Returns how
    /// many were dropped. Waits for an in-flight flush to reach the sink, so
    /// nothing drained before the discard is emitted after it returns.
    pub(crate) fn discard_where<P>(&self, matches: P) -> usize
    where
        P: Fn(&K) -> bool,
    {
        let _emit = lock(&self.inner.emit);
        let mut state = lock(&self.inner.state);
        let before = state.entries.len();
        state.entries.retain(|entry| !matches(&entry.key));
        if state.entries.is_empty() {
            cancel(&mut state.timer);
        }
        before - state.entries.len()
    }

    pub(crate) fn pending(&self) -> usize {
        lock(&self.inner.state).entries.len()
    }

    /// Cancel the timer and flush everything once. Later appends are
    /// emitted immediately.
    pub(crate) fn shutdown(&self) {
        {
            let mut state = lock(&self.inner.state);
            state.closed = true;
            cancel(&mut state.timer);
        }
        self.flush_all();
    }

    fn drain_and_emit<F>(&self, mut take: F)
    where
        F: FnMut(&Entry<K>) -> bool,
    {
        let _emit = lock(&self.inner.emit);
        let drained = {
            let mut state = lock(&self.inner.state);
            let (drained, kept): (Vec<_>, Vec<_>) = state.entries.drain(..).partition(|entry| take(entry));
            state.entries = kept;
            if state.entries.is_empty() {
                cancel(&mut state.timer);
            }
            drained
        };
        if drained.is_empty() {
            return;
        }
        tracing::trace!(buffer = self.inner.name, entries = drained.len(), "flushing");
        (self.inner.sink)(drained.into_iter().map(Entry::into_flushed).collect());
    }
}

fn cancel(timer: &mut Option<AbortHandle>) {
    if let Some(handle) = timer.take() {
        handle.abort();
    }
}
