//! Consumer-side subscription store.
//!
//! Holds the authoritative `Arc<AppState>`. Every mutation goes through the
//! pure reducer; subscribers are notified only when the resulting Arc is a
//! different allocation, and at most once per `dispatch_batch`.

pub mod delta;
pub mod reducer;
pub mod selector;
pub mod state;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::runtime::Handle;
use tokio::task::AbortHandle;

use crate::config::StoreConfig;
use crate::lock;

pub use delta::{apply_patch, compute_delta, MessagesPatch, SessionPatch};
pub use reducer::{reduce, Action};
pub use selector::{LatestCell, Selector, SelectorCallback};
pub use state::{AppState, Session, SessionStatus, StreamKind};

use selector::SelectorListener;

type Listener = Arc<dyn Fn(&Arc<AppState>) + Send + Sync>;

#[derive(Default)]
struct Deferred {
    actions: Vec<Action>,
    timer: Option<AbortHandle>,
    closed: bool,
}

struct StoreInner {
    config: StoreConfig,
    runtime: Option<Handle>,
    state: Mutex<Arc<AppState>>,
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_listener: AtomicU64,
    deferred: Mutex<Deferred>,
    notifications: AtomicU64,
}

#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

/// Handle returned by [`Store::subscribe`].
#[must_use = "dropping a Subscription keeps the listener registered; call unsubscribe to remove it"]
pub struct Subscription {
    id: u64,
    store: Weak<StoreInner>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        if let Some(inner) = self.store.upgrade() {
            lock(&inner.listeners).retain(|(id, _)| *id != self.id);
        }
    }
}

impl Store {
    /// Outside a tokio runtime every action is applied synchronously.
    pub fn new(config: &StoreConfig) -> Self {
        Self::with_state(config, AppState::default())
    }

    pub fn with_state(config: &StoreConfig, state: AppState) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                config: config.clone(),
                runtime: Handle::try_current().ok(),
                state: Mutex::new(Arc::new(state)),
                listeners: Mutex::new(Vec::new()),
                next_listener: AtomicU64::new(0),
                deferred: Mutex::new(Deferred::default()),
                notifications: AtomicU64::new(0),
            }),
        }
    }

    pub fn get_state(&self) -> Arc<AppState> {
        Arc::clone(&*lock(&self.inner.state))
    }

    /// Listeners run synchronously on the dispatching thread. When the
    /// dispatch comes from a stream buffer flush, that buffer's emit lock is
    /// held, so a listener must not append to or flush a stream buffer.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Arc<AppState>) + Send + Sync + 'static,
    {
        let id = self.inner.next_listener.fetch_add(1, Ordering::Relaxed);
        lock(&self.inner.listeners).push((id, Arc::new(listener)));
        Subscription {
            id,
            store: Arc::downgrade(&self.inner),
        }
    }

    /// Subscribe to a projection of the state. The callback runs only when
    /// the selected value changes; selector and callback are re-read from
    /// their cells on every notification.
    pub fn subscribe_selector<T>(
        &self,
        selector: Arc<LatestCell<Selector<T>>>,
        callback: Arc<LatestCell<SelectorCallback<T>>>,
    ) -> Subscription
    where
        T: PartialEq + Clone + Send + 'static,
    {
        let listener = SelectorListener::new(&self.get_state(), selector, callback);
        self.subscribe(move |state| listener.observe(state))
    }

    /// Apply one action. Cosmetic actions are held for one micro-batch
    /// interval and applied together.
    pub fn dispatch(&self, action: Action) {
        let action = if action.is_deferrable() {
            match self.defer(action) {
                Ok(()) => return,
                Err(action) => action,
            }
        } else {
            action
        };
        self.commit(vec![action]);
    }

    /// Fold every action through the reducer and notify at most once.
    pub fn dispatch_batch(&self, actions: Vec<Action>) {
        if actions.is_empty() {
            return;
        }
        self.commit(actions);
    }

    /// Apply any held-back cosmetic actions now.
    pub fn flush_deferred(&self) {
        let actions = {
            let mut deferred = lock(&self.inner.deferred);
            if let Some(timer) = deferred.timer.take() {
                timer.abort();
            }
            std::mem::take(&mut deferred.actions)
        };
        self.dispatch_batch(actions);
    }

    pub fn pending_deferred(&self) -> usize {
        lock(&self.inner.deferred).actions.len()
    }

    /// Number of times subscribers have been notified.
    pub fn notification_count(&self) -> u64 {
        self.inner.notifications.load(Ordering::Relaxed)
    }

    /// Cancel the micro-batch timer and apply whatever it was holding.
    /// Later cosmetic actions are applied synchronously.
    pub fn shutdown(&self) {
        lock(&self.inner.deferred).closed = true;
        self.flush_deferred();
    }

    /// Hands the action back if it must be applied now.
    fn defer(&self, action: Action) -> Result<(), Action> {
        let Some(runtime) = &self.inner.runtime else {
            return Err(action);
        };
        let mut deferred = lock(&self.inner.deferred);
        if deferred.closed {
            return Err(action);
        }
        deferred.actions.push(action);
        if deferred.timer.is_none() {
            let weak = Arc::downgrade(&self.inner);
            let delay = self.inner.config.micro_batch_interval();
            let task = runtime.spawn(async move {
                tokio::time::sleep(delay).await;
                if let Some(inner) = weak.upgrade() {
                    let store = Store { inner };
                    lock(&store.inner.deferred).timer.take();
                    store.flush_deferred();
                }
            });
            deferred.timer = Some(task.abort_handle());
        }
        Ok(())
    }

    fn commit(&self, actions: Vec<Action>) {
        let next = {
            let mut current = lock(&self.inner.state);
            let next = actions
                .into_iter()
                .fold(Arc::clone(&*current), |state, action| reduce(&state, action));
            if Arc::ptr_eq(&*current, &next) {
                return;
            }
            *current = Arc::clone(&next);
            next
        };
        self.notify(&next);
    }

    fn notify(&self, state: &Arc<AppState>) {
        let listeners: Vec<Listener> = lock(&self.inner.listeners)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        self.inner.notifications.fetch_add(1, Ordering::Relaxed);
        for listener in listeners {
            listener(state);
        }
    }
}
