//! Selector subscriptions with swappable selector and callback.
//!
//! A long-lived subscription reads its selector and callback from
//! [`LatestCell`]s on every notification, so callers can replace either one
//! without tearing down and re-creating the subscription.

use std::sync::{Arc, Mutex, PoisonError, RwLock};

use super::state::AppState;
use crate::lock;

pub type Selector<T> = Arc<dyn Fn(&AppState) -> T + Send + Sync>;
pub type SelectorCallback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Single-writer cell read on each invocation.
#[derive(Debug, Default)]
pub struct LatestCell<T> {
    value: RwLock<T>,
}

impl<T: Clone> LatestCell<T> {
    pub fn new(value: T) -> Self {
        Self {
            value: RwLock::new(value),
        }
    }

    pub fn set(&self, value: T) {
        *self.value.write().unwrap_or_else(PoisonError::into_inner) = value;
    }

    pub fn get(&self) -> T {
        self.value.read().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

/// Remembers the last selected value and fires the callback only when the
/// projection changes.
pub(crate) struct SelectorListener<T> {
    selector: Arc<LatestCell<Selector<T>>>,
    callback: Arc<LatestCell<SelectorCallback<T>>>,
    last: Mutex<T>,
}

impl<T: PartialEq + Clone> SelectorListener<T> {
    pub(crate) fn new(
        state: &AppState,
        selector: Arc<LatestCell<Selector<T>>>,
        callback: Arc<LatestCell<SelectorCallback<T>>>,
    ) -> Self {
        let initial = (selector.get())(state);
        Self {
            selector,
            callback,
            last: Mutex::new(initial),
        }
    }

    pub(crate) fn observe(&self, state: &AppState) {
        let selected = (self.selector.get())(state);
        {
            let mut last = lock(&self.last);
            if *last == selected {
                return;
            }
            *last = selected.clone();
        }
        (self.callback.get())(&selected);
    }
}
