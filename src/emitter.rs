//! Minimal typed event emitter used as the pub/sub backbone.
//!
//! Listeners are grouped by event name and invoked in registration order.
//! Each listener is identified by a [`ListenerId`] returned at registration,
//! which is what [`Emitter::off`] uses to remove it again.
//!
//! The registry lock is never held while a listener runs: [`Emitter::trigger`]
//! snapshots the listener list first. Listeners may therefore register or
//! remove listeners on the same emitter (including themselves) without
//! deadlocking, and such changes take effect on the next trigger.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

/// Event name that addresses every event at once.
///
/// `off(WILDCARD, None)` clears the whole emitter; listeners registered with
/// [`Emitter::on_any`] are stored under this name.
pub const WILDCARD: &str = "*";

/// Opaque handle identifying a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Callback<A> = Arc<dyn Fn(&A) + Send + Sync>;
type AnyCallback<A> = Arc<dyn Fn(&str, &A) + Send + Sync>;

struct Registry<A> {
    events: HashMap<String, Vec<(ListenerId, Callback<A>)>>,
    wildcards: Vec<(ListenerId, AnyCallback<A>)>,
}

struct Inner<A> {
    registry: RwLock<Registry<A>>,
    next_id: AtomicU64,
}

/// Thread-safe event emitter whose listeners receive `&A`.
///
/// `Clone` is cheap: clones share the same listener registry.
pub struct Emitter<A> {
    inner: Arc<Inner<A>>,
}

impl<A> Clone for Emitter<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A> std::fmt::Debug for Emitter<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.inner.registry.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("Emitter")
            .field("events", &registry.events.len())
            .field("wildcards", &registry.wildcards.len())
            .finish()
    }
}

impl<A: 'static> Default for Emitter<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: 'static> Emitter<A> {
    /// Create an emitter with no listeners.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: RwLock::new(Registry {
                    events: HashMap::new(),
                    wildcards: Vec::new(),
                }),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Listen to `event` and run `f` every time it is triggered.
    pub fn on<F>(&self, event: &str, f: F) -> ListenerId
    where
        F: Fn(&A) + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.insert(event, id, Arc::new(f));
        id
    }

    /// Listen to `event` and run `f` at most once.
    ///
    /// The listener is removed before `f` runs, so a re-entrant trigger from
    /// inside `f` does not reach it again.
    pub fn one<F>(&self, event: &str, f: F) -> ListenerId
    where
        F: FnOnce(&A) + Send + 'static,
    {
        let id = self.next_id();
        let weak = self.downgrade();
        let name = event.to_owned();
        let slot = Mutex::new(Some(f));
        self.insert(
            event,
            id,
            Arc::new(move |args: &A| {
                let Some(f) = slot.lock().unwrap_or_else(PoisonError::into_inner).take() else {
                    return;
                };
                if let Some(emitter) = weak.upgrade() {
                    emitter.off(&name, Some(id));
                }
                f(args);
            }),
        );
        id
    }

    /// Listen to every event. `f` receives the event name along with its
    /// arguments and runs after the event's own listeners.
    pub fn on_any<F>(&self, f: F) -> ListenerId
    where
        F: Fn(&str, &A) + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.write().wildcards.push((id, Arc::new(f)));
        id
    }

    /// Remove listeners and return how many were removed.
    ///
    /// * `off(event, Some(id))` removes that one listener.
    /// * `off(event, None)` removes every listener of `event`.
    /// * `off(WILDCARD, None)` removes every listener of every event.
    pub fn off(&self, event: &str, id: Option<ListenerId>) -> usize {
        let mut registry = self.write();
        match (event, id) {
            (WILDCARD, None) => {
                let removed = registry.wildcards.len()
                    + registry.events.values().map(Vec::len).sum::<usize>();
                registry.events.clear();
                registry.wildcards.clear();
                removed
            }
            (WILDCARD, Some(id)) => {
                let before = registry.wildcards.len();
                registry.wildcards.retain(|(listener, _)| *listener != id);
                let mut removed = before - registry.wildcards.len();
                removed += remove_listener(&mut registry.events, WILDCARD, id);
                removed
            }
            (event, Some(id)) => remove_listener(&mut registry.events, event, id),
            (event, None) => registry.events.remove(event).map_or(0, |list| list.len()),
        }
    }

    /// Run every listener of `event` with `args`, then the wildcard listeners.
    ///
    /// Returns the number of listeners that ran. Triggering [`WILDCARD`]
    /// itself only reaches listeners registered under that exact name.
    pub fn trigger(&self, event: &str, args: &A) -> usize {
        let (listeners, wildcards) = {
            let registry = self.inner.registry.read().unwrap_or_else(PoisonError::into_inner);
            let listeners: Vec<Callback<A>> = registry
                .events
                .get(event)
                .map(|list| list.iter().map(|(_, cb)| Arc::clone(cb)).collect())
                .unwrap_or_default();
            let wildcards: Vec<AnyCallback<A>> = if event == WILDCARD {
                Vec::new()
            } else {
                registry.wildcards.iter().map(|(_, cb)| Arc::clone(cb)).collect()
            };
            (listeners, wildcards)
        };

        for listener in &listeners {
            listener(args);
        }
        for wildcard in &wildcards {
            wildcard(event, args);
        }
        listeners.len() + wildcards.len()
    }

    /// Number of listeners registered for `event`, not counting wildcards.
    pub fn listener_count(&self, event: &str) -> usize {
        self.inner
            .registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .events
            .get(event)
            .map_or(0, Vec::len)
    }

    /// Returns `true` if no listener of any kind is registered.
    pub fn is_empty(&self) -> bool {
        let registry = self.inner.registry.read().unwrap_or_else(PoisonError::into_inner);
        registry.events.is_empty() && registry.wildcards.is_empty()
    }

    /// Non-owning handle, for listeners that need to reach their own emitter
    /// without keeping it alive.
    pub(crate) fn downgrade(&self) -> WeakEmitter<A> {
        WeakEmitter {
            inner: Arc::downgrade(&self.inner),
        }
    }

    fn next_id(&self) -> ListenerId {
        ListenerId(self.inner.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn insert(&self, event: &str, id: ListenerId, callback: Callback<A>) {
        self.write()
            .events
            .entry(event.to_owned())
            .or_default()
            .push((id, callback));
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Registry<A>> {
        self.inner.registry.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn remove_listener<A>(
    events: &mut HashMap<String, Vec<(ListenerId, Callback<A>)>>,
    event: &str,
    id: ListenerId,
) -> usize {
    let Some(list) = events.get_mut(event) else {
        return 0;
    };
    let before = list.len();
    list.retain(|(listener, _)| *listener != id);
    let removed = before - list.len();
    if list.is_empty() {
        events.remove(event);
    }
    removed
}

/// Weak counterpart of [`Emitter`].
pub(crate) struct WeakEmitter<A> {
    inner: Weak<Inner<A>>,
}

impl<A> WeakEmitter<A> {
    pub(crate) fn upgrade(&self) -> Option<Emitter<A>> {
        self.inner.upgrade().map(|inner| Emitter { inner })
    }
}
