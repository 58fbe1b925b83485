//! The contract every game backend implements, plus the listener registry
//! backends use to publish state.

use std::sync::{Arc, Mutex, PoisonError, Weak};

use tracing::{debug, instrument};

use crate::error::SyncError;
use crate::games::tictactoe::GameState;

/// Result of a move submission.
///
/// `Ok(Some(state))` carries the state the move produced when the backend
/// applies moves itself. `Ok(None)` means the move was confirmed and the
/// resulting state will arrive through subscribers.
pub type MoveResult = Result<Option<GameState>, SyncError>;

/// Callback invoked with every published value.
pub type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Callback invoked with every published [`GameState`].
pub type StateListener = Listener<GameState>;

/// Operations shared by the local and the ledger-backed game.
///
/// Methods take `&self`; backends keep their state behind interior
/// mutability because oracle callbacks mutate it concurrently with callers.
#[async_trait::async_trait]
pub trait GameStateManager: Send + Sync {
    /// Establishes backend preconditions. Idempotent.
    async fn initialize(&self) -> Result<(), SyncError>;

    /// Attempts a move, validating it before any externally visible effect.
    async fn submit_move(&self, position: usize) -> MoveResult;

    /// Returns the last known state without touching the network.
    fn read_state(&self) -> GameState;

    /// Returns to a fresh empty board and releases subscriptions and timers.
    async fn reset(&self) -> Result<(), SyncError>;

    /// Registers a listener for every state transition.
    fn subscribe(&self, listener: StateListener) -> Subscription;
}

struct ListenerTable<T> {
    next_id: u64,
    entries: Vec<(u64, Listener<T>)>,
}

/// Ordered set of listeners.
///
/// Delivery is synchronous and in registration order. The table lock is not
/// held while callbacks run, so a callback may subscribe or unsubscribe.
pub struct Listeners<T> {
    table: Arc<Mutex<ListenerTable<T>>>,
}

impl<T: 'static> Listeners<T> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            table: Arc::new(Mutex::new(ListenerTable {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }

    /// Registers a listener.
    #[instrument(skip_all)]
    pub fn add(&self, listener: Listener<T>) -> Subscription {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        let id = table.next_id;
        table.next_id += 1;
        table.entries.push((id, listener));
        debug!(listener_id = id, count = table.entries.len(), "Listener registered");

        let weak: Weak<Mutex<ListenerTable<T>>> = Arc::downgrade(&self.table);
        Subscription {
            id,
            release: Some(Box::new(move || {
                if let Some(table) = weak.upgrade() {
                    let mut table = table.lock().unwrap_or_else(PoisonError::into_inner);
                    table.entries.retain(|(entry_id, _)| *entry_id != id);
                    debug!(listener_id = id, count = table.entries.len(), "Listener removed");
                }
            })),
        }
    }

    /// Delivers `value` to every listener, in registration order.
    pub fn notify(&self, value: &T) {
        let snapshot: Vec<Listener<T>> = {
            let table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
            table.entries.iter().map(|(_, l)| Arc::clone(l)).collect()
        };
        for listener in snapshot {
            listener(value);
        }
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    /// Returns true when nobody is listening.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: 'static> Default for Listeners<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Listeners<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self
            .table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len();
        f.debug_struct("Listeners").field("count", &count).finish()
    }
}

/// Handle returned by `subscribe`.
///
/// Dropping the handle keeps the listener registered; call
/// [`Subscription::unsubscribe`] to remove it. Removing one listener never
/// affects the others.
#[must_use = "keep the subscription to be able to unsubscribe"]
pub struct Subscription {
    id: u64,
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Identifier unique within the issuing registry.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Removes the listener.
    pub fn unsubscribe(mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_registration_order() {
        let listeners: Listeners<u32> = Listeners::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let subs: Vec<Subscription> = (0..3)
            .map(|i| {
                let log = Arc::clone(&log);
                listeners.add(Arc::new(move |v: &u32| log.lock().unwrap().push((i, *v))))
            })
            .collect();

        listeners.notify(&7);
        assert_eq!(*log.lock().unwrap(), vec![(0, 7), (1, 7), (2, 7)]);
        drop(subs);
    }

    #[test]
    fn test_unsubscribe_one_keeps_others() {
        let listeners: Listeners<u32> = Listeners::new();
        let a = Arc::new(AtomicUsize::new(0));
        let b = Arc::new(AtomicUsize::new(0));
        let a2 = Arc::clone(&a);
        let b2 = Arc::clone(&b);
        let sub_a = listeners.add(Arc::new(move |_| {
            a2.fetch_add(1, Ordering::SeqCst);
        }));
        let _sub_b = listeners.add(Arc::new(move |_| {
            b2.fetch_add(1, Ordering::SeqCst);
        }));

        sub_a.unsubscribe();
        listeners.notify(&1);

        assert_eq!(a.load(Ordering::SeqCst), 0);
        assert_eq!(b.load(Ordering::SeqCst), 1);
        assert_eq!(listeners.len(), 1);
    }

    #[test]
    fn test_listener_may_subscribe_during_delivery() {
        let listeners: Arc<Listeners<u32>> = Arc::new(Listeners::new());
        let inner = Arc::clone(&listeners);
        let _sub = listeners.add(Arc::new(move |_| {
            let _ = inner.add(Arc::new(|_| {}));
        }));
        listeners.notify(&0);
        assert_eq!(listeners.len(), 2);
    }
}
