//! Testing utilities for reservoir models.
//!
//! - [`StateRecorder`] subscribes to an instance and keeps every state it was
//!   notified with, in order.
//! - [`EventRecorder`] keeps every debug event of a context.
//!
//! # Usage
//!
//! ```rust,ignore
//! let instance = counter.select(()).resolve(&ctx)?;
//! let states = StateRecorder::subscribe(&instance);
//!
//! instance.dispatch(CounterEffect::Increment);
//! instance.dispatch(CounterEffect::Increment);
//!
//! states.expect_data(&[Some(1), Some(2)])?;
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use reservoir_core::{
    Context, DebugEvent, DebugEventKind, Instance, ListenerGuard, Model, State,
};
use tokio::sync::Notify;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared append-only log that wakes waiters on every push.
struct Log<T> {
    entries: Mutex<Vec<T>>,
    pushed: Notify,
}

impl<T: Clone> Log<T> {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(Vec::new()),
            pushed: Notify::new(),
        })
    }

    fn push(&self, entry: T) {
        lock(&self.entries).push(entry);
        self.pushed.notify_waiters();
    }

    fn snapshot(&self) -> Vec<T> {
        lock(&self.entries).clone()
    }

    fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    async fn wait_for_len(&self, len: usize) {
        loop {
            let pushed = self.pushed.notified();
            if self.len() >= len {
                return;
            }
            pushed.await;
        }
    }
}

/// Records the state of an instance at every notification.
///
/// Holds a counted subscription until dropped or
/// [`unsubscribe`](StateRecorder::unsubscribe)d.
pub struct StateRecorder<D> {
    log: Arc<Log<State<D>>>,
    guard: ListenerGuard,
}

impl<D: Clone + Send + Sync + 'static> StateRecorder<D> {
    /// Subscribes to `instance` (counts as a subscriber).
    pub fn subscribe<M: Model<Data = D>>(instance: &Arc<Instance<M>>) -> Self {
        let log = Log::new();
        let weak = Arc::downgrade(instance);
        let sink = Arc::clone(&log);
        let guard = instance.subscribe(move || {
            if let Some(instance) = weak.upgrade() {
                sink.push(instance.get_state());
            }
        });
        Self { log, guard }
    }

    /// Every recorded state, oldest first.
    pub fn states(&self) -> Vec<State<D>> {
        self.log.snapshot()
    }

    /// Number of notifications received.
    pub fn len(&self) -> usize {
        self.log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn last(&self) -> Option<State<D>> {
        self.states().pop()
    }

    /// `is_pending` of every recorded state.
    pub fn pending_flags(&self) -> Vec<bool> {
        self.states().iter().map(|s| s.is_pending).collect()
    }

    /// Resolves once at least `count` notifications arrived.
    pub async fn wait_for(&self, count: usize) {
        self.log.wait_for_len(count).await;
    }

    /// Drops the subscription; later notifications are not recorded.
    pub fn unsubscribe(&self) {
        self.guard.unsubscribe();
    }
}

impl<D: Clone + PartialEq + std::fmt::Debug + Send + Sync + 'static> StateRecorder<D> {
    /// Checks the data of every recorded state against `expected`.
    pub fn expect_data(&self, expected: &[Option<D>]) -> anyhow::Result<()> {
        let seen: Vec<Option<D>> = self.states().into_iter().map(|s| s.data).collect();
        anyhow::ensure!(
            seen == expected,
            "recorded data {seen:?} does not match expected {expected:?}"
        );
        Ok(())
    }
}

/// Records every debug event of a context.
pub struct EventRecorder {
    log: Arc<Log<DebugEvent>>,
    _guard: ListenerGuard,
}

impl EventRecorder {
    /// Creates the context's debugger (if needed) and listens to it.
    pub fn attach<A: Send + Sync + 'static>(context: &Context<A>) -> Self {
        let log = Log::new();
        let sink = Arc::clone(&log);
        let guard = context
            .debugger()
            .listen_to_all_events(move |event| sink.push(event.clone()));
        Self { log, _guard: guard }
    }

    pub fn events(&self) -> Vec<DebugEvent> {
        self.log.snapshot()
    }

    pub fn kinds(&self) -> Vec<DebugEventKind> {
        self.events().iter().map(|e| e.kind).collect()
    }

    /// Kinds of events reported for the model `name`.
    pub fn kinds_for(&self, name: &str) -> Vec<DebugEventKind> {
        self.events()
            .iter()
            .filter(|e| e.model.name == name)
            .map(|e| e.kind)
            .collect()
    }

    /// Events as JSON, for comparing against fixtures.
    pub fn to_json(&self) -> Vec<serde_json::Value> {
        self.events()
            .iter()
            .filter_map(|e| serde_json::to_value(e).ok())
            .collect()
    }

    /// Resolves once at least `count` events arrived.
    pub async fn wait_for(&self, count: usize) {
        self.log.wait_for_len(count).await;
    }
}
