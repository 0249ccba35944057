//! # Instance: state, effects and lifetime of one keyed model value.
//!
//! An [`Instance`] is created by its context the first time a selection with
//! its key is resolved. It owns:
//! - the current [`State`], replaced only through one internal writer that
//!   notifies listeners after every replacement;
//! - an [`EffectQueue`] serializing every effect, detached effect and
//!   normalize write;
//! - a subscriber count driving the model's live hook and die handle.
//!
//! ## Effect lifecycle
//! ```text
//! dispatch(effect) ──► queue.add(job)
//!                        │
//!                        ▼
//!               model.run(effect, cx)          detach() calls stored in slot
//!                        │ (slot closes here)
//!        ┌───────────────┴────────────────┐
//!  Ready(result)                   Deferred(future)
//!   apply(result)                    set pending, emit EffectStart
//!   emit SyncEffect{Success,Error}   await → apply → emit Effect{Success,Error}
//!        └───────────────┬────────────────┘
//!                        ▼
//!        detached effects, in order, same job → emit Detach{Success,Error}
//! ```
//!
//! ## Pending flag
//! - A deferred outcome sets `is_pending` (data and error kept).
//! - Settling keeps `is_pending` only while more work waits in the queue.
//!
//! ## Subscribers
//! ```text
//! subscribe: 0 → 1   cancel clear timer, emit Live, run model.live → die handle
//! unsubscribe: 1 → 0 run die handle(DieContext), emit Die
//! clear_data(delay)  spawn: join(queue drained, sleep(delay) | cancelled)
//!                    → still 0 subscribers → evict from context, emit ClearData
//! ```

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chrono::Utc;
use futures::future::BoxFuture;
use futures::FutureExt;
use smallvec::SmallVec;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::context::{AnyInstance, Registry};
use crate::debug::{DebugEvent, DebugEventKind, EffectInfo, ModelSnapshot};
use crate::effect::{DetachSlot, DetachedEffect, EffectContext, Effects, Outcome};
use crate::error::{panic_message, EffectError};
use crate::key::Key;
use crate::model::{Die, DieContext, LiveContext, Model, ModelDef};
use crate::queue::EffectQueue;
use crate::state::{State, StateSnapshot};
use crate::subscription::{ListenerGuard, SubscriptionList};
use crate::sync::lock;

type Settled<D> = Result<Option<D>, EffectError>;

/// Result of starting an effect body.
enum Started<D> {
    /// Applied to the state already.
    Settled,
    /// Pending flag set; the caller applies the result once it arrives.
    Pending(BoxFuture<'static, Settled<D>>),
}

type Detached<D> = SmallVec<[DetachedEffect<D>; 2]>;

struct Lifecycle {
    subscribers: usize,
    die: Option<Die>,
    clear: Option<CancellationToken>,
}

/// Live, stateful unit bound to one (model, params) pair within a context.
pub struct Instance<M: Model> {
    id: Uuid,
    def: ModelDef<M>,
    params: M::Params,
    params_json: serde_json::Value,
    key: Key,
    app: Arc<M::App>,
    registry: Weak<Registry<M::App>>,
    clear_delay: Duration,
    state: Mutex<State<M::Data>>,
    listeners: SubscriptionList<()>,
    queue: Arc<EffectQueue>,
    lifecycle: Mutex<Lifecycle>,
}

impl<M: Model> fmt::Debug for Instance<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("id", &self.id)
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl<M: Model> Instance<M> {
    pub(crate) fn new(
        def: ModelDef<M>,
        params: M::Params,
        params_json: serde_json::Value,
        key: Key,
        seed: State<M::Data>,
        registry: &Arc<Registry<M::App>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            def,
            params,
            params_json,
            key,
            app: Arc::clone(registry.app()),
            registry: Arc::downgrade(registry),
            clear_delay: registry.config().clear_delay,
            state: Mutex::new(seed),
            listeners: SubscriptionList::new(),
            queue: EffectQueue::new(),
            lifecycle: Mutex::new(Lifecycle {
                subscribers: 0,
                die: None,
                clear: None,
            }),
        })
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    /// Model name.
    pub fn name(&self) -> &str {
        self.def.name()
    }

    pub fn params(&self) -> &M::Params {
        &self.params
    }

    /// Unique per created instance; a re-created instance gets a new id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn app(&self) -> &M::App {
        &self.app
    }

    pub fn get_state(&self) -> State<M::Data> {
        lock(&self.state).clone()
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.lifecycle).subscribers
    }

    /// Dispatcher for this instance's effects.
    pub fn effects(self: &Arc<Self>) -> Effects<M> {
        Effects::new(Arc::clone(self))
    }

    /// Registers `listener` for state changes and counts it as a subscriber.
    ///
    /// The first subscriber runs the model's live hook. Dropping or
    /// unsubscribing the guard of the last one runs the die handle.
    pub fn subscribe(
        self: &Arc<Self>,
        listener: impl Fn() + Send + Sync + 'static,
    ) -> ListenerGuard {
        let inner = self.listeners.subscribe(move |_| listener());

        let first = {
            let mut lifecycle = lock(&self.lifecycle);
            lifecycle.subscribers += 1;
            if lifecycle.subscribers == 1 {
                if let Some(pending) = lifecycle.clear.take() {
                    pending.cancel();
                }
                true
            } else {
                false
            }
        };
        if first {
            self.go_live();
        }

        let me = Arc::clone(self);
        ListenerGuard::new(move || {
            inner.unsubscribe();
            me.release();
        })
    }

    /// Enqueues `effect`.
    pub fn dispatch(self: &Arc<Self>, effect: M::Effect) {
        let me = Arc::clone(self);
        self.queue.add(move || me.run_effect(effect));
    }

    /// Resolves once this instance's queue drained.
    pub async fn will_ready(&self) {
        self.queue.will_ready().await;
    }

    /// Listener that does not count as a subscriber.
    pub(crate) fn listen(&self, listener: impl Fn() + Send + Sync + 'static) -> ListenerGuard {
        self.listeners.subscribe(move |_| listener())
    }

    pub(crate) fn registry(&self) -> Option<Arc<Registry<M::App>>> {
        self.registry.upgrade()
    }

    /// Queues a write of `data` coming from another instance.
    pub(crate) fn normalize(self: &Arc<Self>, data: M::Data) {
        let me = Arc::clone(self);
        self.queue.add(move || {
            me.set_data(Some(data));
            me.emit(DebugEventKind::Normalize, None);
            None
        });
    }

    /// Queues a detached effect registered after its parent returned.
    pub(crate) fn enqueue_detached(self: &Arc<Self>, effect: DetachedEffect<M::Data>) {
        let me = Arc::clone(self);
        self.queue.add(move || {
            let mut detached = Detached::new();
            detached.push(effect);
            me.run_detached(detached, None)
        });
    }

    // State writers. All replacements go through `update_state`.

    fn update_state(&self, next: impl FnOnce(&State<M::Data>) -> Option<State<M::Data>>) {
        let changed = {
            let mut state = lock(&self.state);
            match next(&state) {
                Some(next) => {
                    *state = next;
                    true
                }
                None => false,
            }
        };
        if changed {
            self.listeners.notify(&());
        }
    }

    fn set_data(&self, data: Option<M::Data>) {
        let more_queued = !self.queue.is_empty();
        self.update_state(|state| {
            let is_pending = state.is_pending && more_queued;
            if is_pending == state.is_pending && state.data == data && state.error.is_none() {
                return None;
            }
            Some(State {
                data,
                error: None,
                is_pending,
            })
        });
    }

    fn set_error(&self, error: EffectError) {
        let more_queued = !self.queue.is_empty();
        self.update_state(|state| {
            Some(State {
                data: state.data.clone(),
                error: Some(error),
                is_pending: state.is_pending && more_queued,
            })
        });
    }

    fn set_pending(&self) {
        self.update_state(|state| {
            if state.is_pending {
                return None;
            }
            Some(State {
                is_pending: true,
                ..state.clone()
            })
        });
    }

    fn apply(&self, result: Settled<M::Data>) {
        match result {
            Ok(data) => self.set_data(data),
            Err(error) => {
                tracing::trace!(key = %self.key, error = %error, "effect failed");
                self.set_error(error);
            }
        }
    }

    // Effect execution.

    fn call(body: impl FnOnce() -> Outcome<M::Data>) -> Result<Outcome<M::Data>, EffectError> {
        catch_unwind(AssertUnwindSafe(body)).map_err(|panic| EffectError::from_panic(panic.as_ref()))
    }

    fn start(&self, called: Result<Outcome<M::Data>, EffectError>) -> Started<M::Data> {
        match called {
            Ok(Outcome::Ready(result)) => {
                self.apply(result.map_err(EffectError::new));
                Started::Settled
            }
            Ok(Outcome::Deferred(fut)) => {
                if Handle::try_current().is_err() {
                    tracing::error!(key = %self.key, "deferred effect dispatched outside a tokio runtime");
                    drop(fut);
                    self.apply(Err(EffectError::msg("deferred effect requires a Tokio runtime")));
                    return Started::Settled;
                }
                self.set_pending();
                Started::Pending(
                    AssertUnwindSafe(fut)
                        .catch_unwind()
                        .map(|settled| match settled {
                            Ok(result) => result.map_err(EffectError::new),
                            Err(panic) => Err(EffectError::from_panic(panic.as_ref())),
                        })
                        .boxed(),
                )
            }
            Err(error) => {
                self.apply(Err(error));
                Started::Settled
            }
        }
    }

    fn run_effect(self: &Arc<Self>, effect: M::Effect) -> Option<BoxFuture<'static, ()>> {
        let info = EffectInfo::of(&effect);
        let slot = DetachSlot::open();
        let cx = EffectContext::new(Arc::clone(self), self.get_state().data, Arc::clone(&slot));
        let model = Arc::clone(self.def.model());

        let called = Self::call(move || model.run(effect, cx));
        let detached = slot.close();

        match self.start(called) {
            Started::Settled => {
                self.emit_settled(
                    DebugEventKind::SyncEffectSuccess,
                    DebugEventKind::SyncEffectError,
                    Some(info.clone()),
                );
                self.run_detached(detached, Some(info))
            }
            Started::Pending(fut) => {
                self.emit(DebugEventKind::EffectStart, Some(info.clone()));
                let me = Arc::clone(self);
                Some(
                    async move {
                        me.apply(fut.await);
                        me.emit_settled(
                            DebugEventKind::EffectSuccess,
                            DebugEventKind::EffectError,
                            Some(info.clone()),
                        );
                        if let Some(rest) = me.run_detached(detached, Some(info)) {
                            rest.await;
                        }
                    }
                    .boxed(),
                )
            }
        }
    }

    /// Runs `detached` in order; parks on the first deferred one.
    fn run_detached(
        self: &Arc<Self>,
        detached: Detached<M::Data>,
        parent: Option<EffectInfo>,
    ) -> Option<BoxFuture<'static, ()>> {
        if detached.is_empty() {
            return None;
        }

        let mut remaining = detached.into_iter();
        while let Some(effect) = remaining.next() {
            if let Started::Pending(fut) = self.start(Self::call(effect)) {
                let rest: Detached<M::Data> = remaining.collect();
                return Some(Arc::clone(self).finish_detached(fut, rest, parent).boxed());
            }
        }
        self.emit_settled(
            DebugEventKind::DetachSuccess,
            DebugEventKind::DetachError,
            parent,
        );
        None
    }

    async fn finish_detached(
        self: Arc<Self>,
        parked: BoxFuture<'static, Settled<M::Data>>,
        rest: Detached<M::Data>,
        parent: Option<EffectInfo>,
    ) {
        self.apply(parked.await);
        for effect in rest {
            if let Started::Pending(fut) = self.start(Self::call(effect)) {
                self.apply(fut.await);
            }
        }
        self.emit_settled(
            DebugEventKind::DetachSuccess,
            DebugEventKind::DetachError,
            parent,
        );
    }

    // Subscriber lifecycle.

    fn go_live(self: &Arc<Self>) {
        tracing::debug!(key = %self.key, instance = %self.id, "instance live");
        self.emit(DebugEventKind::Live, None);

        let cx = LiveContext::new(Arc::clone(self));
        let model = Arc::clone(self.def.model());
        let die = match catch_unwind(AssertUnwindSafe(move || model.live(cx))) {
            Ok(die) => die,
            Err(panic) => {
                tracing::error!(
                    key = %self.key,
                    panic = %panic_message(panic.as_ref()),
                    "live hook panicked"
                );
                None
            }
        };
        // The subscriber that got here holds no guard yet, so the count
        // cannot drop to zero before the handle is stored.
        lock(&self.lifecycle).die = die;
    }

    fn release(self: &Arc<Self>) {
        let die = {
            let mut lifecycle = lock(&self.lifecycle);
            lifecycle.subscribers = lifecycle.subscribers.saturating_sub(1);
            if lifecycle.subscribers > 0 {
                return;
            }
            lifecycle.die.take()
        };

        tracing::debug!(key = %self.key, instance = %self.id, "instance idle");
        if let Some(die) = die {
            let weak = Arc::downgrade(self);
            let cx = DieContext::new(move |delay| {
                if let Some(me) = weak.upgrade() {
                    me.clear_data(delay);
                }
            });
            if let Err(panic) = catch_unwind(AssertUnwindSafe(move || die(cx))) {
                tracing::error!(
                    key = %self.key,
                    panic = %panic_message(panic.as_ref()),
                    "die handle panicked"
                );
            }
        }
        self.emit(DebugEventKind::Die, None);
    }

    /// Arms eviction; replaces any earlier request.
    fn clear_data(self: &Arc<Self>, delay: Option<Duration>) {
        let Ok(runtime) = Handle::try_current() else {
            tracing::warn!(key = %self.key, "clear_data requested outside a tokio runtime; instance kept");
            return;
        };
        let delay = delay.unwrap_or(self.clear_delay);
        let token = CancellationToken::new();
        if let Some(previous) = lock(&self.lifecycle).clear.replace(token.clone()) {
            previous.cancel();
        }

        let me = Arc::clone(self);
        runtime.spawn(async move {
            let timer = async {
                tokio::select! {
                    _ = token.cancelled() => false,
                    _ = tokio::time::sleep(delay) => true,
                }
            };
            let ((), elapsed) = tokio::join!(me.queue.will_ready(), timer);
            if elapsed {
                me.evict(&token);
            }
        });
    }

    fn evict(&self, token: &CancellationToken) {
        {
            let mut lifecycle = lock(&self.lifecycle);
            if lifecycle.subscribers > 0 || token.is_cancelled() {
                return;
            }
            lifecycle.clear = None;
        }
        let Some(registry) = self.registry() else {
            return;
        };
        if registry.evict(&self.key, self.id) {
            tracing::debug!(key = %self.key, instance = %self.id, "instance evicted");
            self.emit(DebugEventKind::ClearData, None);
        }
    }

    // Debug events.

    fn emit_settled(&self, ok: DebugEventKind, failed: DebugEventKind, effect: Option<EffectInfo>) {
        let kind = if lock(&self.state).error.is_some() {
            failed
        } else {
            ok
        };
        self.emit(kind, effect);
    }

    fn emit(&self, kind: DebugEventKind, effect: Option<EffectInfo>) {
        tracing::trace!(
            key = %self.key,
            instance = %self.id,
            event = %kind,
            effect = effect.as_ref().map(|e| e.name),
            "instance event"
        );

        let Some(registry) = self.registry() else {
            return;
        };
        let Some(sink) = registry.debug_sink() else {
            return;
        };
        sink.notify(&DebugEvent {
            kind,
            model: ModelSnapshot {
                name: self.def.name().to_string(),
                params: self.params_json.clone(),
                state: self.get_state().snapshot(),
            },
            effect,
            instance: self.id,
            at: Utc::now(),
        });
    }
}

impl<M: Model> AnyInstance for Instance<M> {
    fn id(&self) -> Uuid {
        self.id
    }

    fn snapshot(&self) -> StateSnapshot {
        self.get_state().snapshot()
    }

    fn will_ready(&self) -> BoxFuture<'static, ()> {
        let queue = Arc::clone(&self.queue);
        async move { queue.will_ready().await }.boxed()
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn std::any::Any + Send + Sync> {
        self
    }
}
