//! # Context: the instance registry.
//!
//! A [`Context`] owns every instance created through it, keyed by [`Key`],
//! plus the initial-state seeds used to hydrate instances on first creation.
//! Contexts are independent of each other: the same selection resolves to a
//! different instance in each one.
//!
//! ## Architecture
//! ```text
//! Selection::resolve(&ctx)
//!     │ key = encode([name, params])
//!     ▼
//! Registry.instances (DashMap<Key, Arc<dyn AnyInstance>>)
//!     ├─ hit  → downcast to Arc<Instance<M>>
//!     └─ miss → take initial_state[key] (once) → Instance::new → insert
//!
//! Instance eviction (clear_data) ──► Registry::evict(key, instance id)
//! ```
//!
//! ## Rules
//! - At most one instance per key.
//! - A seed is consumed by the first instance created for its key; a later
//!   re-creation after eviction starts empty.
//! - Eviction only removes the exact instance that requested it, never a newer
//!   one that took its key.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{join_all, BoxFuture};
use uuid::Uuid;

use crate::config::ContextConfig;
use crate::debug::{DebugEvent, Debugger};
use crate::error::ModelError;
use crate::instance::Instance;
use crate::key::Key;
use crate::model::{Model, ModelDef};
use crate::state::{State, StateSnapshot};
use crate::subscription::SubscriptionList;
use crate::sync::lock;

/// Type-erased view of an instance, as stored in the registry.
pub(crate) trait AnyInstance: Send + Sync + 'static {
    fn id(&self) -> Uuid;
    fn snapshot(&self) -> StateSnapshot;
    fn will_ready(&self) -> BoxFuture<'static, ()>;
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// Shared interior of a [`Context`].
pub(crate) struct Registry<A> {
    app: Arc<A>,
    instances: DashMap<Key, Arc<dyn AnyInstance>>,
    initial_state: Mutex<HashMap<Key, StateSnapshot>>,
    debug: OnceLock<SubscriptionList<DebugEvent>>,
    config: ContextConfig,
}

impl<A: Send + Sync + 'static> Registry<A> {
    pub(crate) fn resolve<M>(
        self: &Arc<Self>,
        def: &ModelDef<M>,
        params: &M::Params,
    ) -> Result<Arc<Instance<M>>, ModelError>
    where
        M: Model<App = A>,
    {
        let params_json =
            serde_json::to_value(params).map_err(|source| ModelError::InvalidParams {
                model: def.name().to_string(),
                source,
            })?;
        let key = Key::for_instance(def.name(), &params_json);

        let erased = match self.instances.entry(key.clone()) {
            Entry::Occupied(entry) => Arc::clone(entry.get()),
            Entry::Vacant(entry) => {
                let seed = self.take_seed::<M::Data>(&key);
                let instance =
                    Instance::new(def.clone(), params.clone(), params_json, key.clone(), seed, self);
                tracing::debug!(key = %key, instance = %instance.id(), "instance created");
                let erased: Arc<dyn AnyInstance> = instance;
                entry.insert(Arc::clone(&erased));
                erased
            }
        };

        erased
            .into_any()
            .downcast::<Instance<M>>()
            .map_err(|_| ModelError::KeyConflict {
                key: key.to_string(),
            })
    }

    fn take_seed<D: serde::de::DeserializeOwned>(&self, key: &Key) -> State<D> {
        let Some(seed) = lock(&self.initial_state).remove(key) else {
            return State::default();
        };
        seed.restore().unwrap_or_else(|err| {
            tracing::warn!(key = %key, error = %err, "initial state does not match model data; starting empty");
            State::default()
        })
    }

    /// Removes `key` if it still maps to the instance `id`.
    pub(crate) fn evict(&self, key: &Key, id: Uuid) -> bool {
        self.instances.remove_if(key, |_, v| v.id() == id).is_some()
    }

    pub(crate) fn app(&self) -> &Arc<A> {
        &self.app
    }

    pub(crate) fn config(&self) -> &ContextConfig {
        &self.config
    }

    pub(crate) fn debug_sink(&self) -> Option<&SubscriptionList<DebugEvent>> {
        self.debug.get()
    }
}

/// Registry of model instances sharing one application handle.
pub struct Context<A> {
    inner: Arc<Registry<A>>,
}

impl<A> Clone for Context<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A: Send + Sync + 'static> Context<A> {
    /// Context with no seeds and default configuration.
    pub fn new(app: A) -> Self {
        Self::builder(app).build()
    }

    pub fn builder(app: A) -> ContextBuilder<A> {
        ContextBuilder {
            app,
            initial_state: HashMap::new(),
            config: ContextConfig::default(),
        }
    }

    pub(crate) fn registry(&self) -> &Arc<Registry<A>> {
        &self.inner
    }

    pub fn app(&self) -> &A {
        &self.inner.app
    }

    pub fn config(&self) -> &ContextConfig {
        &self.inner.config
    }

    /// Runs `action` against this context.
    pub fn dispatch<T>(&self, action: impl FnOnce(&Self) -> T) -> T {
        action(self)
    }

    /// Snapshot of every live instance's state, keyed by instance key.
    ///
    /// The result can be fed back as initial state of another context.
    pub fn get_all_state(&self) -> HashMap<Key, StateSnapshot> {
        let instances: Vec<(Key, Arc<dyn AnyInstance>)> = self
            .inner
            .instances
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect();
        instances
            .into_iter()
            .map(|(key, instance)| (key, instance.snapshot()))
            .collect()
    }

    /// Resolves once every instance known at call time has an idle queue.
    pub async fn will_all_ready(&self) {
        let waits: Vec<BoxFuture<'static, ()>> = self
            .inner
            .instances
            .iter()
            .map(|e| e.value().will_ready())
            .collect();
        join_all(waits).await;
    }

    /// Whether an instance currently exists for `key`.
    pub fn contains(&self, key: &Key) -> bool {
        self.inner.instances.contains_key(key)
    }

    /// Number of live instances.
    pub fn len(&self) -> usize {
        self.inner.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.instances.is_empty()
    }

    /// Debug event stream; created on first call.
    pub fn debugger(&self) -> Debugger {
        Debugger::new(self.inner.debug.get_or_init(SubscriptionList::new).clone())
    }
}

/// Builder for [`Context`].
pub struct ContextBuilder<A> {
    app: A,
    initial_state: HashMap<Key, StateSnapshot>,
    config: ContextConfig,
}

impl<A: Send + Sync + 'static> ContextBuilder<A> {
    /// Seeds consumed by the first instance created for each key.
    pub fn initial_state(mut self, seeds: HashMap<Key, StateSnapshot>) -> Self {
        self.initial_state.extend(seeds);
        self
    }

    /// Adds a single seed.
    pub fn seed(mut self, key: Key, snapshot: StateSnapshot) -> Self {
        self.initial_state.insert(key, snapshot);
        self
    }

    pub fn config(mut self, config: ContextConfig) -> Self {
        self.config = config;
        self
    }

    /// Overrides [`ContextConfig::clear_delay`].
    pub fn clear_delay(mut self, delay: Duration) -> Self {
        self.config.clear_delay = delay;
        self
    }

    pub fn build(self) -> Context<A> {
        Context {
            inner: Arc::new(Registry {
                app: Arc::new(self.app),
                instances: DashMap::new(),
                initial_state: Mutex::new(self.initial_state),
                debug: OnceLock::new(),
                config: self.config,
            }),
        }
    }
}
