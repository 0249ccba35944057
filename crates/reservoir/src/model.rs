//! # Models, namespaces and selections.
//!
//! A [`Model`] describes a family of instances: its params, its data, the
//! effects it accepts and the live hook run while it has subscribers.
//!
//! ```text
//! Namespace::define(name, model) ─► ModelDef ─► select(params) ─► Selection
//!                                                                   │
//!                                         resolve(&Context) ◄───────┘
//!                                                 │
//!                                                 ▼
//!                                         Arc<Instance<M>>  (one per key)
//! ```
//!
//! ## Names
//! Model names must be unique within a [`Namespace`]; defining a taken name
//! fails with [`ModelError::NameTaken`]. The name is part of every instance
//! key, so two models never share storage.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::context::Context;
use crate::effect::{Effect, EffectContext, Effects, Outcome};
use crate::error::ModelError;
use crate::instance::Instance;
use crate::key::Key;
use crate::state::State;
use crate::subscription::ListenerGuard;
use crate::sync::lock;

/// Callback run when the last subscriber leaves.
pub type Die = Box<dyn FnOnce(DieContext) + Send>;

/// A family of keyed instances.
///
/// # Example
/// ```
/// use reservoir_core::{effect_names, EffectContext, Model, Outcome};
///
/// struct Counter;
///
/// #[derive(Debug)]
/// enum CounterEffect {
///     Increment,
///     Set(i64),
/// }
///
/// impl reservoir_core::Effect for CounterEffect {
///     effect_names!(Increment, Set);
/// }
///
/// impl Model for Counter {
///     type Params = ();
///     type Data = i64;
///     type App = ();
///     type Effect = CounterEffect;
///
///     fn run(&self, effect: CounterEffect, cx: EffectContext<Self>) -> Outcome<i64> {
///         match effect {
///             CounterEffect::Increment => Outcome::value(cx.data().copied().unwrap_or(0) + 1),
///             CounterEffect::Set(v) => Outcome::value(v),
///         }
///     }
/// }
/// ```
pub trait Model: Send + Sync + Sized + 'static {
    /// Identifies an instance together with the model name.
    type Params: Serialize + Clone + Send + Sync + 'static;
    /// The value held in [`State::data`].
    type Data: Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static;
    /// Shared application handle passed to effects and hooks.
    type App: Send + Sync + 'static;
    /// The declared operations.
    type Effect: Effect;

    /// Runs one effect against the instance.
    fn run(&self, effect: Self::Effect, cx: EffectContext<Self>) -> Outcome<Self::Data>;

    /// Called on every 0→1 subscriber transition; the returned handle runs on
    /// the matching 1→0 transition.
    fn live(&self, cx: LiveContext<Self>) -> Option<Die> {
        let _ = cx;
        None
    }
}

/// What the live hook can see and do.
pub struct LiveContext<M: Model> {
    instance: Arc<Instance<M>>,
}

impl<M: Model> LiveContext<M> {
    pub(crate) fn new(instance: Arc<Instance<M>>) -> Self {
        Self { instance }
    }

    pub fn effects(&self) -> Effects<M> {
        Effects::new(Arc::clone(&self.instance))
    }

    pub fn params(&self) -> &M::Params {
        self.instance.params()
    }

    pub fn app(&self) -> &M::App {
        self.instance.app()
    }

    pub fn get_state(&self) -> State<M::Data> {
        self.instance.get_state()
    }

    /// Listens to state changes without counting as a subscriber.
    pub fn subscribe(&self, listener: impl Fn() + Send + Sync + 'static) -> ListenerGuard {
        self.instance.listen(listener)
    }
}

/// Passed to the die handle.
#[derive(Clone)]
pub struct DieContext {
    clear: Arc<dyn Fn(Option<Duration>) + Send + Sync>,
}

impl DieContext {
    pub(crate) fn new(clear: impl Fn(Option<Duration>) + Send + Sync + 'static) -> Self {
        Self {
            clear: Arc::new(clear),
        }
    }

    /// Evicts the instance once its queue drained and `delay` elapsed
    /// (context default when `None`), unless a subscriber returns first.
    pub fn clear_data(&self, delay: Option<Duration>) {
        (self.clear)(delay);
    }
}

impl fmt::Debug for DieContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DieContext").finish_non_exhaustive()
    }
}

/// Table of taken model names.
#[derive(Debug, Default)]
pub struct Namespace {
    names: Mutex<HashSet<String>>,
}

impl Namespace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `name` for `model`.
    pub fn define<M: Model>(
        &self,
        name: impl Into<String>,
        model: M,
    ) -> Result<ModelDef<M>, ModelError> {
        let name = name.into();
        if !lock(&self.names).insert(name.clone()) {
            tracing::warn!(model = %name, "model name already defined");
            return Err(ModelError::NameTaken { name });
        }
        Ok(ModelDef {
            name: name.into(),
            model: Arc::new(model),
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        lock(&self.names).contains(name)
    }
}

/// A named model, ready to be selected with params.
pub struct ModelDef<M> {
    name: Arc<str>,
    model: Arc<M>,
}

impl<M> Clone for ModelDef<M> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            model: Arc::clone(&self.model),
        }
    }
}

impl<M> fmt::Debug for ModelDef<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelDef").field("name", &self.name).finish()
    }
}

impl<M: Model> ModelDef<M> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn model(&self) -> &Arc<M> {
        &self.model
    }

    pub fn select(&self, params: M::Params) -> Selection<M> {
        Selection {
            def: self.clone(),
            params,
        }
    }
}

/// A model bound to params; resolves to an instance per context.
pub struct Selection<M: Model> {
    def: ModelDef<M>,
    params: M::Params,
}

impl<M: Model> Clone for Selection<M> {
    fn clone(&self) -> Self {
        Self {
            def: self.def.clone(),
            params: self.params.clone(),
        }
    }
}

impl<M: Model> fmt::Debug for Selection<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Selection");
        s.field("model", &self.def.name());
        match self.key() {
            Ok(key) => s.field("key", &key.as_str()),
            Err(_) => s.field("key", &"<unencodable>"),
        };
        s.finish()
    }
}

impl<M: Model> Selection<M> {
    pub fn def(&self) -> &ModelDef<M> {
        &self.def
    }

    pub fn params(&self) -> &M::Params {
        &self.params
    }

    /// The key this selection resolves to in any context.
    pub fn key(&self) -> Result<Key, ModelError> {
        let params = serde_json::to_value(&self.params).map_err(|source| {
            ModelError::InvalidParams {
                model: self.def.name().to_string(),
                source,
            }
        })?;
        Ok(Key::for_instance(self.def.name(), &params))
    }

    /// Returns the instance for this selection, creating it on first use.
    pub fn resolve(&self, context: &Context<M::App>) -> Result<Arc<Instance<M>>, ModelError> {
        context.registry().resolve(&self.def, &self.params)
    }

    /// Action dispatching `effect` on this selection's instance.
    ///
    /// ```ignore
    /// context.dispatch(counter.select(()).effect(CounterEffect::Increment))?;
    /// ```
    pub fn effect(
        &self,
        effect: M::Effect,
    ) -> impl FnOnce(&Context<M::App>) -> Result<(), ModelError> + Send + 'static {
        let selection = self.clone();
        move |context: &Context<M::App>| {
            selection.resolve(context)?.dispatch(effect);
            Ok(())
        }
    }
}
