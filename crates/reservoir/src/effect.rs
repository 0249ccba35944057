//! # Effects: named operations and their outcomes.
//!
//! A model declares its operations as one enum implementing [`Effect`]. The
//! model's [`run`](crate::Model::run) matches on it and returns an
//! [`Outcome`]: either a value that is ready now or a future that settles
//! later. The instance applies the outcome to its state; callers never see
//! the result directly.
//!
//! ## Detached effects
//! [`EffectContext::detach`] schedules follow-up work:
//! - called while `run` is still executing → runs after the parent's outcome
//!   settled, in registration order, before any other queued effect;
//! - called later (e.g. from inside a deferred future) → enqueued like any
//!   other effect.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use futures::FutureExt;
use smallvec::SmallVec;

use crate::error::ModelError;
use crate::instance::Instance;
use crate::model::{Model, Selection};
use crate::state::State;
use crate::sync::lock;

/// A model operation. Implement with [`effect_names!`](crate::effect_names).
pub trait Effect: fmt::Debug + Send + 'static {
    /// Stable operation name, reported in debug events.
    fn name(&self) -> &'static str;
}

/// Result of running an effect.
pub enum Outcome<D> {
    /// Settled synchronously. `Ok(None)` clears the data.
    Ready(anyhow::Result<Option<D>>),
    /// Settles later; the instance is pending until then.
    Deferred(BoxFuture<'static, anyhow::Result<Option<D>>>),
}

impl<D> Outcome<D> {
    pub fn value(data: D) -> Self {
        Outcome::Ready(Ok(Some(data)))
    }

    /// Ready outcome with no data.
    pub fn unset() -> Self {
        Outcome::Ready(Ok(None))
    }

    pub fn error(error: impl Into<anyhow::Error>) -> Self {
        Outcome::Ready(Err(error.into()))
    }

    pub fn ready(result: anyhow::Result<D>) -> Self {
        Outcome::Ready(result.map(Some))
    }

    /// Deferred outcome producing data.
    pub fn deferred<F>(fut: F) -> Self
    where
        F: Future<Output = anyhow::Result<D>> + Send + 'static,
        D: Send + 'static,
    {
        Outcome::Deferred(fut.map(|r| r.map(Some)).boxed())
    }

    /// Deferred outcome that may leave the data unset.
    pub fn deferred_optional<F>(fut: F) -> Self
    where
        F: Future<Output = anyhow::Result<Option<D>>> + Send + 'static,
    {
        Outcome::Deferred(fut.boxed())
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, Outcome::Deferred(_))
    }
}

impl<D: fmt::Debug> fmt::Debug for Outcome<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Ready(r) => f.debug_tuple("Ready").field(r).finish(),
            Outcome::Deferred(_) => f.write_str("Deferred(..)"),
        }
    }
}

pub(crate) type DetachedEffect<D> = Box<dyn FnOnce() -> Outcome<D> + Send>;

/// Detached effects registered while the parent's `run` is executing.
///
/// `None` once the parent returned.
pub(crate) struct DetachSlot<D> {
    pending: Mutex<Option<SmallVec<[DetachedEffect<D>; 2]>>>,
}

impl<D> DetachSlot<D> {
    pub(crate) fn open() -> Arc<Self> {
        Arc::new(Self {
            pending: Mutex::new(Some(SmallVec::new())),
        })
    }

    /// Stores `effect` if still open, otherwise hands it back.
    fn offer(&self, effect: DetachedEffect<D>) -> Option<DetachedEffect<D>> {
        match lock(&self.pending).as_mut() {
            Some(pending) => {
                pending.push(effect);
                None
            }
            None => Some(effect),
        }
    }

    pub(crate) fn close(&self) -> SmallVec<[DetachedEffect<D>; 2]> {
        lock(&self.pending).take().unwrap_or_default()
    }
}

/// Dispatcher for the effects of one instance.
pub struct Effects<M: Model> {
    instance: Arc<Instance<M>>,
}

impl<M: Model> Clone for Effects<M> {
    fn clone(&self) -> Self {
        Self {
            instance: Arc::clone(&self.instance),
        }
    }
}

impl<M: Model> Effects<M> {
    pub(crate) fn new(instance: Arc<Instance<M>>) -> Self {
        Self { instance }
    }

    /// Enqueues `effect` on the instance.
    pub fn dispatch(&self, effect: M::Effect) {
        self.instance.dispatch(effect);
    }

    pub fn get_state(&self) -> State<M::Data> {
        self.instance.get_state()
    }
}

/// What an effect body can see and do.
pub struct EffectContext<M: Model> {
    instance: Arc<Instance<M>>,
    data: Option<M::Data>,
    detached: Arc<DetachSlot<M::Data>>,
}

impl<M: Model> Clone for EffectContext<M> {
    fn clone(&self) -> Self {
        Self {
            instance: Arc::clone(&self.instance),
            data: self.data.clone(),
            detached: Arc::clone(&self.detached),
        }
    }
}

impl<M: Model> EffectContext<M> {
    pub(crate) fn new(
        instance: Arc<Instance<M>>,
        data: Option<M::Data>,
        detached: Arc<DetachSlot<M::Data>>,
    ) -> Self {
        Self {
            instance,
            data,
            detached,
        }
    }

    pub fn app(&self) -> &M::App {
        self.instance.app()
    }

    pub fn params(&self) -> &M::Params {
        self.instance.params()
    }

    /// Data as it was when this effect started.
    pub fn data(&self) -> Option<&M::Data> {
        self.data.as_ref()
    }

    /// Effects of the same instance.
    pub fn effects(&self) -> Effects<M> {
        Effects::new(Arc::clone(&self.instance))
    }

    /// Schedules follow-up work on this instance (see module docs for ordering).
    pub fn detach<F>(&self, effect: F)
    where
        F: FnOnce() -> Outcome<M::Data> + Send + 'static,
    {
        if let Some(effect) = self.detached.offer(Box::new(effect)) {
            self.instance.enqueue_detached(effect);
        }
    }

    /// Writes `data` into another instance of the same context through its queue.
    pub fn normalize<N>(&self, selection: &Selection<N>, data: N::Data) -> Result<(), ModelError>
    where
        N: Model<App = M::App>,
    {
        let Some(registry) = self.instance.registry() else {
            return Ok(());
        };
        let target = registry.resolve(selection.def(), selection.params())?;
        target.normalize(data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_pick_the_right_variant() {
        assert!(matches!(Outcome::value(1u8), Outcome::Ready(Ok(Some(1)))));
        assert!(matches!(Outcome::<u8>::unset(), Outcome::Ready(Ok(None))));
        assert!(matches!(
            Outcome::<u8>::error(anyhow::anyhow!("x")),
            Outcome::Ready(Err(_))
        ));
        assert!(Outcome::deferred(async { Ok(3u8) }).is_deferred());
        assert!(!Outcome::ready(Ok(3u8)).is_deferred());
    }

    #[tokio::test]
    async fn deferred_wraps_data_in_some() {
        match Outcome::deferred(async { Ok(5u8) }) {
            Outcome::Deferred(fut) => assert_eq!(fut.await.unwrap(), Some(5)),
            Outcome::Ready(_) => unreachable!(),
        }
    }

    #[test]
    fn slot_hands_effects_back_once_closed() {
        let slot = DetachSlot::<u8>::open();
        assert!(slot.offer(Box::new(Outcome::<u8>::unset)).is_none());
        assert_eq!(slot.close().len(), 1);
        assert!(slot.offer(Box::new(Outcome::<u8>::unset)).is_some());
        assert!(slot.close().is_empty());
    }
}
