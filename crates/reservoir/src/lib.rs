//! # Reservoir
//!
//! A reactive manager for keyed data instances. A model names a family of
//! values; a model plus params selects one instance; the instance holds a
//! single observable [`State`] that only changes through the model's effects.
//!
//! ## Core Concepts
//!
//! - [`Model`] = what an instance is (params, data, effects, live hook)
//! - [`Selection`] = a model bound to params, resolvable in any [`Context`]
//! - [`Instance`] = the stateful unit, one per [`Key`] per context
//! - [`Effect`] = a named operation returning an [`Outcome`]
//!
//! ## Architecture
//!
//! ```text
//! Namespace::define(name, model)
//!     │
//!     ▼ select(params)
//! Selection ──── resolve(&ctx) ───────────────────────┐
//!     │                                               │
//!     ▼ effect(e)                                     ▼
//! ctx.dispatch(action) ──► Instance ◄── Context (DashMap<Key, instance>)
//!                            │
//!                            ├─► EffectQueue (FIFO, one at a time)
//!                            │        │
//!                            │        ▼
//!                            │   Model::run → Outcome::{Ready, Deferred}
//!                            │        │
//!                            │        ▼
//!                            ├─► State { data, error, is_pending } ──► listeners
//!                            │
//!                            └─► subscribers 0→1: Model::live → Die
//!                                subscribers 1→0: Die(clear_data) → evict later
//! ```
//!
//! ## Key Invariants
//!
//! 1. **One instance per key** - within a context, `encode([name, params])`
//!    identifies exactly one instance
//! 2. **State is replaced, never mutated** - every replacement notifies all
//!    listeners exactly once
//! 3. **Effects never overlap** - effects on one instance run strictly in
//!    dispatch order
//! 4. **Failures land in state** - an effect error or panic sets
//!    `state.error` and keeps `data`; dispatchers never see it
//! 5. **Eviction is lazy** - an unused instance stays until its queue drained
//!    and the clear delay elapsed without a new subscriber
//!
//! ## Runtime
//!
//! Synchronous effects run on the caller's stack and need no runtime.
//! Deferred outcomes and `clear_data` spawn on the current Tokio runtime.
//!
//! ## Example
//!
//! ```
//! use reservoir_core::{effect_names, Context, Effect, EffectContext, Model, Namespace, Outcome};
//!
//! struct Counter;
//!
//! #[derive(Debug)]
//! enum CounterEffect {
//!     Increment,
//! }
//!
//! impl Effect for CounterEffect {
//!     effect_names!(Increment);
//! }
//!
//! impl Model for Counter {
//!     type Params = ();
//!     type Data = i64;
//!     type App = ();
//!     type Effect = CounterEffect;
//!
//!     fn run(&self, effect: CounterEffect, cx: EffectContext<Self>) -> Outcome<i64> {
//!         match effect {
//!             CounterEffect::Increment => Outcome::value(cx.data().copied().unwrap_or(0) + 1),
//!         }
//!     }
//! }
//!
//! # fn main() -> Result<(), reservoir_core::ModelError> {
//! let ns = Namespace::new();
//! let counter = ns.define("counter", Counter)?;
//! let ctx = Context::new(());
//!
//! ctx.dispatch(counter.select(()).effect(CounterEffect::Increment))?;
//! ctx.dispatch(counter.select(()).effect(CounterEffect::Increment))?;
//!
//! assert_eq!(counter.select(()).resolve(&ctx)?.get_state().data, Some(2));
//! # Ok(())
//! # }
//! ```

// Core modules
mod config;
mod context;
mod debug;
mod effect;
mod effect_macro;
mod error;
mod instance;
mod key;
mod model;
mod queue;
mod state;
mod subscription;
mod sync;


// Snapshot and hydration tests (test-only)
#[cfg(test)]
mod hydration_tests;

// Re-export configuration
pub use config::{ContextConfig, DEFAULT_CLEAR_DELAY};

// Re-export context types
pub use context::{Context, ContextBuilder};

// Re-export debug event types
pub use debug::{DebugEvent, DebugEventKind, Debugger, EffectInfo, ModelSnapshot};

// Re-export effect types
pub use effect::{Effect, EffectContext, Effects, Outcome};

// Re-export error types
pub use error::{EffectError, ModelError};

// Re-export instance types
pub use instance::Instance;

// Re-export key encoding
pub use key::{encode, encode_optional, Key};

// Re-export model types
pub use model::{Die, DieContext, LiveContext, Model, ModelDef, Namespace, Selection};

// Re-export building blocks
pub use queue::{EffectQueue, Job};
pub use state::{State, StateSnapshot};
pub use subscription::{ListenerGuard, SubscriptionList};
