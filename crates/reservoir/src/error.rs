//! Error types used by model definitions, contexts and effects.
//!
//! - [`ModelError`]: programming or configuration mistakes, returned from
//!   [`Namespace::define`](crate::Namespace::define) and selection resolution.
//! - [`EffectError`]: a failed effect, stored in [`State::error`](crate::State).
//!   Effect failures never surface anywhere else.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// # Errors raised while defining models or resolving instances.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ModelError {
    /// A model with this name already exists in the namespace.
    #[error("model name {name:?} is already defined in this namespace")]
    NameTaken {
        /// The rejected name.
        name: String,
    },

    /// Params could not be lowered to JSON for key encoding.
    #[error("params for model {model:?} cannot be encoded: {source}")]
    InvalidParams {
        /// Model whose params failed.
        model: String,
        #[source]
        source: serde_json::Error,
    },

    /// The key is already bound to an instance of another model type.
    ///
    /// Happens only when two namespaces define the same name and both are
    /// used against one context.
    #[error("key {key} is bound to a different model type")]
    KeyConflict {
        /// The conflicting key.
        key: String,
    },
}

impl ModelError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use reservoir_core::ModelError;
    ///
    /// let err = ModelError::NameTaken { name: "counter".into() };
    /// assert_eq!(err.as_label(), "model_name_taken");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            ModelError::NameTaken { .. } => "model_name_taken",
            ModelError::InvalidParams { .. } => "model_invalid_params",
            ModelError::KeyConflict { .. } => "model_key_conflict",
        }
    }
}

/// # Failure of an effect body.
///
/// Clones share the same underlying error, so a state snapshot can be copied
/// around freely. Equality is identity: two `EffectError`s are equal when they
/// come from the same failure.
#[derive(Clone)]
pub struct EffectError(Arc<anyhow::Error>);

impl EffectError {
    pub fn new(error: anyhow::Error) -> Self {
        Self(Arc::new(error))
    }

    /// Builds an error from a plain message.
    pub fn msg(message: impl fmt::Display + fmt::Debug + Send + Sync + 'static) -> Self {
        Self::new(anyhow::Error::msg(message))
    }

    pub(crate) fn from_panic(payload: &(dyn Any + Send)) -> Self {
        Self::msg(format!("effect panicked: {}", panic_message(payload)))
    }

    /// The wrapped error.
    pub fn inner(&self) -> &anyhow::Error {
        &self.0
    }

    /// Attempts to view the root error as a concrete type.
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        self.0.downcast_ref::<E>()
    }
}

impl From<anyhow::Error> for EffectError {
    fn from(error: anyhow::Error) -> Self {
        Self::new(error)
    }
}

impl PartialEq for EffectError {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Display for EffectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.0, f)
    }
}

impl fmt::Debug for EffectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl std::error::Error for EffectError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_stable() {
        let err = ModelError::KeyConflict { key: "ascounter|o".into() };
        assert_eq!(err.as_label(), "model_key_conflict");
        assert!(err.to_string().contains("ascounter|o"));
    }

    #[test]
    fn effect_error_clones_compare_equal() {
        let err = EffectError::msg("boom");
        let copy = err.clone();
        assert_eq!(err, copy);
        assert_ne!(err, EffectError::msg("boom"));
        assert_eq!(copy.to_string(), "boom");
    }

    #[test]
    fn panic_payloads_become_messages() {
        let payload: Box<dyn Any + Send> = Box::new("bad state");
        assert_eq!(
            EffectError::from_panic(payload.as_ref()).to_string(),
            "effect panicked: bad state"
        );

        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
    }

    #[test]
    fn downcast_reaches_the_root_error() {
        #[derive(Debug, thiserror::Error)]
        #[error("not found: {0}")]
        struct NotFound(u32);

        let err = EffectError::new(anyhow::Error::new(NotFound(7)));
        assert_eq!(err.downcast_ref::<NotFound>().map(|e| e.0), Some(7));
    }
}
