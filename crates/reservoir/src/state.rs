//! Observable instance state and its serializable snapshot.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::EffectError;

/// The only externally observable value of an instance.
///
/// Replaced as a whole on every transition; never mutated in place.
#[derive(Debug, Clone, PartialEq)]
pub struct State<D> {
    pub data: Option<D>,
    pub error: Option<EffectError>,
    pub is_pending: bool,
}

impl<D> Default for State<D> {
    fn default() -> Self {
        Self {
            data: None,
            error: None,
            is_pending: false,
        }
    }
}

impl<D> State<D> {
    /// Idle state holding `data`.
    pub fn with_data(data: D) -> Self {
        Self {
            data: Some(data),
            error: None,
            is_pending: false,
        }
    }
}

impl<D: Serialize> State<D> {
    /// Lowers the state to its JSON snapshot.
    ///
    /// Data that fails to serialize is reported as absent.
    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            data: self
                .data
                .as_ref()
                .and_then(|d| serde_json::to_value(d).ok()),
            error: self.error.as_ref().map(ToString::to_string),
            is_pending: self.is_pending,
        }
    }
}

/// JSON form of a [`State`], as returned by
/// [`Context::get_all_state`](crate::Context::get_all_state) and accepted as an
/// initial-state seed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub is_pending: bool,
}

impl StateSnapshot {
    /// Seed holding `data`.
    pub fn from_data(data: impl Serialize) -> Result<Self, serde_json::Error> {
        Ok(Self {
            data: Some(serde_json::to_value(data)?),
            error: None,
            is_pending: false,
        })
    }

    /// Rebuilds a typed state from the snapshot.
    pub fn restore<D: DeserializeOwned>(self) -> Result<State<D>, serde_json::Error> {
        let data = match self.data {
            Some(value) => Some(serde_json::from_value(value)?),
            None => None,
        };
        Ok(State {
            data,
            error: self.error.map(EffectError::msg),
            is_pending: self.is_pending,
        })
    }
}
