//! # Debug events
//!
//! Once [`Context::debugger`](crate::Context::debugger) has been called, every
//! instance of that context reports its transitions as [`DebugEvent`]s.
//! Before that, instances only log them at `trace` level.
//!
//! ## Event kinds
//! | Kind                                  | When                                                  |
//! |---------------------------------------|-------------------------------------------------------|
//! | `Live` / `Die`                        | first subscriber arrived / last subscriber left       |
//! | `EffectStart`                         | an effect returned a deferred outcome                 |
//! | `EffectSuccess` / `EffectError`       | that deferred outcome settled                         |
//! | `SyncEffectSuccess` / `SyncEffectError` | an effect settled synchronously                     |
//! | `DetachSuccess` / `DetachError`       | the detached effects of one effect all finished       |
//! | `Normalize`                           | a value was written in from another instance          |
//! | `ClearData`                           | the instance was evicted from its context             |
//!
//! Success vs error is read from the state right after settling: an error
//! kind means `state.error` is set at that point.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::effect::Effect;
use crate::state::StateSnapshot;
use crate::subscription::{ListenerGuard, SubscriptionList};

/// Classification of debug events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DebugEventKind {
    Live,
    Die,
    ClearData,
    EffectStart,
    EffectSuccess,
    EffectError,
    SyncEffectSuccess,
    SyncEffectError,
    DetachSuccess,
    DetachError,
    Normalize,
}

impl DebugEventKind {
    /// Returns a short stable label (camelCase) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            DebugEventKind::Live => "live",
            DebugEventKind::Die => "die",
            DebugEventKind::ClearData => "clearData",
            DebugEventKind::EffectStart => "effectStart",
            DebugEventKind::EffectSuccess => "effectSuccess",
            DebugEventKind::EffectError => "effectError",
            DebugEventKind::SyncEffectSuccess => "syncEffectSuccess",
            DebugEventKind::SyncEffectError => "syncEffectError",
            DebugEventKind::DetachSuccess => "detachSuccess",
            DebugEventKind::DetachError => "detachError",
            DebugEventKind::Normalize => "normalize",
        }
    }
}

impl fmt::Display for DebugEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Model identity and state at the moment of the event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelSnapshot {
    pub name: String,
    pub params: serde_json::Value,
    pub state: StateSnapshot,
}

/// The effect an event refers to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EffectInfo {
    pub name: &'static str,
    /// `Debug` rendering of the effect value.
    pub args: String,
}

impl EffectInfo {
    pub(crate) fn of<E: Effect>(effect: &E) -> Self {
        Self {
            name: effect.name(),
            args: format!("{effect:?}"),
        }
    }
}

/// One lifecycle or effect transition of an instance.
#[derive(Debug, Clone, Serialize)]
pub struct DebugEvent {
    pub kind: DebugEventKind,
    pub model: ModelSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effect: Option<EffectInfo>,
    /// Id of the instance; a re-created instance gets a new one.
    pub instance: Uuid,
    pub at: DateTime<Utc>,
}

/// Listener API over a context's debug event stream.
#[derive(Clone, Debug)]
pub struct Debugger {
    events: SubscriptionList<DebugEvent>,
}

impl Debugger {
    pub(crate) fn new(events: SubscriptionList<DebugEvent>) -> Self {
        Self { events }
    }

    /// Registers a listener for every event of every instance.
    pub fn listen_to_all_events(
        &self,
        listener: impl Fn(&DebugEvent) + Send + Sync + 'static,
    ) -> ListenerGuard {
        self.events.subscribe(listener)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    enum Demo {
        Load { page: u32 },
    }

    impl Effect for Demo {
        fn name(&self) -> &'static str {
            "Load"
        }
    }

    #[test]
    fn effect_info_records_name_and_args() {
        let info = EffectInfo::of(&Demo::Load { page: 2 });
        assert_eq!(info.name, "Load");
        assert_eq!(info.args, "Load { page: 2 }");
    }

    #[test]
    fn kinds_serialize_as_labels() {
        for kind in [
            DebugEventKind::SyncEffectError,
            DebugEventKind::ClearData,
            DebugEventKind::Live,
        ] {
            assert_eq!(
                serde_json::to_value(kind).unwrap(),
                serde_json::Value::String(kind.as_label().to_string())
            );
        }
    }
}
