//! End-to-end scenarios through the public API.

use std::sync::Arc;
use std::time::Duration;

use reservoir_core::{
    effect_names, Context, DebugEventKind, Die, DieContext, Effect, EffectContext, LiveContext,
    Model, ModelDef, Namespace, Outcome,
};
use reservoir_testing::{EventRecorder, StateRecorder};

struct Counter;

#[derive(Debug)]
enum CounterEffect {
    Increment,
    IncrementLater,
    Reject,
    Spread,
}

impl Effect for CounterEffect {
    effect_names!(Increment, IncrementLater, Reject, Spread);
}

impl Model for Counter {
    type Params = ();
    type Data = i64;
    type App = ();
    type Effect = CounterEffect;

    fn run(&self, effect: CounterEffect, cx: EffectContext<Self>) -> Outcome<i64> {
        let current = cx.data().copied();
        match effect {
            CounterEffect::Increment => Outcome::value(current.unwrap_or(0) + 1),
            CounterEffect::IncrementLater => Outcome::deferred(async move {
                tokio::time::sleep(Duration::from_millis(25)).await;
                Ok(current.unwrap_or(0) + 1)
            }),
            CounterEffect::Reject => Outcome::deferred(async {
                tokio::time::sleep(Duration::from_millis(25)).await;
                Err(anyhow::anyhow!("rejected"))
            }),
            CounterEffect::Spread => {
                let effects = cx.effects();
                cx.detach(move || Outcome::value(effects.get_state().data.unwrap_or(0) * 10));
                Outcome::value(current.unwrap_or(0) + 1)
            }
        }
    }

    fn live(&self, _: LiveContext<Self>) -> Option<Die> {
        Some(Box::new(|die: DieContext| die.clear_data(None)))
    }
}

fn counter() -> ModelDef<Counter> {
    Namespace::new().define("counter", Counter).unwrap()
}

#[test]
fn counter_increments_twice() -> anyhow::Result<()> {
    let counter = counter();
    let ctx = Context::new(());
    let instance = counter.select(()).resolve(&ctx)?;
    let states = StateRecorder::subscribe(&instance);

    ctx.dispatch(counter.select(()).effect(CounterEffect::Increment))?;
    ctx.dispatch(counter.select(()).effect(CounterEffect::Increment))?;

    states.expect_data(&[Some(1), Some(2)])?;
    assert_eq!(states.len(), 2);
    let last = instance.get_state();
    assert_eq!(last.data, Some(2));
    assert!(!last.is_pending);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn rejected_deferred_effect_reports_error_and_keeps_data() -> anyhow::Result<()> {
    let counter = counter();
    let ctx = Context::new(());
    let instance = counter.select(()).resolve(&ctx)?;
    instance.dispatch(CounterEffect::Increment);
    let states = StateRecorder::subscribe(&instance);

    instance.dispatch(CounterEffect::Reject);
    states.wait_for(2).await;

    assert_eq!(states.pending_flags(), vec![true, false]);
    states.expect_data(&[Some(1), Some(1)])?;
    let error = states.last().and_then(|s| s.error).map(|e| e.to_string());
    assert_eq!(error.as_deref(), Some("rejected"));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn pending_is_true_exactly_while_work_remains() -> anyhow::Result<()> {
    let counter = counter();
    let ctx = Context::new(());
    let instance = counter.select(()).resolve(&ctx)?;
    let states = StateRecorder::subscribe(&instance);

    instance.dispatch(CounterEffect::IncrementLater);
    instance.dispatch(CounterEffect::Increment);
    instance.dispatch(CounterEffect::IncrementLater);
    ctx.will_all_ready().await;

    // start, first settles with two behind, sync settles with one behind,
    // last settles with nothing behind.
    assert_eq!(states.pending_flags(), vec![true, true, true, false]);
    states.expect_data(&[None, Some(1), Some(2), Some(3)])?;
    assert!(!instance.get_state().is_pending);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn idle_instance_is_evicted_after_fifteen_seconds() -> anyhow::Result<()> {
    let counter = counter();
    let ctx = Context::new(());
    let instance = counter.select(()).resolve(&ctx)?;
    instance.dispatch(CounterEffect::Increment);

    let states = StateRecorder::subscribe(&instance);
    states.unsubscribe();

    tokio::time::sleep(Duration::from_millis(14_999)).await;
    assert_eq!(ctx.len(), 1);
    tokio::time::sleep(Duration::from_millis(2)).await;
    assert!(ctx.is_empty());
    assert!(ctx.get_all_state().is_empty());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn resubscribe_within_window_keeps_state() -> anyhow::Result<()> {
    let counter = counter();
    let ctx = Context::new(());
    let instance = counter.select(()).resolve(&ctx)?;
    instance.dispatch(CounterEffect::Increment);

    StateRecorder::subscribe(&instance).unsubscribe();
    tokio::time::sleep(Duration::from_secs(5)).await;
    let states = StateRecorder::subscribe(&instance);
    tokio::time::sleep(Duration::from_secs(60)).await;

    let again = counter.select(()).resolve(&ctx)?;
    assert!(Arc::ptr_eq(&instance, &again));
    assert_eq!(again.get_state().data, Some(1));
    assert_eq!(instance.subscriber_count(), 1);
    drop(states);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn will_all_ready_covers_work_enqueued_on_completion() -> anyhow::Result<()> {
    struct Relay;

    #[derive(Debug)]
    enum Hop {
        Hop(u8),
    }

    impl Effect for Hop {
        effect_names!(Hop);
    }

    impl Model for Relay {
        type Params = ();
        type Data = u8;
        type App = ();
        type Effect = Hop;

        fn run(&self, Hop::Hop(n): Hop, cx: EffectContext<Self>) -> Outcome<u8> {
            let effects = cx.effects();
            Outcome::deferred(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                if n < 3 {
                    effects.dispatch(Hop::Hop(n + 1));
                }
                Ok(n)
            })
        }
    }

    let relay = Namespace::new().define("relay", Relay)?;
    let ctx = Context::new(());
    ctx.dispatch(relay.select(()).effect(Hop::Hop(0)))?;
    ctx.will_all_ready().await;

    let state = relay.select(()).resolve(&ctx)?.get_state();
    assert_eq!(state.data, Some(3));
    assert!(!state.is_pending);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn debug_events_follow_the_instance_lifecycle() -> anyhow::Result<()> {
    let counter = counter();
    let ctx = Context::new(());
    let events = EventRecorder::attach(&ctx);
    let instance = counter.select(()).resolve(&ctx)?;

    let states = StateRecorder::subscribe(&instance);
    instance.dispatch(CounterEffect::Increment);
    instance.dispatch(CounterEffect::IncrementLater);
    instance.dispatch(CounterEffect::Spread);
    instance.dispatch(CounterEffect::Reject);
    ctx.will_all_ready().await;
    drop(states);
    tokio::time::sleep(Duration::from_secs(16)).await;

    assert_eq!(
        events.kinds(),
        vec![
            DebugEventKind::Live,
            DebugEventKind::SyncEffectSuccess,
            DebugEventKind::EffectStart,
            DebugEventKind::EffectSuccess,
            DebugEventKind::SyncEffectSuccess,
            DebugEventKind::DetachSuccess,
            DebugEventKind::EffectStart,
            DebugEventKind::EffectError,
            DebugEventKind::Die,
            DebugEventKind::ClearData,
        ]
    );

    let all = events.events();
    let spread = &all[4];
    assert_eq!(spread.effect.as_ref().map(|e| e.name), Some("Spread"));
    assert_eq!(spread.model.name, "counter");
    assert_eq!(spread.model.state.data, Some(serde_json::json!(3)));
    assert_eq!(all[5].model.state.data, Some(serde_json::json!(30)));
    assert!(all.iter().all(|e| e.instance == instance.id()));
    assert_eq!(events.kinds_for("counter").len(), all.len());
    Ok(())
}
