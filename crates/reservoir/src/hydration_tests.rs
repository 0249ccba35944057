//! Snapshot and hydration tests: `get_all_state` output fed back as the
//! initial state of another context.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    effect_names, Context, Effect, EffectContext, Key, Model, Namespace, Outcome, StateSnapshot,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Profile {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct ProfileParams {
    id: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    locale: Option<String>,
}

#[derive(Debug)]
enum ProfileEffect {
    Rename(String),
    Fail,
}

impl Effect for ProfileEffect {
    effect_names!(Rename, Fail);
}

struct Profiles;

impl Model for Profiles {
    type Params = ProfileParams;
    type Data = Profile;
    type App = ();
    type Effect = ProfileEffect;

    fn run(&self, effect: ProfileEffect, cx: EffectContext<Self>) -> Outcome<Profile> {
        match effect {
            ProfileEffect::Rename(name) => Outcome::value(Profile {
                name,
                email: cx.data().and_then(|p| p.email.clone()),
            }),
            ProfileEffect::Fail => Outcome::error(anyhow::anyhow!("profile service down")),
        }
    }
}

fn params(id: u32) -> ProfileParams {
    ProfileParams { id, locale: None }
}

#[test]
fn absent_optional_params_do_not_change_the_key() {
    let def = Namespace::new().define("profile", Profiles).unwrap();
    let explicit = def.select(params(1)).key().unwrap();
    assert_eq!(explicit.as_str(), "asprofile|oid:1");
    let with_locale = def
        .select(ProfileParams {
            id: 1,
            locale: Some("fr".into()),
        })
        .key()
        .unwrap();
    assert_ne!(explicit, with_locale);
}

#[test]
fn get_all_state_round_trips_into_a_new_context() {
    let def = Namespace::new().define("profile", Profiles).unwrap();
    let server = Context::new(());
    server
        .dispatch(def.select(params(1)).effect(ProfileEffect::Rename("ada".into())))
        .unwrap();
    server
        .dispatch(def.select(params(2)).effect(ProfileEffect::Fail))
        .unwrap();

    let dump = server.get_all_state();
    assert_eq!(dump.len(), 2);

    let wire = serde_json::to_string(&dump).unwrap();
    let seeds: HashMap<Key, StateSnapshot> = serde_json::from_str(&wire).unwrap();

    let client = Context::builder(()).initial_state(seeds).build();
    let first = def.select(params(1)).resolve(&client).unwrap().get_state();
    assert_eq!(
        first.data,
        Some(Profile {
            name: "ada".into(),
            email: None
        })
    );
    assert!(first.error.is_none());

    let second = def.select(params(2)).resolve(&client).unwrap().get_state();
    assert!(second.data.is_none());
    assert_eq!(
        second.error.map(|e| e.to_string()).as_deref(),
        Some("profile service down")
    );
}

#[test]
fn snapshot_json_uses_camel_case() {
    let def = Namespace::new().define("profile", Profiles).unwrap();
    let ctx = Context::new(());
    ctx.dispatch(def.select(params(7)).effect(ProfileEffect::Rename("grace".into())))
        .unwrap();

    let dump = serde_json::to_value(ctx.get_all_state()).unwrap();
    assert_eq!(
        dump,
        json!({
            "asprofile|oid:7": { "data": { "name": "grace" }, "isPending": false }
        })
    );
}

#[tokio::test(start_paused = true)]
async fn seed_is_consumed_by_the_first_instance_only() {
    struct Cleared;

    #[derive(Debug)]
    enum Noop {
        Noop,
    }

    impl Effect for Noop {
        effect_names!(Noop);
    }

    impl Model for Cleared {
        type Params = u32;
        type Data = String;
        type App = ();
        type Effect = Noop;

        fn run(&self, _: Noop, _: EffectContext<Self>) -> Outcome<String> {
            Outcome::unset()
        }

        fn live(&self, _: crate::LiveContext<Self>) -> Option<crate::Die> {
            Some(Box::new(|die: crate::DieContext| {
                die.clear_data(Some(std::time::Duration::ZERO))
            }))
        }
    }

    let def = Namespace::new().define("cleared", Cleared).unwrap();
    let key = def.select(1).key().unwrap();
    let ctx = Context::builder(())
        .seed(key.clone(), StateSnapshot::from_data("seeded").unwrap())
        .build();

    let first = def.select(1).resolve(&ctx).unwrap();
    assert_eq!(first.get_state().data.as_deref(), Some("seeded"));

    drop(first.subscribe(|| {}));
    tokio::time::sleep(std::time::Duration::from_millis(1)).await;
    assert!(!ctx.contains(&key));

    let second = def.select(1).resolve(&ctx).unwrap();
    assert_ne!(first.id(), second.id());
    assert!(second.get_state().data.is_none());
}

#[test]
fn mismatched_seed_starts_empty() {
    let def = Namespace::new().define("profile", Profiles).unwrap();
    let key = def.select(params(3)).key().unwrap();
    let ctx = Context::builder(())
        .seed(key, StateSnapshot::from_data(42).unwrap())
        .build();

    let state = def.select(params(3)).resolve(&ctx).unwrap().get_state();
    assert!(state.data.is_none());
    assert!(!state.is_pending);
}
