//! Profile cache demo.
//!
//! A `team` instance loads its members from a slow fake API and writes each
//! member into its own `profile` instance (normalize). A profile loads itself
//! when first watched and is evicted two seconds after the last watcher left.
//! The server context is then dumped and used to hydrate a client context
//! without a single API call.
//!
//! Run with `RUST_LOG=reservoir_core=debug,profile_cache_demo=info` to see the
//! lifecycle logs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use reservoir_core::{
    effect_names, Context, Die, DieContext, Effect, EffectContext, Key, LiveContext, Model,
    ModelDef, Namespace, Outcome, StateSnapshot,
};
use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Profile {
    id: u32,
    name: String,
}

/// Fake remote API with a fixed latency.
struct Api {
    latency: Duration,
    calls: AtomicUsize,
}

impl Api {
    fn new(latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            latency,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    async fn profile(&self, id: u32) -> Result<Profile> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        tokio::time::sleep(self.latency).await;
        directory()
            .into_iter()
            .find(|p| p.id == id)
            .ok_or_else(|| anyhow!("no profile with id {id}"))
    }

    async fn team(&self, name: &str) -> Result<Vec<Profile>> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        tokio::time::sleep(self.latency).await;
        match name {
            "core" => Ok(directory()),
            other => Err(anyhow!("unknown team {other:?}")),
        }
    }
}

fn directory() -> Vec<Profile> {
    [(1, "Ada"), (2, "Grace"), (3, "Edsger")]
        .into_iter()
        .map(|(id, name)| Profile {
            id,
            name: name.to_string(),
        })
        .collect()
}

struct Profiles;

#[derive(Debug)]
enum ProfileEffect {
    Load,
    Rename(String),
}

impl Effect for ProfileEffect {
    effect_names!(Load, Rename);
}

impl Model for Profiles {
    type Params = u32;
    type Data = Profile;
    type App = Arc<Api>;
    type Effect = ProfileEffect;

    fn run(&self, effect: ProfileEffect, cx: EffectContext<Self>) -> Outcome<Profile> {
        match effect {
            ProfileEffect::Load => {
                let api = Arc::clone(cx.app());
                let id = *cx.params();
                Outcome::deferred(async move { api.profile(id).await })
            }
            ProfileEffect::Rename(name) => match cx.data() {
                Some(profile) => Outcome::value(Profile {
                    name,
                    ..profile.clone()
                }),
                None => Outcome::error(anyhow!("cannot rename a profile that is not loaded")),
            },
        }
    }

    fn live(&self, cx: LiveContext<Self>) -> Option<Die> {
        if cx.get_state().data.is_none() {
            cx.effects().dispatch(ProfileEffect::Load);
        }
        Some(Box::new(|die: DieContext| {
            die.clear_data(Some(Duration::from_secs(2)))
        }))
    }
}

struct Teams {
    profiles: ModelDef<Profiles>,
}

#[derive(Debug)]
enum TeamEffect {
    Load,
}

impl Effect for TeamEffect {
    effect_names!(Load);
}

impl Model for Teams {
    type Params = String;
    type Data = Vec<u32>;
    type App = Arc<Api>;
    type Effect = TeamEffect;

    fn run(&self, TeamEffect::Load: TeamEffect, cx: EffectContext<Self>) -> Outcome<Vec<u32>> {
        let api = Arc::clone(cx.app());
        let team = cx.params().clone();
        let profiles = self.profiles.clone();
        Outcome::deferred(async move {
            let members = api.team(&team).await?;
            let mut ids = Vec::with_capacity(members.len());
            for member in members {
                ids.push(member.id);
                cx.normalize(&profiles.select(member.id), member)?;
            }
            Ok::<_, anyhow::Error>(ids)
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let ns = Namespace::new();
    let profiles = ns.define("profile", Profiles)?;
    let teams = ns.define(
        "team",
        Teams {
            profiles: profiles.clone(),
        },
    )?;

    let server = Context::new(Api::new(Duration::from_millis(40)));
    let _events = server.debugger().listen_to_all_events(|event| {
        tracing::info!(
            kind = %event.kind,
            model = %event.model.name,
            params = %event.model.params,
            effect = event.effect.as_ref().map(|e| e.name),
            "debug event"
        );
    });

    server.dispatch(teams.select("core".into()).effect(TeamEffect::Load))?;
    server.will_all_ready().await;

    let ada = profiles.select(1).resolve(&server)?;
    println!(
        "after team load: {:?} ({} api calls)",
        ada.get_state().data,
        server.app().calls()
    );

    let watcher = {
        let weak = Arc::downgrade(&ada);
        ada.subscribe(move || {
            if let Some(ada) = weak.upgrade() {
                println!("profile 1 changed: {:?}", ada.get_state().data);
            }
        })
    };
    ada.dispatch(ProfileEffect::Rename("Ada Lovelace".into()));

    // Watching an unknown profile triggers its own load.
    let missing = profiles.select(9).resolve(&server)?;
    let missing_watch = missing.subscribe(|| {});
    server.will_all_ready().await;
    println!("profile 9: {:?}", missing.get_state().error.map(|e| e.to_string()));

    let dump = serde_json::to_string_pretty(&server.get_all_state())?;
    println!("server state:\n{dump}");

    let seeds: HashMap<Key, StateSnapshot> = serde_json::from_str(&dump)?;
    let client = Context::builder(Api::new(Duration::from_millis(40)))
        .initial_state(seeds)
        .build();
    let hydrated = profiles.select(1).resolve(&client)?;
    let hydrated_watch = hydrated.subscribe(|| {});
    println!(
        "client profile 1: {:?} ({} api calls)",
        hydrated.get_state().data,
        client.app().calls()
    );

    drop(watcher);
    drop(missing_watch);
    drop(hydrated_watch);
    println!("server instances while in grace period: {}", server.len());
    tokio::time::sleep(Duration::from_millis(2_500)).await;
    println!("server instances after grace period: {}", server.len());

    Ok(())
}
