//! # Effect queue: one job at a time, FIFO.
//!
//! [`EffectQueue`] serializes the effects of a single instance. A job is a
//! closure that either finishes synchronously (returns `None`) or hands back a
//! future that must complete before the next job starts.
//!
//! ## Rules
//! - Jobs run strictly in `add` order and never overlap.
//! - Adding to an idle queue runs the job right away on the caller's stack;
//!   synchronous jobs never touch the runtime.
//! - A job returning a future parks the queue; the future is spawned on the
//!   current Tokio runtime and the drain resumes when it completes. Outside a
//!   runtime the future is dropped with an error log and the drain moves on.
//! - Jobs added while a job runs (including from inside that job) are chained
//!   after it.
//!
//! ```text
//! add(job) ──► idle? ──yes──► drain(): pop ─► job() ─► None ─► pop next ...
//!                │                              └────► Some(fut) ─► spawn(fut; drain())
//!                └──no──► push back (picked up by the running drain)
//! ```
//!
//! Occupancy (running + waiting jobs) is published on a `watch` channel;
//! [`will_ready`](EffectQueue::will_ready) waits for it to reach zero, which
//! re-checks after every settle and therefore also covers work enqueued while
//! waiting.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::runtime::Handle;
use tokio::sync::watch;

use crate::error::panic_message;
use crate::sync::lock;

/// Unit of work run by the queue.
pub type Job = Box<dyn FnOnce() -> Option<BoxFuture<'static, ()>> + Send>;

struct Jobs {
    running: bool,
    waiting: VecDeque<Job>,
}

impl Jobs {
    fn occupancy(&self) -> usize {
        self.waiting.len() + usize::from(self.running)
    }
}

/// FIFO serializer for one instance's effects.
pub struct EffectQueue {
    jobs: Mutex<Jobs>,
    occupancy: watch::Sender<usize>,
}

impl Default for EffectQueue {
    fn default() -> Self {
        let (occupancy, _) = watch::channel(0);
        Self {
            jobs: Mutex::new(Jobs {
                running: false,
                waiting: VecDeque::new(),
            }),
            occupancy,
        }
    }
}

impl EffectQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Enqueues a job; starts draining immediately if the queue is idle.
    pub fn add<F>(self: &Arc<Self>, job: F)
    where
        F: FnOnce() -> Option<BoxFuture<'static, ()>> + Send + 'static,
    {
        {
            let mut jobs = lock(&self.jobs);
            jobs.waiting.push_back(Box::new(job));
            let start = !jobs.running;
            jobs.running = true;
            self.occupancy.send_replace(jobs.occupancy());
            if !start {
                return;
            }
        }
        self.drain();
    }

    /// `true` when no job is waiting behind the one currently running.
    pub fn is_empty(&self) -> bool {
        lock(&self.jobs).waiting.is_empty()
    }

    /// `true` when nothing runs and nothing waits.
    pub fn is_idle(&self) -> bool {
        lock(&self.jobs).occupancy() == 0
    }

    /// Resolves once the queue is idle, including jobs added while waiting.
    pub async fn will_ready(&self) {
        let mut rx = self.occupancy.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    fn drain(self: &Arc<Self>) {
        loop {
            let job = {
                let mut jobs = lock(&self.jobs);
                match jobs.waiting.pop_front() {
                    Some(job) => job,
                    None => {
                        jobs.running = false;
                        self.occupancy.send_replace(0);
                        return;
                    }
                }
            };

            let parked = match catch_unwind(AssertUnwindSafe(job)) {
                Ok(parked) => parked,
                Err(panic) => {
                    tracing::error!(panic = %panic_message(panic.as_ref()), "queued job panicked");
                    None
                }
            };

            if let Some(fut) = parked {
                let Ok(runtime) = Handle::try_current() else {
                    tracing::error!("queued job returned a future outside a tokio runtime; dropped");
                    continue;
                };
                let me = Arc::clone(self);
                runtime.spawn(async move {
                    if let Err(panic) = AssertUnwindSafe(fut).catch_unwind().await {
                        tracing::error!(panic = %panic_message(panic.as_ref()), "queued job panicked");
                    }
                    me.drain();
                });
                return;
            }
        }
    }
}
