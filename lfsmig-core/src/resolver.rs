//! Memoizing dependency resolver
//!
//! A conversion request names a [`TaskKey`]. The resolver asks its
//! [`TaskFactory`] for the task behind the key, resolves every dependency the
//! task declares, then runs the conversion with a read-only view of the
//! already computed results.
//!
//! Each key owns a watch slot. The first request to claim a key computes it;
//! every other request for the same key waits on the slot, so a key is
//! converted at most once per run no matter how many requests share it.
//!
//! One request resolves its dependencies with an explicit stack instead of
//! recursion, so a history of any length does not grow the call stack.

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

use crate::error::{ConvertError, Result};
use crate::object::ObjectId;
use crate::task::{TaskKey, TaskKind};

/// A unit of conversion with known dependencies
#[async_trait]
pub trait ConvertTask: Send + Sync {
    /// Keys that must be resolved before [`ConvertTask::convert`] runs
    fn depends(&self) -> Vec<TaskKey>;

    /// Produce the destination object
    async fn convert(&self, resolved: &ResolvedView<'_>) -> Result<ObjectId>;
}

/// Creates the task behind a key
#[async_trait]
pub trait TaskFactory: Send + Sync {
    type Task: ConvertTask;

    async fn task(&self, key: &TaskKey) -> Result<Self::Task>;
}

type Slot = watch::Receiver<Option<ObjectId>>;

/// Read-only access to finished conversions, handed to `convert`
pub struct ResolvedView<'a> {
    slots: &'a Mutex<HashMap<TaskKey, Slot>>,
}

impl ResolvedView<'_> {
    /// Destination id for a key that has already been converted
    pub fn get(&self, key: &TaskKey) -> Result<ObjectId> {
        let slots = lock(self.slots);
        slots
            .get(key)
            .and_then(|slot| *slot.borrow())
            .ok_or(ConvertError::Unresolved(*key))
    }
}

/// Per-kind conversion counters
#[derive(Debug, Default)]
pub struct ConvertStats {
    converted: [AtomicU64; 4],
}

impl ConvertStats {
    pub fn record(&self, kind: TaskKind) {
        self.converted[kind.index()].fetch_add(1, Ordering::Relaxed);
    }

    pub fn converted(&self, kind: TaskKind) -> u64 {
        self.converted[kind.index()].load(Ordering::Relaxed)
    }

    pub fn total(&self) -> u64 {
        TaskKind::ALL.iter().map(|k| self.converted(*k)).sum()
    }
}

enum Claim {
    Resolved(ObjectId),
    InFlight(Slot),
    Owned(watch::Sender<Option<ObjectId>>),
}

struct Frame<T> {
    key: TaskKey,
    task: T,
    deps: Vec<TaskKey>,
    next: usize,
    slot: watch::Sender<Option<ObjectId>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // Slot values are written atomically, so a poisoned map is still consistent.
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Memoizing scheduler for one migration run
pub struct Resolver<F: TaskFactory> {
    factory: F,
    slots: Mutex<HashMap<TaskKey, Slot>>,
    stats: ConvertStats,
}

impl<F: TaskFactory> Resolver<F> {
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            slots: Mutex::new(HashMap::new()),
            stats: ConvertStats::default(),
        }
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    pub fn stats(&self) -> &ConvertStats {
        &self.stats
    }

    /// Destination id of a key, if it has been converted
    pub fn cached(&self, key: &TaskKey) -> Option<ObjectId> {
        lock(&self.slots).get(key).and_then(|slot| *slot.borrow())
    }

    fn view(&self) -> ResolvedView<'_> {
        ResolvedView { slots: &self.slots }
    }

    fn claim(&self, key: &TaskKey) -> Claim {
        let mut slots = lock(&self.slots);
        if let Some(slot) = slots.get(key) {
            return match *slot.borrow() {
                Some(id) => Claim::Resolved(id),
                None => Claim::InFlight(slot.clone()),
            };
        }
        let (tx, rx) = watch::channel(None);
        slots.insert(*key, rx);
        Claim::Owned(tx)
    }

    async fn frame(&self, key: TaskKey, slot: watch::Sender<Option<ObjectId>>) -> Result<Frame<F::Task>> {
        let task = self.factory.task(&key).await?;
        let deps = task.depends();
        Ok(Frame {
            key,
            task,
            deps,
            next: 0,
            slot,
        })
    }

    async fn wait(key: TaskKey, mut slot: Slot) -> Result<ObjectId> {
        let value = slot
            .wait_for(|v| v.is_some())
            .await
            .map_err(|_| ConvertError::Abandoned(key))?;
        (*value).ok_or(ConvertError::Abandoned(key))
    }

    /// Convert `key` and everything it depends on; returns the new id
    pub async fn resolve(&self, key: TaskKey) -> Result<ObjectId> {
        let mut stack = match self.claim(&key) {
            Claim::Resolved(id) => return Ok(id),
            Claim::InFlight(slot) => return Self::wait(key, slot).await,
            Claim::Owned(slot) => vec![self.frame(key, slot).await?],
        };

        loop {
            let top = stack.len() - 1;
            if stack[top].next < stack[top].deps.len() {
                let dep = stack[top].deps[stack[top].next];
                stack[top].next += 1;
                match self.claim(&dep) {
                    Claim::Resolved(_) => {}
                    Claim::InFlight(slot) => {
                        if stack.iter().any(|f| f.key == dep) {
                            return Err(ConvertError::Cycle(dep));
                        }
                        Self::wait(dep, slot).await?;
                    }
                    Claim::Owned(slot) => {
                        let frame = self.frame(dep, slot).await?;
                        stack.push(frame);
                    }
                }
                continue;
            }

            let frame = &stack[top];
            let id = frame.task.convert(&self.view()).await?;
            frame.slot.send_replace(Some(id));
            self.stats.record(frame.key.kind);
            tracing::debug!("Converted {} -> {}", frame.key, id);

            stack.pop();
            if stack.is_empty() {
                return Ok(id);
            }
        }
    }

    /// Resolve many roots with at most `jobs` requests in flight
    pub async fn resolve_all(&self, keys: Vec<TaskKey>, jobs: usize) -> Result<Vec<(TaskKey, ObjectId)>> {
        stream::iter(keys)
            .map(|key| async move { self.resolve(key).await.map(|id| (key, id)) })
            .buffer_unordered(jobs.max(1))
            .try_collect()
            .await
    }
}
