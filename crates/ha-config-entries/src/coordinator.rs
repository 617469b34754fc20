//! Reload Coordinator
//!
//! Each entry owns an exclusive section. Lifecycle operations on the same
//! entry queue on it in arrival order while different entries run in
//! parallel. The section also owns the entry's single retry timer.
//!
//! A retry timer is a spawned task that sleeps, then queues on the section
//! like any other operation. Before doing anything it must [`claim`] its
//! timer. Manual operations cancel the timer once they hold the section,
//! so a queued retry finds nothing to claim and returns.
//!
//! [`claim`]: EntrySection::claim_retry

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard as StdMutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::BoxFuture;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::forwarder::ForwardRecord;
use crate::integration::RuntimeData;

/// What an entry holds while it is set up. Only reachable through its section.
#[derive(Debug, Default)]
pub struct EntryRuntime {
    /// Returned by the integration's `setup_entry`
    pub runtime_data: Option<RuntimeData>,
    /// Platforms currently forwarded
    pub forwarded: Vec<ForwardRecord>,
}

impl EntryRuntime {
    /// Nothing set up for the entry
    pub fn is_empty(&self) -> bool {
        self.runtime_data.is_none() && self.forwarded.is_empty()
    }

    pub fn clear(&mut self) {
        self.runtime_data = None;
        self.forwarded.clear();
    }
}

/// A scheduled automatic setup attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryInfo {
    /// Consecutive retries before this one
    pub attempt: u32,
    pub delay: Duration,
    pub next_attempt: DateTime<Utc>,
}

struct RetryTimer {
    info: RetryInfo,
    generation: u64,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct EntrySlot {
    section: Arc<Mutex<EntryRuntime>>,
    retry: StdMutex<Option<RetryTimer>>,
    generation: AtomicU64,
}

impl EntrySlot {
    fn retry(&self) -> StdMutexGuard<'_, Option<RetryTimer>> {
        // The timer slot holds no invariants a panic could break
        self.retry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn cancel_retry(&self) -> Option<RetryInfo> {
        let timer = self.retry().take()?;
        timer.task.abort();
        Some(timer.info)
    }
}

/// Exclusive access to one entry's lifecycle
pub struct EntrySection {
    entry_id: String,
    slot: Arc<EntrySlot>,
    runtime: OwnedMutexGuard<EntryRuntime>,
    closed: Arc<AtomicBool>,
}

impl EntrySection {
    /// Cancel the pending retry timer, if any
    pub fn cancel_retry(&self) -> Option<RetryInfo> {
        let cancelled = self.slot.cancel_retry();
        if let Some(info) = cancelled {
            debug!(
                entry_id = %self.entry_id,
                attempt = info.attempt,
                "Cancelled retry timer"
            );
        }
        cancelled
    }

    /// Schedule an automatic setup attempt after `delay`.
    ///
    /// `make` receives the timer's generation and builds the future to run
    /// once the delay elapsed; that future must call [`claim_retry`] under
    /// the section before acting. Replaces any pending timer. Returns false
    /// when the coordinator is shutting down and nothing was scheduled.
    ///
    /// [`claim_retry`]: EntrySection::claim_retry
    pub fn schedule_retry<F>(&self, attempt: u32, delay: Duration, make: F) -> bool
    where
        F: FnOnce(u64) -> BoxFuture<'static, ()>,
    {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }

        let mut retry = self.slot.retry();
        if let Some(previous) = retry.take() {
            previous.task.abort();
        }

        let generation = self.slot.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let attempt_future = make(generation);
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            attempt_future.await;
        });

        let next_attempt = Utc::now()
            + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        *retry = Some(RetryTimer {
            info: RetryInfo {
                attempt,
                delay,
                next_attempt,
            },
            generation,
            task,
        });
        true
    }

    /// Take ownership of the timer that fired.
    ///
    /// False when the timer was cancelled or replaced since it was
    /// scheduled; the caller must then do nothing.
    pub fn claim_retry(&self, generation: u64) -> bool {
        let mut retry = self.slot.retry();
        match retry.as_ref() {
            Some(timer) if timer.generation == generation => {
                // Dropping the handle detaches the task, which is the caller
                *retry = None;
                true
            }
            _ => false,
        }
    }
}

impl Deref for EntrySection {
    type Target = EntryRuntime;

    fn deref(&self) -> &EntryRuntime {
        &self.runtime
    }
}

impl DerefMut for EntrySection {
    fn deref_mut(&mut self) -> &mut EntryRuntime {
        &mut self.runtime
    }
}

/// Per-entry sections and retry timers
#[derive(Default)]
pub struct ReloadCoordinator {
    slots: DashMap<String, Arc<EntrySlot>>,
    closed: Arc<AtomicBool>,
}

impl ReloadCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the entry's section. Waiters are served first come, first served.
    pub async fn acquire(&self, entry_id: &str) -> EntrySection {
        let slot = self
            .slots
            .entry(entry_id.to_string())
            .or_default()
            .value()
            .clone();
        let runtime = slot.section.clone().lock_owned().await;

        EntrySection {
            entry_id: entry_id.to_string(),
            slot,
            runtime,
            closed: self.closed.clone(),
        }
    }

    /// The entry's pending retry, if one is scheduled
    pub fn pending_retry(&self, entry_id: &str) -> Option<RetryInfo> {
        let slot = self.slots.get(entry_id)?.value().clone();
        let info = slot.retry().as_ref().map(|timer| timer.info);
        info
    }

    /// Drop everything kept for a removed entry
    pub fn forget(&self, entry_id: &str) {
        if let Some((_, slot)) = self.slots.remove(entry_id) {
            slot.cancel_retry();
        }
    }

    /// Stop scheduling retries and cancel every pending timer
    pub fn cancel_all(&self) -> usize {
        self.closed.store(true, Ordering::SeqCst);
        let slots: Vec<Arc<EntrySlot>> = self.slots.iter().map(|r| r.value().clone()).collect();
        let cancelled = slots
            .iter()
            .filter(|slot| slot.cancel_retry().is_some())
            .count();
        debug!("Cancelled {} retry timers", cancelled);
        cancelled
    }

    #[cfg(test)]
    pub(crate) fn slot_count(&self) -> usize {
        self.slots.len()
    }
}
