//! Continuations attached to deferred host operations.
//!
//! Validators queue work under a deferred-operation handle while the
//! operation is still running. Whichever thread first observes completion
//! drains the queue; every continuation runs exactly once in total, in
//! registration order, no matter how many threads observe completion.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

/// Runs once the operation has completed.
pub type CompletionFn = Box<dyn FnOnce() + Send>;
/// Runs after all completion callbacks, with the handles the operation produced.
pub type PostCheckFn = Box<dyn FnOnce(&[u64]) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Pending,
    Draining,
    Finished,
}

struct Entry {
    phase: Phase,
    completions: Vec<CompletionFn>,
    post_checks: Vec<PostCheckFn>,
    results: Vec<u64>,
}

impl Default for Entry {
    fn default() -> Self {
        Self {
            phase: Phase::Pending,
            completions: Vec::new(),
            post_checks: Vec::new(),
            results: Vec::new(),
        }
    }
}

#[derive(Default)]
struct Slot {
    entry: Mutex<Entry>,
}

/// Deferred-operation handle -> queued continuations.
#[derive(Default)]
pub struct DeferredOperationRegistry {
    slots: DashMap<u64, Arc<Slot>>,
}

impl DeferredOperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `callback` to run when `operation` completes.
    pub fn register_completion(&self, operation: u64, callback: impl FnOnce() + Send + 'static) {
        self.with_open_entry(operation, move |entry| entry.completions.push(Box::new(callback)));
    }

    /// Queue `callback` to run with the operation's results when it completes.
    pub fn register_post_check(
        &self,
        operation: u64,
        callback: impl FnOnce(&[u64]) + Send + 'static,
    ) {
        self.with_open_entry(operation, move |entry| entry.post_checks.push(Box::new(callback)));
    }

    /// Append handles produced by `operation`.
    pub fn record_results(&self, operation: u64, results: &[u64]) {
        self.with_open_entry(operation, |entry| entry.results.extend_from_slice(results));
    }

    /// Run every continuation queued for `operation`, then erase it.
    ///
    /// Completion callbacks run first (they may record results), then
    /// post-check callbacks with the collected results. Returns how many
    /// callbacks this call ran; a thread that loses the race to drain gets 0.
    pub fn drain(&self, operation: u64) -> usize {
        let Some(slot) = self.slots.get(&operation).map(|slot| Arc::clone(&slot)) else {
            return 0;
        };
        {
            let mut entry = slot.entry.lock();
            if entry.phase != Phase::Pending {
                return 0;
            }
            entry.phase = Phase::Draining;
        }

        let mut ran = 0;
        loop {
            let completions = std::mem::take(&mut slot.entry.lock().completions);
            if completions.is_empty() {
                break;
            }
            ran += run_completions(completions);
        }
        loop {
            let (post_checks, results) = {
                let mut entry = slot.entry.lock();
                (std::mem::take(&mut entry.post_checks), entry.results.clone())
            };
            if post_checks.is_empty() {
                break;
            }
            ran += run_post_checks(post_checks, &results);
        }

        // Unpublish first: registrations that arrive from here on start a
        // fresh slot, and anything that slipped in before is collected below.
        self.slots.remove_if(&operation, |_, current| Arc::ptr_eq(current, &slot));
        let (completions, post_checks, results) = {
            let mut entry = slot.entry.lock();
            entry.phase = Phase::Finished;
            (
                std::mem::take(&mut entry.completions),
                std::mem::take(&mut entry.post_checks),
                std::mem::take(&mut entry.results),
            )
        };
        ran += run_completions(completions);
        ran += run_post_checks(post_checks, &results);

        tracing::trace!(operation, ran, "drained deferred operation");
        ran
    }

    /// Forget `operation` without running anything. Returns how many
    /// callbacks were dropped.
    pub fn discard(&self, operation: u64) -> usize {
        let Some((_, slot)) = self.slots.remove(&operation) else {
            return 0;
        };
        let mut entry = slot.entry.lock();
        entry.phase = Phase::Finished;
        let dropped = entry.completions.len() + entry.post_checks.len();
        entry.completions.clear();
        entry.post_checks.clear();
        dropped
    }

    pub fn contains(&self, operation: u64) -> bool {
        self.slots.contains_key(&operation)
    }

    /// Number of operations with queued work.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn clear(&self) {
        self.slots.clear();
    }

    fn with_open_entry(&self, operation: u64, f: impl FnOnce(&mut Entry)) {
        loop {
            let slot = Arc::clone(&self.slots.entry(operation).or_default());
            let mut entry = slot.entry.lock();
            if entry.phase == Phase::Finished {
                // Lost a race with the end of a drain; retry on a fresh slot.
                continue;
            }
            f(&mut entry);
            return;
        }
    }
}

fn run_completions(completions: Vec<CompletionFn>) -> usize {
    let count = completions.len();
    for completion in completions {
        completion();
    }
    count
}

fn run_post_checks(post_checks: Vec<PostCheckFn>, results: &[u64]) -> usize {
    let count = post_checks.len();
    for post_check in post_checks {
        post_check(results);
    }
    count
}
