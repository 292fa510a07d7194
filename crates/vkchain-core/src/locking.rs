//! Per-validator locking.
//!
//! Every validator sits behind its own reader/writer lock: Validate hooks run
//! under the shared lock, Record hooks under the exclusive one. Validators in
//! the same chain never wait on each other.
//!
//! A Record hook that has to make a call which can block for an unbounded
//! time (waiting on a fence, a long pipeline compile) brackets it with
//! [`Recording::begin_blocking_operation`], which releases the validator's
//! lock until the returned guard is dropped. Contract: a thread has at most
//! one blocking operation open at a time. Opening a second one panics in
//! every build profile.

use std::cell::Cell;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

static NEXT_VALIDATOR_ID: AtomicU32 = AtomicU32::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValidatorId(u32);

thread_local! {
    /// Validator whose write lock this thread holds for a running Record hook.
    static HELD_WRITE: Cell<Option<ValidatorId>> = const { Cell::new(None) };
    /// Validator whose lock this thread released for a blocking call.
    static BLOCKING: Cell<Option<ValidatorId>> = const { Cell::new(None) };
}

/// Which validator's write lock the current thread holds, if any.
pub fn held_write_lock() -> Option<ValidatorId> {
    HELD_WRITE.with(Cell::get)
}

/// Whether the current thread is inside a blocking operation.
pub fn blocking_operation_open() -> bool {
    BLOCKING.with(Cell::get).is_some()
}

/// A validator's state together with its lock.
pub struct ValidatorCell<V> {
    id: ValidatorId,
    name: &'static str,
    state: RwLock<V>,
}

impl<V> ValidatorCell<V> {
    pub fn new(name: &'static str, state: V) -> Arc<Self> {
        Arc::new(Self {
            id: ValidatorId(NEXT_VALIDATOR_ID.fetch_add(1, Ordering::Relaxed)),
            name,
            state: RwLock::new(state),
        })
    }

    pub fn id(&self) -> ValidatorId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Shared access for the Validate phase.
    pub fn read(&self) -> RwLockReadGuard<'_, V> {
        self.state.read()
    }

    /// Exclusive access for the Record phase.
    pub fn record(self: &Arc<Self>) -> Recording<'_, V> {
        let guard = self.state.write();
        let outer = HELD_WRITE.with(|held| held.replace(Some(self.id)));
        Recording {
            cell: self,
            guard: Some(guard),
            outer,
        }
    }
}

/// Exclusive access to a validator while one of its Record hooks runs.
pub struct Recording<'a, V> {
    cell: &'a Arc<ValidatorCell<V>>,
    /// `None` only while a [`BlockingOperation`] borrows this recording.
    guard: Option<RwLockWriteGuard<'a, V>>,
    outer: Option<ValidatorId>,
}

impl<'a, V> Recording<'a, V> {
    pub fn id(&self) -> ValidatorId {
        self.cell.id
    }

    /// A handle to the validator, for continuations that outlive this hook.
    pub fn cell(&self) -> Arc<ValidatorCell<V>> {
        Arc::clone(self.cell)
    }

    /// Release the validator's lock until the returned guard is dropped.
    ///
    /// # Panics
    ///
    /// If this thread already has a blocking operation open.
    pub fn begin_blocking_operation(&mut self) -> BlockingOperation<'_, 'a, V> {
        if let Some(open) = BLOCKING.with(Cell::get) {
            panic!(
                "blocking operation for validator {:?} opened while one for {:?} is still open on this thread",
                self.cell.id, open
            );
        }
        BLOCKING.with(|blocking| blocking.set(Some(self.cell.id)));
        HELD_WRITE.with(|held| held.set(self.outer));
        self.guard = None;
        BlockingOperation { recording: self }
    }

    /// Run `f` with the validator's lock released.
    pub fn blocking<R>(&mut self, f: impl FnOnce() -> R) -> R {
        let operation = self.begin_blocking_operation();
        let result = f();
        operation.end();
        result
    }
}

impl<V> Deref for Recording<'_, V> {
    type Target = V;

    fn deref(&self) -> &V {
        match &self.guard {
            Some(guard) => &**guard,
            None => unreachable!("validator state accessed during a blocking operation"),
        }
    }
}

impl<V> DerefMut for Recording<'_, V> {
    fn deref_mut(&mut self) -> &mut V {
        match &mut self.guard {
            Some(guard) => &mut **guard,
            None => unreachable!("validator state accessed during a blocking operation"),
        }
    }
}

impl<V> Drop for Recording<'_, V> {
    fn drop(&mut self) {
        HELD_WRITE.with(|held| held.set(self.outer));
    }
}

/// The span during which a Record hook runs without its validator's lock.
/// Dropping it (or calling [`end`](BlockingOperation::end)) reacquires the lock.
pub struct BlockingOperation<'r, 'a, V> {
    recording: &'r mut Recording<'a, V>,
}

impl<V> BlockingOperation<'_, '_, V> {
    pub fn end(self) {}
}

impl<V> Drop for BlockingOperation<'_, '_, V> {
    fn drop(&mut self) {
        let cell = self.recording.cell;
        self.recording.guard = Some(cell.state.write());
        HELD_WRITE.with(|held| held.set(Some(cell.id)));
        BLOCKING.with(|blocking| blocking.set(None));
    }
}
