use std::sync::atomic::{AtomicU64, Ordering};

use ash::vk::{self, Handle};
use dashmap::DashMap;

use crate::handle::{BuildCachedBitsHasher, WrappedId};

/// Mapping between wrapped handles (seen by the application) and the real
/// handles returned by the next layer or driver.
///
/// All operations may be called concurrently from any thread; the map shards
/// its own locking.
pub struct HandleRegistry {
    /// Wrapped ID -> real handle
    wrapped_to_real: DashMap<WrappedId, u64, BuildCachedBitsHasher>,
    /// Counter for generating unique wrapped IDs
    next_counter: AtomicU64,
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self {
            wrapped_to_real: DashMap::with_hasher(BuildCachedBitsHasher::default()),
            // Start from 1 so no wrapped ID is ever null
            next_counter: AtomicU64::new(1),
        }
    }

    /// Register a real handle and return a new wrapped ID. Null stays null.
    pub fn wrap_new(&self, real: u64) -> u64 {
        if real == 0 {
            return 0;
        }
        let counter = self.next_counter.fetch_add(1, Ordering::Relaxed);
        let id = WrappedId::from_counter(counter);
        self.wrapped_to_real.insert(id, real);
        id.as_raw()
    }

    /// Look up the real handle. Unknown, forged and null IDs yield 0.
    pub fn unwrap(&self, wrapped: u64) -> u64 {
        WrappedId::from_raw(wrapped)
            .and_then(|id| self.wrapped_to_real.get(&id).map(|real| *real))
            .unwrap_or(0)
    }

    /// Forget a wrapped ID, returning the real handle it stood for (0 if unknown).
    pub fn remove(&self, wrapped: u64) -> u64 {
        WrappedId::from_raw(wrapped)
            .and_then(|id| self.wrapped_to_real.remove(&id))
            .map(|(_, real)| real)
            .unwrap_or(0)
    }

    pub fn wrap<H: Handle>(&self, real: H) -> H {
        H::from_raw(self.wrap_new(real.as_raw()))
    }

    pub fn unwrap_handle<H: Handle>(&self, wrapped: H) -> H {
        H::from_raw(self.unwrap(wrapped.as_raw()))
    }

    pub fn remove_handle<H: Handle>(&self, wrapped: H) -> H {
        H::from_raw(self.remove(wrapped.as_raw()))
    }

    /// Wrap a display, reusing the wrapped ID if `displays` has seen it before.
    ///
    /// Displays are enumerated rather than created, so the same real handle
    /// comes back from many calls and must always map to one wrapped ID.
    pub fn maybe_wrap_display(&self, real: vk::DisplayKHR, displays: &DisplayMap) -> vk::DisplayKHR {
        if real == vk::DisplayKHR::null() {
            return real;
        }
        let wrapped = *displays
            .real_to_wrapped
            .entry(real.as_raw())
            .or_insert_with(|| self.wrap_new(real.as_raw()));
        vk::DisplayKHR::from_raw(wrapped)
    }

    /// Return number of live wrapped handles.
    pub fn len(&self) -> usize {
        self.wrapped_to_real.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wrapped_to_real.is_empty()
    }

    /// Drop every mapping. Used when the last instance goes away.
    pub fn clear(&self) {
        self.wrapped_to_real.clear();
    }
}

impl Default for HandleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-instance reverse map for displays: real handle -> wrapped ID.
#[derive(Default)]
pub struct DisplayMap {
    real_to_wrapped: DashMap<u64, u64>,
}

impl DisplayMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.real_to_wrapped.len()
    }

    pub fn is_empty(&self) -> bool {
        self.real_to_wrapped.is_empty()
    }

    /// Unregister every display of this instance from `registry`.
    pub fn release(&self, registry: &HandleRegistry) {
        for entry in self.real_to_wrapped.iter() {
            registry.remove(*entry.value());
        }
        self.real_to_wrapped.clear();
    }
}
