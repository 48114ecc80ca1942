use crate::util::{Address, KlassRef};
use spin::RwLock;
use std::collections::VecDeque;

/// The handlers resolved for one exception type, oldest first.
struct TypeCache {
    exception_type: KlassRef,
    entries: VecDeque<(Address, Address)>,
}

/// Handler lookups a compiled method has already resolved, grouped by exception type.
///
/// Each type keeps at most `capacity` `(throw pc, handler pc)` pairs. Adding to a full
/// type evicts its oldest pair. Inserting a pair that is already present is a no-op, so
/// two threads resolving the same exception at once only repeat work.
pub struct ExceptionCache {
    capacity: usize,
    types: RwLock<Vec<TypeCache>>,
}

impl ExceptionCache {
    pub fn new(capacity: usize) -> Self {
        debug_assert!(capacity > 0);
        ExceptionCache {
            capacity,
            types: RwLock::new(vec![]),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The cached handler for an exception of `exception_type` thrown at `pc`.
    pub fn handler_for(&self, exception_type: KlassRef, pc: Address) -> Option<Address> {
        let types = self.types.read();
        types
            .iter()
            .find(|t| t.exception_type == exception_type)
            .and_then(|t| t.entries.iter().find(|(p, _)| *p == pc))
            .map(|(_, handler)| *handler)
    }

    /// Remember that an exception of `exception_type` thrown at `pc` is handled at `handler`.
    pub fn add(&self, exception_type: KlassRef, pc: Address, handler: Address) {
        let mut types = self.types.write();
        let index = match types.iter().position(|t| t.exception_type == exception_type) {
            Some(i) => i,
            None => {
                // Newer types go first, as they are likely to be thrown again soon.
                types.insert(
                    0,
                    TypeCache {
                        exception_type,
                        entries: VecDeque::with_capacity(self.capacity),
                    },
                );
                0
            }
        };
        let cache = &mut types[index];
        if let Some(entry) = cache.entries.iter_mut().find(|(p, _)| *p == pc) {
            entry.1 = handler;
            return;
        }
        if cache.entries.len() == self.capacity {
            cache.entries.pop_front();
        }
        cache.entries.push_back((pc, handler));
    }

    /// Look up the handler, and on a miss resolve it with `compute` (the exception table
    /// walk) and cache the result. `compute` runs without the cache locked.
    pub fn handler_or_compute<F>(
        &self,
        exception_type: KlassRef,
        pc: Address,
        compute: F,
    ) -> Option<Address>
    where
        F: FnOnce() -> Option<Address>,
    {
        if let Some(handler) = self.handler_for(exception_type, pc) {
            return Some(handler);
        }
        let handler = compute()?;
        self.add(exception_type, pc, handler);
        Some(handler)
    }

    /// Number of pairs cached for `exception_type`.
    pub fn count_for(&self, exception_type: KlassRef) -> usize {
        self.types
            .read()
            .iter()
            .find(|t| t.exception_type == exception_type)
            .map_or(0, |t| t.entries.len())
    }

    /// Number of distinct exception types cached.
    pub fn type_count(&self) -> usize {
        self.types.read().len()
    }

    /// Drop the caches of exception types for which `is_alive` returns false. Returns how
    /// many types were dropped.
    pub fn retain_types<F>(&self, mut is_alive: F) -> usize
    where
        F: FnMut(KlassRef) -> bool,
    {
        let mut types = self.types.write();
        let before = types.len();
        types.retain(|t| is_alive(t.exception_type));
        before - types.len()
    }

    pub fn clear(&self) {
        self.types.write().clear();
    }
}
