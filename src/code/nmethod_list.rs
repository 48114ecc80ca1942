use super::blob::CodeBlob;
use super::nmethod::NMethodRef;
use std::sync::{Arc, Weak};

/// A list of compiled methods that does not keep them alive.
///
/// The code heap owns every blob. Lists such as the scavenge roots, the OSR lists and
/// the dependents of a class only record membership. Entries whose blob has been freed
/// are skipped by iteration, and dropped by [`NMethodList::retain`] and
/// [`NMethodList::remove`].
#[derive(Default)]
pub struct NMethodList {
    entries: Vec<Weak<CodeBlob>>,
}

impl NMethodList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `nm` unless it is already present.
    pub fn push(&mut self, nm: &NMethodRef) {
        if !self.contains(nm) {
            self.entries.push(Arc::downgrade(nm.blob()));
        }
    }

    /// Add `nm` at the front. Later lookups find it first.
    pub fn push_front(&mut self, nm: &NMethodRef) {
        self.remove(nm);
        self.entries.insert(0, Arc::downgrade(nm.blob()));
    }

    /// Remove `nm`. Returns whether it was present.
    pub fn remove(&mut self, nm: &NMethodRef) -> bool {
        let target = Arc::as_ptr(nm.blob());
        let mut found = false;
        self.entries.retain(|entry| {
            if entry.as_ptr() == target {
                found = true;
                false
            } else {
                entry.strong_count() > 0
            }
        });
        found
    }

    pub fn contains(&self, nm: &NMethodRef) -> bool {
        let target = Arc::as_ptr(nm.blob());
        self.entries.iter().any(|entry| entry.as_ptr() == target)
    }

    /// Keep the methods for which `f` returns true. Freed entries are dropped.
    pub fn retain<F>(&mut self, mut f: F)
    where
        F: FnMut(&NMethodRef) -> bool,
    {
        self.entries.retain(|entry| match upgrade(entry) {
            Some(nm) => f(&nm),
            None => false,
        });
    }

    /// The methods still in the code heap, in list order.
    pub fn iter(&self) -> impl Iterator<Item = NMethodRef> + '_ {
        self.entries.iter().filter_map(upgrade)
    }

    /// Number of entries, including ones whose blob was freed but not yet dropped.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

fn upgrade(entry: &Weak<CodeBlob>) -> Option<NMethodRef> {
    entry
        .upgrade()
        .filter(|blob| !blob.is_freed())
        .and_then(NMethodRef::from_blob)
}
