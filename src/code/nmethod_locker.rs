use super::nmethod::NMethodRef;
use std::ops::Deref;

/// Pins a compiled method while the VM inspects it. A locked method is not made a
/// zombie and not freed. The lock is released when the locker is dropped.
///
/// Locking a zombie is fatal unless the locker is created with
/// [`NMethodLocker::new_zombie_ok`]. Locking a method the sweeper already claimed for
/// freeing is always fatal.
pub struct NMethodLocker {
    nm: NMethodRef,
}

impl NMethodLocker {
    pub fn new(nm: NMethodRef) -> Self {
        nm.lock(false);
        NMethodLocker { nm }
    }

    /// Lock a method that may already be a zombie, e.g. one found on a stack being walked.
    pub fn new_zombie_ok(nm: NMethodRef) -> Self {
        nm.lock(true);
        NMethodLocker { nm }
    }

    pub fn nmethod(&self) -> &NMethodRef {
        &self.nm
    }
}

impl Deref for NMethodLocker {
    type Target = NMethodRef;

    fn deref(&self) -> &NMethodRef {
        &self.nm
    }
}

impl Drop for NMethodLocker {
    fn drop(&mut self) {
        self.nm.unlock();
    }
}
