use super::{CodeCache, CodeCacheGuard};
use crate::code::NMethodRef;
use crate::vm::VMBinding;

impl<VM: VMBinding> CodeCache<VM> {
    /// Check the code cache for consistency: the heap's own structures, the counters
    /// against the blobs actually in the heap, each blob's header, and the registry lists
    /// against the flags on the methods. Any mismatch is fatal.
    pub fn verify(&self, guard: &mut CodeCacheGuard) {
        self.heap.verify();

        let mut blobs = 0;
        let mut nmethods = 0;
        let mut adapters = 0;
        let mut with_dependencies = 0;
        let mut scavengable = vec![];
        for blob in self.blobs(guard) {
            guarantee!(
                self.heap.allocated_size(blob.header_begin()) >= blob.size(),
                "{} is larger than its heap block",
                blob
            );
            blob.verify_header();
            blobs += 1;
            if blob.is_adapter_blob() {
                adapters += 1;
            }
            if let Some(nm) = NMethodRef::from_blob(blob) {
                nmethods += 1;
                if nm.has_dependencies() {
                    with_dependencies += 1;
                }
                if nm.is_alive() {
                    nm.verify_oop_relocations();
                    if self.options.scavenge_roots_in_code && nm.detect_scavenge_root_oops::<VM>() {
                        scavengable.push(nm);
                    }
                }
            }
        }
        guarantee!(
            blobs == self.nof_blobs(),
            "blob count {} does not match the {} blobs in the heap",
            self.nof_blobs(),
            blobs
        );
        guarantee!(
            nmethods == self.nof_nmethods(),
            "nmethod count {} does not match the {} nmethods in the heap",
            self.nof_nmethods(),
            nmethods
        );
        guarantee!(
            adapters == self.nof_adapters(),
            "adapter count {} does not match the {} adapters in the heap",
            self.nof_adapters(),
            adapters
        );
        guarantee!(
            with_dependencies == self.nof_nmethods_with_dependencies(),
            "dependent nmethod count {} does not match the {} in the heap",
            self.nof_nmethods_with_dependencies(),
            with_dependencies
        );

        let registry = self.registry(guard);
        for nm in registry.scavenge_roots.iter() {
            guarantee!(
                nm.on_scavenge_root_list(),
                "{} is a scavenge root but not flagged as one",
                nm
            );
        }
        for nm in scavengable {
            guarantee!(
                nm.on_scavenge_root_list() && registry.scavenge_roots.contains(&nm),
                "{} has scavengable oops but is not a scavenge root",
                nm
            );
        }
        for nm in registry.saved_nmethods.iter() {
            guarantee!(
                nm.is_speculatively_disconnected(),
                "{} is saved but not flagged as disconnected",
                nm
            );
        }
        for list in registry.osr_nmethods.values() {
            for nm in list.iter() {
                guarantee!(nm.is_osr_method(), "{} is on an OSR list", nm);
            }
        }
        trace!("Verified code cache with {} blobs", blobs);
    }
}
