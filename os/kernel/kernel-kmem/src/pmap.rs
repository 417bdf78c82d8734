//! Address translation root.

use crate::addresses::{PhysicalAddress, Size4K, VirtualAddress, VirtualPage};
use crate::flags::Protection;
use alloc::collections::BTreeMap;
use kernel_sync::SpinMutex;
use log::trace;

/// Architecture page-table editing for one translation root.
///
/// The allocator never holds an object or address-space lock while calling
/// into a `Pmap`, so an implementation is free to allocate page-table pages
/// from another kernel object.
pub trait Pmap: Send + Sync {
    /// Maps `va` to `pa`, replacing any previous translation.
    fn enter(&self, va: VirtualAddress, pa: PhysicalAddress, prot: Protection);

    /// Removes the translation for `va`, if any.
    fn remove(&self, va: VirtualAddress);

    /// Current translation for `va`.
    fn extract(&self, va: VirtualAddress) -> Option<PhysicalAddress>;
}

/// Translation table kept in software, one entry per 4 KiB page.
#[derive(Default)]
pub struct SoftPmap {
    entries: SpinMutex<BTreeMap<VirtualPage<Size4K>, (PhysicalAddress, Protection)>>,
}

impl SoftPmap {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: SpinMutex::new(BTreeMap::new()),
        }
    }

    /// Number of installed translations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn translation(&self, va: VirtualAddress) -> Option<(PhysicalAddress, Protection)> {
        self.entries.lock().get(&va.page::<Size4K>()).copied()
    }
}

impl Pmap for SoftPmap {
    fn enter(&self, va: VirtualAddress, pa: PhysicalAddress, prot: Protection) {
        debug_assert!(va.is_aligned::<Size4K>() && pa.is_aligned::<Size4K>());
        trace!("pmap enter {va} -> {pa}");
        self.entries.lock().insert(va.page::<Size4K>(), (pa, prot));
    }

    fn remove(&self, va: VirtualAddress) {
        if self.entries.lock().remove(&va.page::<Size4K>()).is_some() {
            trace!("pmap remove {va}");
        }
    }

    fn extract(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        self.translation(va).map(|(pa, _)| pa)
    }
}
