//! Page removal and range release.

use crate::addresses::{Size4K, VirtualAddress};
use crate::frames::FrameSource;
use crate::kernel_memory::KernelMemory;
use crate::map::AddressSpace;
use crate::object::KernelObject;
use crate::pmap::Pmap;
use alloc::vec::Vec;
use log::{debug, trace};

impl<F, P> KernelMemory<F, P>
where
    F: FrameSource,
    P: Pmap,
{
    /// Removes the pages of `object` in offsets `[start, end)`.
    ///
    /// Busy pages are marked Released and left to their holder; every other
    /// page is unmapped and its frame freed. Translations are revoked after
    /// the object lock is dropped.
    pub fn pgremove(&self, object: &KernelObject, start: u64, end: u64) {
        let mut cache = object.lock();
        let mut doomed = Vec::new();
        let mut released = 0_usize;

        // Pages of a kernel object are few compared with the offsets a range
        // can span, so walk the cache instead of the range.
        for offset in cache.offsets_in(start..end) {
            if cache.release_busy(offset) {
                trace!("{}@{offset:#x}: busy page released", object.name());
                released += 1;
            } else if let Some(frame) = cache.remove_resident(offset) {
                doomed.push((offset, frame));
            }
        }
        drop(cache);

        for &(offset, frame) in &doomed {
            self.pmap().remove(self.kernel_va(offset));
            self.frames().free_frame(frame);
        }

        debug!(
            "pgremove: {} [{start:#x}, {end:#x}): {} freed, {released} released",
            object.name(),
            doomed.len()
        );
    }

    /// Releases `[addr, addr + size)` in `map`, freeing object pages.
    ///
    /// # Panics
    /// If the range wraps around the address space, or `map` is not a
    /// kernel address space.
    pub fn free(&self, map: &AddressSpace<P>, addr: VirtualAddress, size: u64) {
        self.assert_kernel_map(map);
        let start = addr.align_down::<Size4K>();
        let Some(end) = addr.checked_add(size).and_then(VirtualAddress::checked_align_up::<Size4K>) else {
            panic!("free: range at {addr} of {size:#x} bytes wraps");
        };

        for span in map.object_spans(start, end) {
            self.pgremove(&span.object, span.start, span.end);
        }
        let bytes = map.release(start, end);
        debug!("free: {bytes:#x} bytes at {start} in {}", map.name());
    }

    /// [`free`](Self::free), then wakes every thread waiting for space in
    /// `map`.
    pub fn free_wakeup(&self, map: &AddressSpace<P>, addr: VirtualAddress, size: u64) {
        self.free(map, addr, size);
        map.space_wanted().wake_all();
    }
}
