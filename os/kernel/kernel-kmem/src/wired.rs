//! Wired allocation: reserve a range and populate it right away.

use crate::addresses::{PAGE_SIZE, VirtualAddress};
use crate::error::KmError;
use crate::flags::{KmFlags, MapFlags};
use crate::frames::FrameSource;
use crate::kernel_memory::{KERNEL_PROT, KernelMemory, round_size};
use crate::map::{AddressSpace, Backing};
use crate::object::KernelObject;
use crate::page::{BusyPage, Page, PageState};
use crate::pmap::Pmap;
use alloc::sync::Arc;
use log::{debug, trace, warn};

impl<F, P> KernelMemory<F, P>
where
    F: FrameSource,
    P: Pmap,
{
    /// Allocates `size` bytes of wired memory from `object` in `map`.
    ///
    /// Every page of the returned range is Resident and mapped when this
    /// returns. On failure nothing of the attempt is left behind.
    ///
    /// # Errors
    /// - [`KmError::NoSpace`] if `map` has no room.
    /// - [`KmError::OutOfMemory`] if `no_wait` was given and frames ran out.
    /// - [`KmError::WouldBlock`] if `try_lock` was given and `map` was busy.
    /// - [`KmError::InvalidSize`] for a zero or overflowing size.
    ///
    /// # Panics
    /// If `map` is not a kernel address space.
    pub fn kmemalloc(
        &self,
        map: &AddressSpace<P>,
        object: &Arc<KernelObject>,
        size: u64,
        flags: KmFlags,
    ) -> Result<VirtualAddress, KmError> {
        self.assert_kernel_map(map);
        let size = round_size(size)?;

        let map_flags = MapFlags::new().with_try_lock(flags.try_lock());
        let va = map.reserve(
            size,
            Backing::Object(object.clone()),
            VirtualAddress::default(),
            map_flags,
        )?;
        if flags.value_only() {
            trace!("kmemalloc: reserved {size:#x} bytes at {va}");
            return Ok(va);
        }

        let offset = va - map.object_base();
        if let Err(e) = self.populate(object, va, offset, size, !flags.no_wait(), false) {
            debug!("kmemalloc: {e}, rolling back {size:#x} bytes at {va}");
            self.free(map, va, size);
            return Err(e);
        }

        debug!("kmemalloc: {} {size:#x} bytes at {va}", object.name());
        Ok(va)
    }

    /// Allocates `size` bytes of wired memory backed by the kernel object,
    /// optionally zero filled. Waits for frames as long as it takes.
    ///
    /// # Errors
    /// [`KmError::NoSpace`] or [`KmError::InvalidSize`].
    ///
    /// # Panics
    /// If `map` is not a kernel address space, or a page other
    /// than a released one is found in the new range.
    pub fn alloc1(
        &self,
        map: &AddressSpace<P>,
        size: u64,
        zero: bool,
    ) -> Result<VirtualAddress, KmError> {
        self.assert_kernel_map(map);
        let size = round_size(size)?;

        let object = self.kernel_object();
        let va = map.reserve(
            size,
            Backing::Object(object.clone()),
            VirtualAddress::default(),
            MapFlags::new(),
        )?;

        let offset = va - map.object_base();
        self.populate(object, va, offset, size, true, zero)?;

        debug!("alloc1: {size:#x} bytes at {va}");
        Ok(va)
    }

    /// One wired page for a memory pool.
    ///
    /// A caller that cannot sleep passes `wait = false` and gets
    /// `no_wait | try_lock` semantics.
    ///
    /// # Errors
    /// As [`kmemalloc`](Self::kmemalloc).
    pub fn alloc_poolpage(
        &self,
        map: &AddressSpace<P>,
        object: &Arc<KernelObject>,
        wait: bool,
    ) -> Result<VirtualAddress, KmError> {
        let flags = if wait {
            KmFlags::WAIT
        } else {
            KmFlags::NO_WAIT.with_try_lock(true)
        };
        self.kmemalloc(map, object, PAGE_SIZE, flags)
    }

    /// Returns a page obtained from [`alloc_poolpage`](Self::alloc_poolpage).
    pub fn free_poolpage(&self, map: &AddressSpace<P>, va: VirtualAddress) {
        self.free(map, va, PAGE_SIZE);
    }

    /// Allocates, publishes and maps one page per page of `[va, va + size)`.
    fn populate(
        &self,
        object: &KernelObject,
        va: VirtualAddress,
        offset: u64,
        size: u64,
        wait: bool,
        zero: bool,
    ) -> Result<(), KmError> {
        let mut done = 0;
        while done < size {
            let page = self.wire_page(object, offset + done, wait)?;
            let frame = page.frame();
            if zero {
                self.frames().zero_frame(frame);
            }

            // No object lock is held past this point.
            if self.page_unbusy(object, page).is_some() {
                self.pmap().enter(va + done, frame, KERNEL_PROT);
            }
            done += PAGE_SIZE;
        }
        Ok(())
    }

    /// Puts a fresh Busy page at `offset`.
    ///
    /// A page released by an earlier teardown may still occupy the slot;
    /// wait for its holder to dispose of it.
    fn wire_page(
        &self,
        object: &KernelObject,
        offset: u64,
        wait: bool,
    ) -> Result<BusyPage, KmError> {
        let mut cache = object.lock();
        loop {
            match cache.lookup(offset).map(Page::state) {
                None => {}
                Some(PageState::Released) => {
                    if let Some(page) = cache.lookup_mut(offset) {
                        page.set_wanted();
                    }
                    trace!("{}@{offset:#x}: waiting for released page", object.name());
                    cache = object.sleep_on_page(cache);
                    continue;
                }
                Some(state) => panic!(
                    "{}@{offset:#x}: {state:?} page inside a new allocation",
                    object.name()
                ),
            }

            let ticket = self.frames().reclaimed().ticket();
            if let Some(frame) = self.frames().alloc_frame(object.id(), offset) {
                return Ok(cache.insert_busy(offset, frame));
            }
            if !wait {
                return Err(KmError::OutOfMemory);
            }

            warn!("{}@{offset:#x}: waiting for free frames", object.name());
            cache = self.frames().reclaimed().sleep_from(ticket, cache);
        }
    }
}
