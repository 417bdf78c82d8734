//! Lazy allocation: reserve now, populate on first touch.

use crate::addresses::VirtualAddress;
use crate::error::KmError;
use crate::flags::MapFlags;
use crate::frames::FrameSource;
use crate::kernel_memory::{KernelMemory, round_size};
use crate::map::{AddressSpace, Backing};
use crate::pmap::Pmap;
use log::debug;

impl<F, P> KernelMemory<F, P>
where
    F: FrameSource,
    P: Pmap,
{
    /// Reserves a zero-fill-on-demand range backed by the kernel object.
    ///
    /// # Errors
    /// [`KmError::NoSpace`] if `map` is full, [`KmError::InvalidSize`] for a
    /// zero or overflowing size.
    ///
    /// # Panics
    /// If `map` is not a kernel address space.
    pub fn valloc(&self, map: &AddressSpace<P>, size: u64) -> Result<VirtualAddress, KmError> {
        self.assert_kernel_map(map);
        let size = round_size(size)?;
        self.reserve_lazy(map, size)
    }

    /// Like [`valloc`](Self::valloc), but sleeps until space is returned
    /// with [`free_wakeup`](Self::free_wakeup) instead of failing.
    ///
    /// # Errors
    /// [`KmError::NoSpace`] without sleeping if `size` exceeds the whole
    /// span of `map`; [`KmError::InvalidSize`] as for `valloc`.
    ///
    /// # Panics
    /// If `map` is not a kernel address space.
    pub fn valloc_wait(&self, map: &AddressSpace<P>, size: u64) -> Result<VirtualAddress, KmError> {
        self.assert_kernel_map(map);
        let size = round_size(size)?;

        if size > map.total_span() {
            debug!("valloc_wait: {size:#x} bytes can never fit in {}", map.name());
            return Err(KmError::NoSpace { size });
        }

        loop {
            let ticket = map.space_wanted().ticket();
            match self.reserve_lazy(map, size) {
                Err(KmError::NoSpace { .. }) => {
                    debug!("valloc_wait: {} is full, sleeping", map.name());
                    map.space_wanted().wait(ticket);
                }
                result => return result,
            }
        }
    }

    fn reserve_lazy(&self, map: &AddressSpace<P>, size: u64) -> Result<VirtualAddress, KmError> {
        let va = map.reserve(
            size,
            Backing::Object(self.kernel_object().clone()),
            VirtualAddress::default(),
            MapFlags::new(),
        )?;
        debug!("valloc: {size:#x} bytes at {va}");
        Ok(va)
    }
}
