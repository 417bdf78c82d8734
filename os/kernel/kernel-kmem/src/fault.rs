//! Resolution of faults on lazily backed kernel pages.

use crate::addresses::{PhysicalAddress, Size4K, VirtualAddress};
use crate::error::KmError;
use crate::flags::PagerFlags;
use crate::frames::FrameSource;
use crate::kernel_memory::{KERNEL_PROT, KernelMemory};
use crate::map::AddressSpace;
use crate::pager::{self, PagerSlot, PagerStatus};
use crate::pmap::Pmap;
use log::trace;

impl<F, P> KernelMemory<F, P>
where
    F: FrameSource,
    P: Pmap,
{
    /// Makes the page containing `va` resident and mapped.
    ///
    /// Tries the non-blocking PagerGet first and falls back to the blocking
    /// one if the page is held by someone else or no frame is free.
    ///
    /// # Errors
    /// [`KmError::NotMapped`] if `va` is not in an object-backed range, or
    /// the range was torn down while the page was being brought in.
    pub fn fault(&self, map: &AddressSpace<P>, va: VirtualAddress) -> Result<PhysicalAddress, KmError> {
        self.assert_kernel_map(map);
        let (object, offset) = map.lookup(va)?;
        let mut slots = [PagerSlot::Empty];

        let mut cache = object.lock();
        let (_, status) = pager::get_locked(
            &mut cache,
            self.frames(),
            offset,
            &mut slots,
            0,
            PagerFlags::new(),
        );
        if status == PagerStatus::Unlock {
            trace!("fault at {va}: retrying in blocking mode");
            let status = pager::get_blocking(&object, cache, self.frames(), offset, &mut slots);
            debug_assert_eq!(status, PagerStatus::Ok, "blocking pager always resolves");
        } else {
            drop(cache);
        }

        let Some(page) = slots[0].take() else {
            panic!("fault at {va}: pager returned without a page");
        };
        let frame = page.frame();
        self.pmap().enter(va.align_down::<Size4K>(), frame, KERNEL_PROT);

        self.page_unbusy(&object, page)
            .ok_or(KmError::NotMapped { address: va })
    }
}
