//! The kernel memory context: the kernel map, the well-known kernel objects,
//! and the collaborators every operation goes through.

use crate::addresses::{PhysicalAddress, VirtualAddress, round_page};
use crate::config::KmConfig;
use crate::error::KmError;
use crate::flags::{MapFlags, Protection};
use crate::frames::FrameSource;
use crate::map::{AddressSpace, Backing};
use crate::object::{KernelObject, ObjectId};
use crate::page::{BusyPage, Unbusied};
use crate::pmap::Pmap;
use alloc::sync::Arc;
use log::{info, trace};

/// Demand-paged backing of `valloc` and `alloc1` ranges.
pub const KERNEL_OBJECT: ObjectId = ObjectId::new(0);
/// General wired allocations.
pub const KMEM_OBJECT: ObjectId = ObjectId::new(1);
/// Wired allocations of the network buffer pool.
pub const MB_OBJECT: ObjectId = ObjectId::new(2);

/// Protection of every kernel mapping made here.
pub(crate) const KERNEL_PROT: Protection = Protection::READ_WRITE;

/// Rounds a request up to whole pages.
pub(crate) const fn round_size(size: u64) -> Result<u64, KmError> {
    match round_page(size) {
        Some(rounded) if rounded != 0 => Ok(rounded),
        _ => Err(KmError::InvalidSize { size }),
    }
}

/// Kernel virtual memory allocator state.
///
/// Created once by [`bootstrap`](Self::bootstrap) and shared by reference
/// (usually behind an `Arc`) with everything that allocates kernel memory.
pub struct KernelMemory<F, P> {
    config: KmConfig,
    frames: F,
    pmap: Arc<P>,
    kernel_map: Arc<AddressSpace<P>>,
    kernel_object: Arc<KernelObject>,
    kmem_object: Arc<KernelObject>,
    mb_object: Arc<KernelObject>,
}

impl<F, P> KernelMemory<F, P>
where
    F: FrameSource,
    P: Pmap,
{
    /// Brings up kernel memory management.
    ///
    /// Creates the kernel objects and the kernel map over
    /// `[vm_min, vm_max)`, and reserves `[vm_min, kernel_end)` so nothing is
    /// ever allocated on top of the bootstrap region.
    ///
    /// # Errors
    /// [`KmError::InvalidLayout`] if `config` does not validate.
    pub fn bootstrap(config: KmConfig, frames: F, pmap: Arc<P>) -> Result<Self, KmError> {
        config.validate()?;

        let kernel_object = Arc::new(KernelObject::immortal(KERNEL_OBJECT, "kernel_object"));
        let kmem_object = Arc::new(KernelObject::immortal(KMEM_OBJECT, "kmem_object"));
        let mb_object = Arc::new(KernelObject::immortal(MB_OBJECT, "mb_object"));

        let kernel_map = Arc::new(AddressSpace::new(
            "kernel_map",
            config.vm_min,
            config.vm_max,
            config.vm_min,
            pmap.clone(),
        ));

        if config.kernel_end > config.vm_min {
            kernel_map.reserve(
                config.kernel_end - config.vm_min,
                Backing::Hole,
                config.vm_min,
                MapFlags::new().with_fixed(true),
            )?;
        }

        info!(
            "kernel memory: map [{}, {}), bootstrap region ends at {}",
            config.vm_min, config.vm_max, config.kernel_end
        );

        Ok(Self {
            config,
            frames,
            pmap,
            kernel_map,
            kernel_object,
            kmem_object,
            mb_object,
        })
    }

    #[must_use]
    pub const fn config(&self) -> &KmConfig {
        &self.config
    }

    #[must_use]
    pub const fn frames(&self) -> &F {
        &self.frames
    }

    /// The kernel translation root.
    #[must_use]
    pub const fn pmap(&self) -> &Arc<P> {
        &self.pmap
    }

    #[must_use]
    pub const fn kernel_map(&self) -> &Arc<AddressSpace<P>> {
        &self.kernel_map
    }

    #[must_use]
    pub const fn kernel_object(&self) -> &Arc<KernelObject> {
        &self.kernel_object
    }

    #[must_use]
    pub const fn kmem_object(&self) -> &Arc<KernelObject> {
        &self.kmem_object
    }

    #[must_use]
    pub const fn mb_object(&self) -> &Arc<KernelObject> {
        &self.mb_object
    }

    /// Kernel virtual address of object offset `offset`.
    #[must_use]
    pub const fn kernel_va(&self, offset: u64) -> VirtualAddress {
        VirtualAddress::new(self.config.vm_min.as_u64() + offset)
    }

    /// Panics unless `map` translates through the kernel root and measures
    /// object offsets from `vm_min`.
    ///
    /// Teardown revokes translations at [`kernel_va`](Self::kernel_va) of a
    /// page's offset, which is only the address the page was mapped at if
    /// both hold.
    pub(crate) fn assert_kernel_map(&self, map: &AddressSpace<P>) {
        assert!(
            Arc::ptr_eq(map.pmap(), &self.pmap),
            "{}: not a kernel address space",
            map.name()
        );
        assert_eq!(
            map.object_base(),
            self.config.vm_min,
            "{}: object offsets not measured from the kernel map base",
            map.name()
        );
    }

    /// Clears Busy on `page`.
    ///
    /// Returns the frame if the page is Resident again. If the page was
    /// released while it was held, its translation is revoked and the frame
    /// goes back to the frame source; `None` is returned.
    pub fn page_unbusy(&self, object: &KernelObject, page: BusyPage) -> Option<PhysicalAddress> {
        match object.unbusy(page) {
            Unbusied::Published(frame) => Some(frame),
            Unbusied::Released(released) => {
                // Revoke while the page still occupies its slot, so nobody
                // can map a replacement at this address before we are done.
                self.pmap.remove(self.kernel_va(released.offset()));
                let frame = object.dispose(released);
                self.frames.free_frame(frame);
                trace!("{}: freed page released while busy", object.name());
                None
            }
        }
    }
}
