//! Submaps: child address spaces carved out of a parent.

use crate::addresses::{VirtualAddress, round_page};
use crate::flags::MapFlags;
use crate::frames::FrameSource;
use crate::kernel_memory::KernelMemory;
use crate::map::{AddressSpace, Backing};
use crate::pmap::Pmap;
use alloc::sync::Arc;
use log::info;

impl<F, P> KernelMemory<F, P>
where
    F: FrameSource,
    P: Pmap,
{
    /// Carves `size` bytes out of `parent` and hands them to a child map.
    ///
    /// The window is placed at or above `min_hint` (exactly at it when
    /// `fixed` is set). If `submap` is given it is initialized in place,
    /// otherwise a fresh address space is created. The child shares the
    /// parent's translation root, and lookups in the window are delegated
    /// to it. The window is reported by the child's
    /// [`bounds`](AddressSpace::bounds).
    ///
    /// Only used while the kernel boots.
    ///
    /// # Panics
    /// If the window cannot be reserved or delegated, or `submap` was already
    /// set up.
    pub fn suballoc(
        &self,
        parent: &AddressSpace<P>,
        min_hint: VirtualAddress,
        size: u64,
        fixed: bool,
        submap: Option<Arc<AddressSpace<P>>>,
    ) -> Arc<AddressSpace<P>> {
        self.assert_kernel_map(parent);

        let size = match round_page(size) {
            Some(size) if size != 0 => size,
            _ => panic!("suballoc: invalid submap size {size:#x}"),
        };

        let flags = MapFlags::new().with_fixed(fixed);
        let start = match parent.reserve(size, Backing::Hole, min_hint, flags) {
            Ok(start) => start,
            Err(e) => panic!("suballoc: unable to reserve {size:#x} bytes in {}: {e}", parent.name()),
        };
        let end = start + size;

        let child = submap.unwrap_or_else(|| Arc::new(AddressSpace::placeholder("submap")));
        child.setup(start, end, parent.object_base(), parent.pmap().clone());

        if let Err(e) = parent.register_submap(start, end, child.clone()) {
            panic!("suballoc: unable to delegate [{start}, {end}) to {}: {e}", child.name());
        }

        info!(
            "suballoc: {} [{start}, {end}) in {}",
            child.name(),
            parent.name()
        );
        child
    }
}
