use crate::{MemoryPage, PageSize, VirtualAddress};
use core::fmt;

/// Virtual memory page base for size `S`.
///
/// Software translation tables key their entries by `VirtualPage<Size4K>`,
/// so an unaligned address can never end up as a key.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtualPage<S: PageSize>(pub(crate) MemoryPage<S>);

impl<S: PageSize> VirtualPage<S> {
    /// Page that contains `addr` (aligns down to page boundary).
    #[inline]
    #[must_use]
    pub const fn containing_address(addr: VirtualAddress) -> Self {
        addr.page::<S>()
    }

    #[inline]
    #[must_use]
    pub const fn base(self) -> VirtualAddress {
        VirtualAddress(self.0.base())
    }
}

impl<S> fmt::Display for VirtualPage<S>
where
    S: PageSize,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl<S: PageSize> fmt::Debug for VirtualPage<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtualPage<{}>({:#018X})", S::as_str(), self.0.base().as_u64())
    }
}

impl<S: PageSize> TryFrom<VirtualAddress> for VirtualPage<S> {
    type Error = ();

    #[inline]
    fn try_from(va: VirtualAddress) -> Result<Self, ()> {
        if va.is_aligned::<S>() { Ok(va.page()) } else { Err(()) }
    }
}
