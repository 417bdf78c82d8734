use crate::{MemoryAddress, PageSize};
use core::fmt;
use core::marker::PhantomData;

/// A page base address (lower `S::SHIFT` bits are zero).
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct MemoryPage<S: PageSize> {
    value: u64,
    _phantom: PhantomData<S>,
}

impl<S> fmt::Display for MemoryPage<S>
where
    S: PageSize,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}/{}", self.value, S::as_str())
    }
}

impl<S: PageSize> MemoryPage<S> {
    /// Create from a raw value, aligning down to the page boundary.
    #[inline]
    #[must_use]
    pub const fn from_addr(addr: MemoryAddress) -> Self {
        let value = addr.as_u64() & !S::MASK;
        Self {
            value,
            _phantom: PhantomData,
        }
    }

    /// Return the base as `MemoryAddress`.
    #[inline]
    #[must_use]
    pub const fn base(self) -> MemoryAddress {
        MemoryAddress::new(self.value)
    }

    #[inline]
    #[must_use]
    pub(crate) const fn into_inner(self) -> u64 {
        self.value
    }
}

impl<S: PageSize> fmt::Debug for MemoryPage<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MemoryPage<{}>(0x{:016X})", S::as_str(), self.value)
    }
}
