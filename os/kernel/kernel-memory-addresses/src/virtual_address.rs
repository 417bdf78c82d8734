use crate::{MemoryAddress, PageSize, VirtualPage};
use core::fmt;
use core::ops::{Add, AddAssign, Sub};

/// Virtual memory address.
///
/// A thin wrapper around [`MemoryAddress`] that denotes **virtual** addresses.
/// It does not validate canonicality at runtime; it only carries the *kind* of
/// address at the type level so interval bookkeeping never mixes up virtual
/// and physical values.
///
/// ### Examples
/// ```rust
/// # use kernel_memory_addresses::*;
/// let va = VirtualAddress::new(0xFFFF_C000_0000_1234);
/// assert_eq!(va.page::<Size4K>().base().as_u64(), 0xFFFF_C000_0000_1000);
/// assert_eq!(va.checked_align_up::<Size4K>().unwrap().as_u64(), 0xFFFF_C000_0000_2000);
/// assert_eq!((va + 0x10) - va, 0x10);
/// ```
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtualAddress(pub(crate) MemoryAddress);

impl VirtualAddress {
    #[inline]
    #[must_use]
    pub const fn new(v: u64) -> Self {
        Self(MemoryAddress::new(v))
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0.as_u64()
    }

    #[inline]
    #[must_use]
    pub const fn page<S: PageSize>(self) -> VirtualPage<S> {
        VirtualPage::<S>(self.0.page::<S>())
    }

    #[inline]
    #[must_use]
    pub const fn is_aligned<S: PageSize>(self) -> bool {
        self.0.is_aligned::<S>()
    }

    #[inline]
    #[must_use]
    pub const fn align_down<S: PageSize>(self) -> Self {
        Self(self.0.align_down::<S>())
    }

    #[inline]
    #[must_use]
    pub const fn checked_align_up<S: PageSize>(self) -> Option<Self> {
        match self.0.checked_align_up::<S>() {
            Some(a) => Some(Self(a)),
            None => None,
        }
    }

    #[inline]
    #[must_use]
    pub const fn checked_add(self, bytes: u64) -> Option<Self> {
        match self.0.checked_add(bytes) {
            Some(a) => Some(Self(a)),
            None => None,
        }
    }
}

impl fmt::Debug for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VA(0x{:016X})", self.as_u64())
    }
}

impl fmt::Display for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.as_u64())
    }
}

impl From<u64> for VirtualAddress {
    #[inline]
    fn from(v: u64) -> Self {
        Self::new(v)
    }
}

impl<S> From<VirtualPage<S>> for VirtualAddress
where
    S: PageSize,
{
    fn from(value: VirtualPage<S>) -> Self {
        value.base()
    }
}

impl Add<u64> for VirtualAddress {
    type Output = Self;
    #[inline]
    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl AddAssign<u64> for VirtualAddress {
    #[inline]
    fn add_assign(&mut self, rhs: u64) {
        self.0 += rhs;
    }
}

/// Distance in bytes between two addresses (`self` must not be below `rhs`).
impl Sub for VirtualAddress {
    type Output = u64;
    #[inline]
    fn sub(self, rhs: Self) -> u64 {
        self.0 - rhs.0
    }
}
