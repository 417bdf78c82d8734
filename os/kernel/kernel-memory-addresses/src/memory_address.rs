use crate::{MemoryPage, PageSize};
use core::fmt;
use core::ops::{Add, AddAssign, Sub};

/// Principal raw memory address ([virtual](super::VirtualAddress) or [physical](super::PhysicalAddress)).
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct MemoryAddress(u64);

impl MemoryAddress {
    #[inline]
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// The page for size `S` that contains this address (lower bits zeroed).
    #[inline]
    #[must_use]
    pub const fn page<S: PageSize>(self) -> MemoryPage<S> {
        MemoryPage::<S>::from_addr(self)
    }

    #[inline]
    #[must_use]
    pub const fn is_aligned<S: PageSize>(self) -> bool {
        self.0 & S::MASK == 0
    }

    /// Align down to page boundary `S`.
    #[inline]
    #[must_use]
    pub const fn align_down<S: PageSize>(self) -> Self {
        Self(self.0 & !S::MASK)
    }

    /// Align up to page boundary `S`, or `None` past the top of the address space.
    #[inline]
    #[must_use]
    pub const fn checked_align_up<S: PageSize>(self) -> Option<Self> {
        match self.0.checked_add(S::MASK) {
            Some(v) => Some(Self(v & !S::MASK)),
            None => None,
        }
    }

    #[inline]
    #[must_use]
    pub const fn checked_add(self, bytes: u64) -> Option<Self> {
        match self.0.checked_add(bytes) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }
}

impl fmt::Debug for MemoryAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MemoryAddress(0x{:016X})", self.0)
    }
}

impl fmt::Display for MemoryAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.as_u64())
    }
}

impl From<u64> for MemoryAddress {
    #[inline]
    fn from(v: u64) -> Self {
        Self::new(v)
    }
}

impl From<MemoryAddress> for u64 {
    #[inline]
    fn from(a: MemoryAddress) -> Self {
        a.as_u64()
    }
}

impl<S> From<MemoryPage<S>> for MemoryAddress
where
    S: PageSize,
{
    fn from(value: MemoryPage<S>) -> Self {
        Self(value.into_inner())
    }
}

impl Add<u64> for MemoryAddress {
    type Output = Self;
    #[inline]
    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl AddAssign<u64> for MemoryAddress {
    #[inline]
    fn add_assign(&mut self, rhs: u64) {
        self.0 += rhs;
    }
}

/// Distance in bytes; `self` must not lie below `rhs`.
impl Sub for MemoryAddress {
    type Output = u64;
    #[inline]
    fn sub(self, rhs: Self) -> u64 {
        self.0 - rhs.0
    }
}
