//! Flag words passed across the allocator API.

use bitfield_struct::bitfield;

/// Access rights installed with a kernel translation.
#[bitfield(u8)]
#[derive(PartialEq, Eq)]
pub struct Protection {
    pub read: bool,
    pub write: bool,
    pub execute: bool,
    #[bits(5)]
    __: u8,
}

impl Protection {
    pub const NONE: Self = Self::new();
    pub const READ_WRITE: Self = Self::new().with_read(true).with_write(true);
    pub const ALL: Self = Self::READ_WRITE.with_execute(true);
}

/// Options for [`kmemalloc`](crate::KernelMemory::kmemalloc).
#[bitfield(u8)]
#[derive(PartialEq, Eq)]
pub struct KmFlags {
    /// Reserve the range only; nothing is allocated or mapped.
    pub value_only: bool,
    /// Fail instead of sleeping when physical memory runs out.
    pub no_wait: bool,
    /// Fail instead of waiting for a contended address-space lock.
    pub try_lock: bool,
    #[bits(5)]
    __: u8,
}

impl KmFlags {
    /// Populate the whole range, sleeping for memory if necessary.
    pub const WAIT: Self = Self::new();
    pub const VALUE_ONLY: Self = Self::new().with_value_only(true);
    pub const NO_WAIT: Self = Self::new().with_no_wait(true);
}

/// Placement options for an address-space reservation.
#[bitfield(u8)]
#[derive(PartialEq, Eq)]
pub struct MapFlags {
    /// Reserve exactly at the hint or fail.
    pub fixed: bool,
    /// Fail with [`WouldBlock`](crate::KmError::WouldBlock) on lock contention.
    pub try_lock: bool,
    #[bits(6)]
    __: u8,
}

/// Options for the non-blocking PagerGet.
#[bitfield(u8)]
#[derive(PartialEq, Eq)]
pub struct PagerFlags {
    /// Every slot is mandatory, not just the center one.
    pub all_pages: bool,
    #[bits(7)]
    __: u8,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn composed_constants() {
        assert!(Protection::ALL.read() && Protection::ALL.write() && Protection::ALL.execute());
        assert!(!Protection::READ_WRITE.execute());
        assert_eq!(Protection::NONE.into_bits(), 0);

        let f = KmFlags::NO_WAIT.with_try_lock(true);
        assert!(f.no_wait() && f.try_lock() && !f.value_only());
        assert_eq!(KmFlags::WAIT, KmFlags::new());
    }
}
