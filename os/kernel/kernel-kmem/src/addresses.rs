//! Address types and page rounding.
//!
//! The newtypes come from `kernel-memory-addresses`; sizes (as opposed to
//! addresses) are plain byte counts rounded here.

pub use kernel_info::memory::{PAGE_SHIFT, PAGE_SIZE};
pub use kernel_memory_addresses::{PageSize, PhysicalAddress, Size4K, VirtualAddress, VirtualPage};

/// Rounds `bytes` up to a whole number of pages.
///
/// Returns `None` if the result does not fit into a `u64`.
#[inline]
#[must_use]
pub const fn round_page(bytes: u64) -> Option<u64> {
    match bytes.checked_add(Size4K::MASK) {
        Some(v) => Some(v & !Size4K::MASK),
        None => None,
    }
}

/// Rounds `bytes` down to a page boundary.
#[inline]
#[must_use]
pub const fn trunc_page(bytes: u64) -> u64 {
    bytes & !Size4K::MASK
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rounding() {
        assert_eq!(round_page(0), Some(0));
        assert_eq!(round_page(1), Some(PAGE_SIZE));
        assert_eq!(round_page(PAGE_SIZE), Some(PAGE_SIZE));
        assert_eq!(round_page(3 * PAGE_SIZE + 7), Some(4 * PAGE_SIZE));
        assert_eq!(round_page(u64::MAX), None);
        assert_eq!(trunc_page(PAGE_SIZE + 1), PAGE_SIZE);
    }
}
