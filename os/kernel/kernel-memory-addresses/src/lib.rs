//! # Virtual and Physical Memory Address Types
//!
//! Strongly typed wrappers for raw memory addresses and page bases used by
//! the kernel memory allocator.
//!
//! | Concept | Generic | Description |
//! |----------|----------|-------------|
//! | [`MemoryAddress`] | – | A raw 64-bit address, either physical or virtual. |
//! | [`MemoryPage<S>`] | [`S: PageSize`](PageSize) | A page-aligned base address of a page of size `S`. |
//! | [`VirtualAddress`] / [`VirtualPage<S>`] | | Kernel virtual (translated) memory. |
//! | [`PhysicalAddress`] | | Physical frames. |
//!
//! Kernel memory is managed in [`Size4K`] pages. Alignment helpers are
//! generic over [`PageSize`] and `const fn`:
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let va = VirtualAddress::new(0xFFFF_C000_0000_1234);
//! assert!(!va.is_aligned::<Size4K>());
//! assert_eq!(va.align_down::<Size4K>().as_u64(), 0xFFFF_C000_0000_1000);
//! assert_eq!(VirtualAddress::new(u64::MAX).checked_align_up::<Size4K>(), None);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]

mod memory_address;
mod memory_page;
mod page_size;
mod physical_address;
mod virtual_address;
mod virtual_page;

pub use memory_address::MemoryAddress;
pub use memory_page::MemoryPage;
pub use page_size::{PageSize, Size4K};
pub use physical_address::PhysicalAddress;
pub use virtual_address::VirtualAddress;
pub use virtual_page::VirtualPage;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alignment_helpers() {
        let a = MemoryAddress::new(0x12345);
        assert_eq!(a.align_down::<Size4K>().as_u64(), 0x12000);
        assert_eq!(a.checked_align_up::<Size4K>().map(MemoryAddress::as_u64), Some(0x13000));
        assert_eq!(a.page::<Size4K>().base().as_u64(), 0x12000);
        assert!(MemoryAddress::new(0x12000).is_aligned::<Size4K>());
        assert!(!a.is_aligned::<Size4K>());
    }

    #[test]
    fn aligned_addresses_stay_put() {
        let a = MemoryAddress::new(0x4000);
        assert_eq!(a.align_down::<Size4K>(), a);
        assert_eq!(a.checked_align_up::<Size4K>(), Some(a));
    }

    #[test]
    fn overflow_is_reported() {
        let top = VirtualAddress::new(u64::MAX - 1);
        assert_eq!(top.checked_align_up::<Size4K>(), None);
        assert_eq!(top.checked_add(2), None);
        assert_eq!(top.checked_add(1).map(VirtualAddress::as_u64), Some(u64::MAX));
    }

    #[test]
    fn virtual_pages() {
        let va = VirtualAddress::new(0xFFFF_C000_0000_1234);
        let vp = VirtualPage::<Size4K>::containing_address(va);
        assert_eq!(vp.base().as_u64(), 0xFFFF_C000_0000_1000);
        assert_eq!(VirtualAddress::from(vp), va.align_down::<Size4K>());
        assert!(VirtualPage::<Size4K>::try_from(va).is_err());
        assert_eq!(VirtualPage::<Size4K>::try_from(vp.base()), Ok(vp));
    }

    #[test]
    fn wrappers_format_by_kind() {
        let va = VirtualAddress::new(0x1000);
        let pa = PhysicalAddress::new(0x2000);
        assert_eq!(format!("{va:?}"), "VA(0x0000000000001000)");
        assert_eq!(format!("{pa:?}"), "PA(0x0000000000002000)");
        assert_eq!(format!("{}", pa + 0x10), "0x0000000000002010");
        assert!(pa.is_aligned::<Size4K>());
    }
}
