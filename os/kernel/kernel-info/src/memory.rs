//! # Memory Layout

use kernel_memory_addresses::{PageSize, Size4K};

/// Size of a base page in bytes.
pub const PAGE_SIZE: u64 = Size4K::SIZE;

/// log2 of [`PAGE_SIZE`].
pub const PAGE_SHIFT: u32 = Size4K::SHIFT;

/// First virtual address managed by the kernel map.
///
/// Every offset into a kernel memory object is measured from here.
pub const KERNEL_VM_MIN: u64 = 0xffff_c000_0000_0000;

/// End (exclusive) of the kernel map.
pub const KERNEL_VM_MAX: u64 = 0xffff_c000_4000_0000; // 1 GiB window

/// End of the region already in use when the allocator is initialized.
///
/// `[KERNEL_VM_MIN, KERNEL_VM_BOOTSTRAP_END)` is reserved as a fixed hole
/// during bootstrap so allocations never land on the kernel image.
pub const KERNEL_VM_BOOTSTRAP_END: u64 = KERNEL_VM_MIN + 0x0100_0000; // 16 MiB

const _: () = {
    assert!(PAGE_SIZE == 1 << PAGE_SHIFT);
    assert!(KERNEL_VM_MIN.is_multiple_of(PAGE_SIZE));
    assert!(KERNEL_VM_MAX.is_multiple_of(PAGE_SIZE));
    assert!(KERNEL_VM_BOOTSTRAP_END.is_multiple_of(PAGE_SIZE));
    assert!(KERNEL_VM_MIN < KERNEL_VM_BOOTSTRAP_END);
    assert!(KERNEL_VM_BOOTSTRAP_END < KERNEL_VM_MAX);
};
