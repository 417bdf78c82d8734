use crate::addresses::VirtualAddress;
use crate::page::PageState;

/// Recoverable allocator failures.
///
/// Contract violations inside the kernel are not represented here; they
/// panic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum KmError {
    #[error("no room in the address space for {size:#x} bytes")]
    NoSpace { size: u64 },
    #[error("out of physical memory")]
    OutOfMemory,
    #[error("address space lock is contended")]
    WouldBlock,
    #[error("invalid allocation size {size:#x}")]
    InvalidSize { size: u64 },
    #[error("no kernel object backs {address}")]
    NotMapped { address: VirtualAddress },
    #[error("invalid kernel address range {min}..{max}")]
    InvalidLayout {
        min: VirtualAddress,
        max: VirtualAddress,
    },
}

/// An illegal page lifecycle transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal page transition {from:?} -> {to:?} at offset {offset:#x}")]
pub struct PageStateError {
    pub offset: u64,
    pub from: PageState,
    pub to: PageState,
}
