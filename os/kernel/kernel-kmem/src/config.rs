use crate::addresses::{PAGE_SIZE, Size4K, VirtualAddress};
use crate::error::KmError;
use kernel_info::memory::{KERNEL_VM_BOOTSTRAP_END, KERNEL_VM_MAX, KERNEL_VM_MIN};

/// Runtime layout of the kernel map.
///
/// The default comes straight from [`kernel_info::memory`]; boards and tests
/// can build their own with [`KmConfig::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KmConfig {
    /// First address of the kernel map; object offsets are relative to it.
    pub vm_min: VirtualAddress,
    /// End (exclusive) of the kernel map.
    pub vm_max: VirtualAddress,
    /// End of the space already consumed before the allocator came up.
    pub kernel_end: VirtualAddress,
}

impl Default for KmConfig {
    fn default() -> Self {
        Self::new(
            VirtualAddress::new(KERNEL_VM_MIN),
            VirtualAddress::new(KERNEL_VM_MAX),
            VirtualAddress::new(KERNEL_VM_BOOTSTRAP_END),
        )
    }
}

impl KmConfig {
    #[must_use]
    pub const fn new(
        vm_min: VirtualAddress,
        vm_max: VirtualAddress,
        kernel_end: VirtualAddress,
    ) -> Self {
        Self {
            vm_min,
            vm_max,
            kernel_end,
        }
    }

    /// Checks alignment and ordering of the three boundaries.
    ///
    /// # Errors
    /// [`KmError::InvalidLayout`] if the window is empty, unaligned, or the
    /// bootstrap region does not lie inside it.
    pub fn validate(&self) -> Result<(), KmError> {
        let aligned = self.vm_min.is_aligned::<Size4K>()
            && self.vm_max.is_aligned::<Size4K>()
            && self.kernel_end.is_aligned::<Size4K>();
        let ordered = self.vm_min <= self.kernel_end && self.kernel_end < self.vm_max;
        if aligned && ordered && self.vm_max - self.vm_min >= PAGE_SIZE {
            Ok(())
        } else {
            Err(KmError::InvalidLayout {
                min: self.vm_min,
                max: self.vm_max,
            })
        }
    }
}
