//! # Kernel Memory Layout Configuration
//!
//! Compile-time constants that describe the window of kernel virtual address
//! space handed to the kernel memory allocator (`kernel-kmem`). This crate is
//! the single source of truth for that window; the allocator builds its
//! default runtime configuration from it.
//!
//! ```text
//! KERNEL_VM_MIN           ┌─────────────────────────────────┐
//!                         │  Bootstrap region               │
//!                         │  (kernel image, early tables)   │
//! KERNEL_VM_BOOTSTRAP_END ├─────────────────────────────────┤
//!                         │  Kernel map                     │
//!                         │  (wired/lazy allocations,       │
//!                         │   submaps)                      │
//! KERNEL_VM_MAX           └─────────────────────────────────┘
//! ```
//!
//! The layout is validated with `const` assertions, so an inconsistent
//! configuration fails the build instead of the boot.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod memory;
