//! # Kernel virtual memory allocator
//!
//! Hands out ranges of kernel virtual address space, populated with
//! physical pages either eagerly ("wired") or on first touch ("lazy"), and
//! takes them back again.
//!
//! ```text
//!   kmemalloc / alloc1        valloc / valloc_wait         suballoc
//!          │                          │                        │
//!          ▼                          ▼                        ▼
//!   ┌─────────────┐  reserve   ┌──────────────┐  delegate  ┌────────┐
//!   │ KernelObject│◄───────────│ AddressSpace │───────────►│ submap │
//!   │ (PageCache) │            └──────────────┘            └────────┘
//!   └─────┬───────┘                   ▲
//!         │ PagerGet (fault)          │ free / free_wakeup
//!         ▼                           │
//!   FrameSource ──► Pmap::enter   pgremove
//! ```
//!
//! All state lives in an explicitly constructed [`KernelMemory`] created by
//! [`KernelMemory::bootstrap`]. Physical frames come from a [`FrameSource`]
//! and translations are installed through a [`Pmap`]; both are traits so the
//! allocator runs unchanged on the host (see [`BitmapFrameSource`] and
//! [`SoftPmap`]).
//!
//! ## Locking
//!
//! Each [`KernelObject`] guards its page cache with its own lock, and each
//! [`AddressSpace`] guards its reservations with another. Neither lock is
//! held while calling into the [`Pmap`], so a page-table implementation may
//! itself allocate from a different kernel object. Sleepers (pages held by
//! another thread, frame exhaustion, a full address space) always re-check
//! their condition after waking.
//!
//! ## Page lifecycle
//!
//! See [`PageState`]. Busy pages are represented by a [`BusyPage`] token;
//! whoever holds it is the only one able to clear the bit, through
//! [`KernelMemory::page_unbusy`].

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

extern crate alloc;

mod addresses;
mod config;
mod error;
mod fault;
mod flags;
#[allow(unsafe_code)]
mod frames;
mod kernel_memory;
mod lazy;
mod map;
mod object;
mod page;
pub mod pager;
mod pmap;
mod submap;
mod teardown;
mod wired;

pub use addresses::{
    PAGE_SHIFT, PAGE_SIZE, PageSize, PhysicalAddress, Size4K, VirtualAddress, VirtualPage, round_page, trunc_page,
};
pub use config::KmConfig;
pub use error::{KmError, PageStateError};
pub use flags::{KmFlags, MapFlags, PagerFlags, Protection};
pub use frames::{ArenaMapper, BitmapFrameSource, Frame, FrameSource, PhysMapper};
pub use kernel_memory::{KERNEL_OBJECT, KMEM_OBJECT, KernelMemory, MB_OBJECT};
pub use map::{AddressSpace, Backing, MapEntry, ObjectSpan};
pub use object::{KernelObject, Lifetime, ObjectGuard, ObjectId, PageCache};
pub use page::{BusyPage, Page, PageState, ReleasedPage, Unbusied};
pub use pager::{PagerSlot, PagerStatus};
pub use pmap::{Pmap, SoftPmap};
