//! Physical frame source.
//!
//! The allocator only ever asks for single 4 KiB frames on behalf of an
//! `(object, offset)` key and hands them back one at a time. Exhaustion is
//! not an error at this level; callers decide whether to sleep on
//! [`FrameSource::reclaimed`] or give up.

use crate::addresses::{PAGE_SHIFT, PAGE_SIZE, PhysicalAddress, Size4K};
use crate::object::ObjectId;
use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;
use core::cell::UnsafeCell;
use kernel_sync::{SpinMutex, WaitChannel};
use log::{trace, warn};

/// Supplier of physical page frames.
///
/// May be called while the caller holds the lock of the object the frame is
/// for, never while it holds a second object's lock.
pub trait FrameSource: Send + Sync {
    /// Allocates one frame for `owner` at `offset`, or `None` if exhausted.
    fn alloc_frame(&self, owner: ObjectId, offset: u64) -> Option<PhysicalAddress>;

    /// Returns a frame to the pool and wakes [`reclaimed`](Self::reclaimed).
    fn free_frame(&self, frame: PhysicalAddress);

    /// Fills `frame` with zero bytes.
    fn zero_frame(&self, frame: PhysicalAddress);

    /// Channel signalled whenever frames are returned.
    fn reclaimed(&self) -> &WaitChannel;
}

/// Converts physical addresses to references in the current address space
/// (identity map, direct map, or a host-side arena).
pub trait PhysMapper: Send + Sync {
    /// Convert a *physical* address to a usable mutable reference.
    ///
    /// # Safety
    /// - `pa` must be mapped writable for the duration of `'a`.
    /// - `T` must match the bytes at `pa`, and no other reference to them may
    ///   be alive while the returned one is used.
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T;
}

const FRAME_BYTES: usize = 4096;

const _: () = assert!(FRAME_BYTES as u64 == PAGE_SIZE);

/// One physical page worth of bytes.
#[repr(C, align(4096))]
pub struct Frame(pub [u8; FRAME_BYTES]);

/// Heap-backed stand-in for physical RAM.
///
/// Frames start out filled with [`ArenaMapper::POISON`] so a page that was
/// handed out without being zeroed is easy to spot.
pub struct ArenaMapper {
    base: PhysicalAddress,
    frames: Box<[UnsafeCell<Frame>]>,
}

// SAFETY: access to individual frames is arbitrated by the frame allocator;
// a frame is only touched by whoever currently owns it.
unsafe impl Send for ArenaMapper {}
unsafe impl Sync for ArenaMapper {}

impl ArenaMapper {
    pub const POISON: u8 = 0xA5;

    /// Creates `count` frames addressed from `base` upwards.
    ///
    /// # Panics
    /// If `base` is not page aligned.
    #[must_use]
    pub fn new(base: PhysicalAddress, count: usize) -> Self {
        assert!(base.is_aligned::<Size4K>(), "arena base {base} is not page aligned");
        let frames = (0..count)
            .map(|_| UnsafeCell::new(Frame([Self::POISON; FRAME_BYTES])))
            .collect();
        Self { base, frames }
    }

    #[must_use]
    pub const fn base(&self) -> PhysicalAddress {
        self.base
    }

    #[must_use]
    pub const fn frame_count(&self) -> usize {
        self.frames.len()
    }

    fn index(&self, pa: PhysicalAddress) -> usize {
        let idx = pa
            .as_u64()
            .checked_sub(self.base.as_u64())
            .and_then(|delta| usize::try_from(delta >> PAGE_SHIFT).ok());
        match idx {
            Some(idx) if idx < self.frames.len() => idx,
            _ => panic!("physical address {pa} is outside the arena"),
        }
    }
}

impl PhysMapper for ArenaMapper {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        debug_assert!(pa.is_aligned::<Size4K>());
        debug_assert!(size_of::<T>() <= FRAME_BYTES);
        let cell = &self.frames[self.index(pa)];
        // SAFETY: the caller promises exclusive access and a matching `T`.
        unsafe { &mut *cell.get().cast::<T>() }
    }
}

struct FrameBitmap {
    words: Vec<u64>,
    owners: Vec<Option<(ObjectId, u64)>>,
    in_use: usize,
    next: usize,
}

impl FrameBitmap {
    fn is_set(&self, idx: usize) -> bool {
        self.words[idx / 64] & (1 << (idx % 64)) != 0
    }

    fn flip(&mut self, idx: usize) {
        self.words[idx / 64] ^= 1 << (idx % 64);
    }
}

/// Bitmap allocator over a contiguous run of frames.
///
/// One bit per frame; the search resumes after the last allocation, which
/// keeps successive allocations from reusing the frame that was just freed.
pub struct BitmapFrameSource<M> {
    mapper: M,
    base: PhysicalAddress,
    total: usize,
    state: SpinMutex<FrameBitmap>,
    reclaimed: WaitChannel,
}

impl BitmapFrameSource<ArenaMapper> {
    /// Host-side frame source with `count` frames of arena memory.
    #[must_use]
    pub fn with_arena(count: usize) -> Self {
        let mapper = ArenaMapper::new(PhysicalAddress::new(0x10_0000), count);
        Self::new(mapper.base(), count, mapper)
    }
}

impl<M: PhysMapper> BitmapFrameSource<M> {
    /// Manages `count` frames starting at `base`, reached through `mapper`.
    #[must_use]
    pub fn new(base: PhysicalAddress, count: usize, mapper: M) -> Self {
        Self {
            mapper,
            base,
            total: count,
            state: SpinMutex::new(FrameBitmap {
                words: vec![0; count.div_ceil(64)],
                owners: vec![None; count],
                in_use: 0,
                next: 0,
            }),
            reclaimed: WaitChannel::new(),
        }
    }

    #[must_use]
    pub const fn total(&self) -> usize {
        self.total
    }

    /// Frames currently handed out.
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.state.lock().in_use
    }

    #[must_use]
    pub fn free_count(&self) -> usize {
        self.total - self.in_use()
    }

    /// The `(object, offset)` key a frame was allocated for.
    #[must_use]
    pub fn owner_of(&self, frame: PhysicalAddress) -> Option<(ObjectId, u64)> {
        let idx = self.index(frame)?;
        self.state.lock().owners[idx]
    }

    /// Runs `f` over the contents of an allocated frame.
    ///
    /// # Panics
    /// If `frame` is not currently allocated.
    pub fn with_frame<U>(&self, frame: PhysicalAddress, f: impl FnOnce(&[u8]) -> U) -> U {
        self.assert_allocated(frame);
        // SAFETY: the frame is allocated and only read here.
        let bytes: &Frame = unsafe { self.mapper.phys_to_mut::<Frame>(frame) };
        f(&bytes.0)
    }

    /// Runs `f` with write access to an allocated frame.
    ///
    /// # Panics
    /// If `frame` is not currently allocated.
    pub fn with_frame_mut<U>(&self, frame: PhysicalAddress, f: impl FnOnce(&mut [u8]) -> U) -> U {
        self.assert_allocated(frame);
        // SAFETY: the frame is allocated; its owner is the one writing.
        let bytes: &mut Frame = unsafe { self.mapper.phys_to_mut::<Frame>(frame) };
        f(&mut bytes.0)
    }

    fn index(&self, frame: PhysicalAddress) -> Option<usize> {
        if !frame.is_aligned::<Size4K>() {
            return None;
        }
        let delta = frame.as_u64().checked_sub(self.base.as_u64())?;
        let idx = usize::try_from(delta >> PAGE_SHIFT).ok()?;
        (idx < self.total).then_some(idx)
    }

    fn address(&self, idx: usize) -> PhysicalAddress {
        self.base + ((idx as u64) << PAGE_SHIFT)
    }

    fn assert_allocated(&self, frame: PhysicalAddress) {
        let allocated = self
            .index(frame)
            .is_some_and(|idx| self.state.lock().is_set(idx));
        assert!(allocated, "frame {frame} is not allocated");
    }
}

impl<M: PhysMapper> FrameSource for BitmapFrameSource<M> {
    fn alloc_frame(&self, owner: ObjectId, offset: u64) -> Option<PhysicalAddress> {
        let mut bitmap = self.state.lock();
        if bitmap.in_use == self.total {
            warn!("frame source exhausted ({} frames)", self.total);
            return None;
        }

        let start = bitmap.next;
        let idx = (0..self.total)
            .map(|i| (start + i) % self.total)
            .find(|&idx| !bitmap.is_set(idx))?;

        bitmap.flip(idx);
        bitmap.owners[idx] = Some((owner, offset));
        bitmap.in_use += 1;
        bitmap.next = (idx + 1) % self.total;
        drop(bitmap);

        let frame = self.address(idx);
        trace!("frame {frame} -> {owner:?}@{offset:#x}");
        Some(frame)
    }

    fn free_frame(&self, frame: PhysicalAddress) {
        let Some(idx) = self.index(frame) else {
            panic!("freeing foreign frame {frame}");
        };

        let mut bitmap = self.state.lock();
        assert!(bitmap.is_set(idx), "double free of frame {frame}");
        bitmap.flip(idx);
        bitmap.owners[idx] = None;
        bitmap.in_use -= 1;
        drop(bitmap);

        trace!("frame {frame} returned");
        self.reclaimed.wake_all();
    }

    fn zero_frame(&self, frame: PhysicalAddress) {
        self.with_frame_mut(frame, |bytes| bytes.fill(0));
    }

    fn reclaimed(&self) -> &WaitChannel {
        &self.reclaimed
    }
}
