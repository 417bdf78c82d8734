//! PagerGet: supplying Busy pages of a kernel object for an offset range.
//!
//! Slot `i` of a request stands for offset `start + i * PAGE_SIZE`. Slots are
//! resolved in increasing offset order.

use crate::addresses::PAGE_SIZE;
use crate::flags::PagerFlags;
use crate::frames::FrameSource;
use crate::object::{KernelObject, ObjectGuard, PageCache};
use crate::page::{BusyPage, PageState};
use core::mem;
use log::{trace, warn};

/// One slot of a PagerGet request.
#[derive(Debug, Default, PartialEq, Eq)]
pub enum PagerSlot {
    /// Wanted, not resolved yet.
    #[default]
    Empty,
    /// Not wanted by the caller.
    DontCare,
    /// Resolved: the caller now holds the page Busy.
    Page(BusyPage),
}

impl PagerSlot {
    #[must_use]
    pub const fn is_resolved(&self) -> bool {
        matches!(self, Self::Page(_))
    }

    /// Takes the busy page out of the slot, leaving it [`Empty`](Self::Empty).
    pub fn take(&mut self) -> Option<BusyPage> {
        match mem::take(self) {
            Self::Page(page) => Some(page),
            other => {
                *self = other;
                None
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum PagerStatus {
    /// Every mandatory slot is resolved.
    Ok,
    /// A mandatory slot could not be resolved without sleeping; drop the
    /// higher-level lock and retry with [`get_blocking`].
    Unlock,
}

const fn slot_offset(start: u64, index: usize) -> u64 {
    start + (index as u64) * PAGE_SIZE
}

/// Non-blocking PagerGet.
///
/// Resolves what can be resolved without sleeping: present Resident pages
/// are busied, missing pages are allocated and zero-filled if a frame is
/// available. Busy or Released pages are left alone. Slots that already hold
/// a page count as resolved.
///
/// Returns the number of resolved slots and [`PagerStatus::Unlock`] if the
/// `center` slot (or with `all_pages`, any wanted slot) stayed unresolved.
pub fn get_locked<F>(
    cache: &mut PageCache,
    frames: &F,
    start: u64,
    slots: &mut [PagerSlot],
    center: usize,
    flags: PagerFlags,
) -> (usize, PagerStatus)
where
    F: FrameSource + ?Sized,
{
    let mut status = PagerStatus::Ok;
    let mut resolved = 0;

    for (index, slot) in slots.iter_mut().enumerate() {
        match slot {
            PagerSlot::DontCare => continue,
            PagerSlot::Page(_) => {
                resolved += 1;
                continue;
            }
            PagerSlot::Empty => {}
        }

        let offset = slot_offset(start, index);
        let page = match cache.lookup(offset).map(|p| p.state()) {
            None => frames.alloc_frame(cache.owner(), offset).map(|frame| {
                frames.zero_frame(frame);
                cache.insert_busy(offset, frame)
            }),
            Some(PageState::Resident) => cache.busy_resident(offset),
            Some(_) => None,
        };

        if let Some(page) = page {
            *slot = PagerSlot::Page(page);
            resolved += 1;
        } else if index == center || flags.all_pages() {
            trace!("{:?}@{offset:#x}: mandatory slot unresolved", cache.owner());
            status = PagerStatus::Unlock;
        }
    }

    (resolved, status)
}

/// Blocking PagerGet.
///
/// Fills every [`Empty`](PagerSlot::Empty) slot, sleeping on the object
/// while a page is held by another thread and on the frame source while it
/// is exhausted. Consumes the object lock and returns with it released.
///
/// # Panics
/// If `guard` does not lock `object`.
pub fn get_blocking<'a, F>(
    object: &'a KernelObject,
    mut guard: ObjectGuard<'a>,
    frames: &F,
    start: u64,
    slots: &mut [PagerSlot],
) -> PagerStatus
where
    F: FrameSource + ?Sized,
{
    assert_eq!(guard.owner(), object.id(), "{}: foreign object lock", object.name());

    for (index, slot) in slots.iter_mut().enumerate() {
        if !matches!(slot, PagerSlot::Empty) {
            continue;
        }
        let offset = slot_offset(start, index);

        let page = loop {
            let state = guard.lookup(offset).map(|p| p.state());
            match state {
                None => {
                    let ticket = frames.reclaimed().ticket();
                    if let Some(frame) = frames.alloc_frame(object.id(), offset) {
                        frames.zero_frame(frame);
                        break guard.insert_busy(offset, frame);
                    }
                    warn!("{}@{offset:#x}: waiting for free frames", object.name());
                    guard = frames.reclaimed().sleep_from(ticket, guard);
                }
                Some(PageState::Resident) => {
                    if let Some(page) = guard.busy_resident(offset) {
                        break page;
                    }
                }
                Some(_) => {
                    if let Some(page) = guard.lookup_mut(offset) {
                        page.set_wanted();
                    }
                    trace!("{}@{offset:#x}: page held, sleeping", object.name());
                    guard = object.sleep_on_page(guard);
                }
            }
        };

        *slot = PagerSlot::Page(page);
    }

    drop(guard);
    PagerStatus::Ok
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::frames::BitmapFrameSource;
    use crate::object::ObjectId;

    fn setup(frames: usize) -> (KernelObject, BitmapFrameSource<crate::frames::ArenaMapper>) {
        (
            KernelObject::immortal(ObjectId::new(0), "kernel_object"),
            BitmapFrameSource::with_arena(frames),
        )
    }

    #[test]
    fn locked_mode_allocates_missing_pages() {
        let (obj, frames) = setup(4);
        let mut slots: [PagerSlot; 3] = Default::default();
        let (n, status) = get_locked(&mut obj.lock(), &frames, 0, &mut slots, 1, PagerFlags::new());
        assert_eq!((n, status), (3, PagerStatus::Ok));
        for (i, slot) in slots.iter_mut().enumerate() {
            let page = slot.take().unwrap();
            assert_eq!(page.offset(), i as u64 * PAGE_SIZE);
            assert!(frames.with_frame(page.frame(), |b| b.iter().all(|&x| x == 0)));
            let _ = obj.unbusy(page);
        }
    }

    #[test]
    fn locked_mode_reports_unlock_when_center_cannot_be_allocated() {
        let (obj, frames) = setup(1);
        let mut slots = [PagerSlot::Empty, PagerSlot::Empty];
        let (n, status) = get_locked(&mut obj.lock(), &frames, 0, &mut slots, 1, PagerFlags::new());
        assert_eq!((n, status), (1, PagerStatus::Unlock));
        assert!(slots[0].is_resolved());
        assert_eq!(slots[1], PagerSlot::Empty);
        let _ = obj.unbusy(slots[0].take().unwrap());
    }
}
