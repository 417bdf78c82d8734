//! Page records and their lifecycle.
//!
//! ```text
//!        alloc              unbusy
//!  Free ───────► Busy ◄──────────────► Resident
//!   ▲             │        busy           │
//!   │   pgremove  ▼                       │
//!   └──────── Released                    │
//!   ▲                                     │
//!   └─────────────────────────────────────┘
//!               pgremove (not busy)
//! ```
//!
//! Every state change goes through [`Page::transition`], which rejects any
//! edge not drawn above.

use crate::addresses::PhysicalAddress;
use crate::error::PageStateError;
use crate::object::ObjectId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    /// Not in any cache.
    Free,
    /// In a cache and usable.
    Resident,
    /// Held by one thread; everyone else waits.
    Busy,
    /// Torn down while busy; the holder frees it instead of publishing it.
    Released,
}

impl PageState {
    /// Whether `self -> to` is a legal lifecycle edge.
    #[must_use]
    pub const fn can_become(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Free | Self::Resident, Self::Busy)
                | (Self::Busy, Self::Resident | Self::Released)
                | (Self::Released | Self::Resident, Self::Free)
        )
    }

    /// Busy and Released pages must never be handed to a second thread.
    #[must_use]
    pub const fn is_held(self) -> bool {
        matches!(self, Self::Busy | Self::Released)
    }
}

/// One physical frame bound to an `(object, offset)` slot.
#[derive(Debug)]
pub struct Page {
    owner: ObjectId,
    offset: u64,
    frame: PhysicalAddress,
    state: PageState,
    wire_count: u32,
    wanted: bool,
}

impl Page {
    pub(crate) const fn new(owner: ObjectId, offset: u64, frame: PhysicalAddress) -> Self {
        Self {
            owner,
            offset,
            frame,
            state: PageState::Free,
            wire_count: 0,
            wanted: false,
        }
    }

    #[must_use]
    pub const fn owner(&self) -> ObjectId {
        self.owner
    }

    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    #[must_use]
    pub const fn frame(&self) -> PhysicalAddress {
        self.frame
    }

    #[must_use]
    pub const fn state(&self) -> PageState {
        self.state
    }

    #[must_use]
    pub const fn wire_count(&self) -> u32 {
        self.wire_count
    }

    #[must_use]
    pub const fn is_wanted(&self) -> bool {
        self.wanted
    }

    /// Moves the page to `to`.
    ///
    /// # Errors
    /// [`PageStateError`] if the edge is not part of the lifecycle; the page
    /// is left untouched.
    pub fn transition(&mut self, to: PageState) -> Result<(), PageStateError> {
        if !self.state.can_become(to) {
            return Err(PageStateError {
                offset: self.offset,
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }

    pub(crate) const fn wire(&mut self) {
        self.wire_count = 1;
    }

    pub(crate) const fn set_wanted(&mut self) {
        self.wanted = true;
    }

    pub(crate) const fn take_wanted(&mut self) -> bool {
        core::mem::replace(&mut self.wanted, false)
    }
}

/// Proof that the current thread set a page Busy.
///
/// Only the holder of this token can clear the bit, by handing it back to
/// [`KernelObject::unbusy`](crate::KernelObject::unbusy) (usually through
/// [`KernelMemory::page_unbusy`](crate::KernelMemory::page_unbusy)).
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a busy page must be handed back with page_unbusy"]
pub struct BusyPage {
    object: ObjectId,
    offset: u64,
    frame: PhysicalAddress,
    fresh: bool,
}

impl BusyPage {
    pub(crate) const fn new(object: ObjectId, offset: u64, frame: PhysicalAddress, fresh: bool) -> Self {
        Self {
            object,
            offset,
            frame,
            fresh,
        }
    }

    #[must_use]
    pub const fn object(&self) -> ObjectId {
        self.object
    }

    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    #[must_use]
    pub const fn frame(&self) -> PhysicalAddress {
        self.frame
    }

    /// Whether the page was allocated (rather than found resident) when it
    /// was busied.
    #[must_use]
    pub const fn is_fresh(&self) -> bool {
        self.fresh
    }
}

/// A page that was released while busy and now awaits disposal by its
/// former holder.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a released page must be disposed of"]
pub struct ReleasedPage {
    pub(crate) offset: u64,
    pub(crate) frame: PhysicalAddress,
}

impl ReleasedPage {
    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    #[must_use]
    pub const fn frame(&self) -> PhysicalAddress {
        self.frame
    }
}

/// Outcome of clearing Busy.
#[derive(Debug, PartialEq, Eq)]
pub enum Unbusied {
    /// The page is Resident again.
    Published(PhysicalAddress),
    /// The page was released meanwhile and must be freed.
    Released(ReleasedPage),
}

#[cfg(test)]
mod test {
    use super::*;
    use PageState::{Busy, Free, Released, Resident};

    fn page() -> Page {
        Page::new(ObjectId::new(0), 0x3000, PhysicalAddress::new(0x20_0000))
    }

    #[test]
    fn full_lifecycle() {
        let mut p = page();
        p.transition(Busy).unwrap();
        p.transition(Resident).unwrap();
        p.transition(Busy).unwrap();
        p.transition(Released).unwrap();
        p.transition(Free).unwrap();
        assert_eq!(p.state(), Free);
    }

    #[test]
    fn clearing_busy_on_resident_page_is_rejected() {
        let mut p = page();
        p.transition(Busy).unwrap();
        p.transition(Resident).unwrap();
        let err = p.transition(Resident).unwrap_err();
        assert_eq!(
            err,
            PageStateError {
                offset: 0x3000,
                from: Resident,
                to: Resident
            }
        );
        assert_eq!(p.state(), Resident);
    }

    #[test]
    fn released_page_cannot_be_republished() {
        let mut p = page();
        p.transition(Busy).unwrap();
        p.transition(Released).unwrap();
        assert!(p.transition(Resident).is_err());
        assert!(p.transition(Busy).is_err());
    }

    #[test]
    fn free_page_cannot_be_released() {
        assert!(!Free.can_become(Released));
        assert!(!Free.can_become(Resident));
        assert!(!Resident.can_become(Released));
        assert!(Busy.is_held() && Released.is_held());
        assert!(!Resident.is_held());
    }

    #[test]
    fn wanted_flag_is_consumed() {
        let mut p = page();
        p.set_wanted();
        assert!(p.is_wanted());
        assert!(p.take_wanted());
        assert!(!p.take_wanted());
    }
}
