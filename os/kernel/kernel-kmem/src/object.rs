//! Kernel objects: offset-keyed page caches shared by the allocators and the
//! fault path.

use crate::addresses::PhysicalAddress;
use crate::page::{BusyPage, Page, PageState, ReleasedPage, Unbusied};
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::fmt;
use core::ops::Range;
use kernel_sync::{SpinMutex, SpinMutexGuard, WaitChannel};
use log::trace;

/// Identity of a kernel object; also the owner key given to the frame source.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId(u32);

impl ObjectId {
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obj#{}", self.0)
    }
}

/// How long a kernel object lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifetime {
    /// Created at bootstrap, never destroyed.
    Immortal,
}

/// Pages of one object, keyed by byte offset.
pub struct PageCache {
    owner: ObjectId,
    pages: BTreeMap<u64, Page>,
}

impl PageCache {
    const fn new(owner: ObjectId) -> Self {
        Self {
            owner,
            pages: BTreeMap::new(),
        }
    }

    #[must_use]
    pub const fn owner(&self) -> ObjectId {
        self.owner
    }

    #[must_use]
    pub fn lookup(&self, offset: u64) -> Option<&Page> {
        self.pages.get(&offset)
    }

    pub fn lookup_mut(&mut self, offset: u64) -> Option<&mut Page> {
        self.pages.get_mut(&offset)
    }

    /// Number of pages currently held by the cache, in any state.
    #[must_use]
    pub fn resident_count(&self) -> usize {
        self.pages.len()
    }

    /// Offsets of the pages inside `range`, in increasing order.
    #[must_use]
    pub fn offsets_in(&self, range: Range<u64>) -> Vec<u64> {
        self.pages.range(range).map(|(&off, _)| off).collect()
    }

    /// Inserts a new page for `frame` at `offset` and marks it Busy.
    ///
    /// # Panics
    /// If the slot is already occupied.
    pub(crate) fn insert_busy(&mut self, offset: u64, frame: PhysicalAddress) -> BusyPage {
        let mut page = Page::new(self.owner, offset, frame);
        Self::expect_transition(&mut page, PageState::Busy);
        page.wire();
        let previous = self.pages.insert(offset, page);
        assert!(
            previous.is_none(),
            "{:?}: page slot {offset:#x} already occupied",
            self.owner
        );
        trace!("{:?}@{offset:#x}: new busy page {frame}", self.owner);
        BusyPage::new(self.owner, offset, frame, true)
    }

    /// Marks the Resident page at `offset` Busy.
    ///
    /// Returns `None` if there is no page or it is already held.
    ///
    /// # Panics
    /// If the page is Resident but not wired exactly once.
    pub(crate) fn busy_resident(&mut self, offset: u64) -> Option<BusyPage> {
        let owner = self.owner;
        let page = self.pages.get_mut(&offset)?;
        if page.state() != PageState::Resident {
            return None;
        }
        Self::expect_wired(page);
        Self::expect_transition(page, PageState::Busy);
        trace!("{owner:?}@{offset:#x}: busied resident page");
        Some(BusyPage::new(owner, offset, page.frame(), false))
    }

    /// Removes a page that is not held by anyone.
    pub(crate) fn remove_resident(&mut self, offset: u64) -> Option<PhysicalAddress> {
        let page = self.pages.get_mut(&offset)?;
        if page.state() != PageState::Resident {
            return None;
        }
        Self::expect_wired(page);
        Self::expect_transition(page, PageState::Free);
        self.pages.remove(&offset).map(|p| p.frame())
    }

    /// Flags a Busy page as Released.
    pub(crate) fn release_busy(&mut self, offset: u64) -> bool {
        match self.pages.get_mut(&offset) {
            Some(page) if page.state() == PageState::Busy => {
                Self::expect_transition(page, PageState::Released);
                true
            }
            _ => false,
        }
    }

    // Kernel pages are wired once when they enter the cache and never shared.
    fn expect_wired(page: &Page) {
        assert!(
            page.wire_count() == 1,
            "{:?}@{:#x}: resident page with wire count {}",
            page.owner(),
            page.offset(),
            page.wire_count()
        );
    }

    fn expect_transition(page: &mut Page, to: PageState) {
        if let Err(e) = page.transition(to) {
            panic!("{:?}: {e}", page.owner());
        }
    }
}

pub type ObjectGuard<'a> = SpinMutexGuard<'a, PageCache>;

/// A kernel object: a page cache behind its own lock.
pub struct KernelObject {
    id: ObjectId,
    name: &'static str,
    lifetime: Lifetime,
    cache: SpinMutex<PageCache>,
    page_wanted: WaitChannel,
}

impl fmt::Debug for KernelObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelObject")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("lifetime", &self.lifetime)
            .finish_non_exhaustive()
    }
}

impl KernelObject {
    #[must_use]
    pub const fn immortal(id: ObjectId, name: &'static str) -> Self {
        Self {
            id,
            name,
            lifetime: Lifetime::Immortal,
            cache: SpinMutex::new(PageCache::new(id)),
            page_wanted: WaitChannel::new(),
        }
    }

    #[must_use]
    pub const fn id(&self) -> ObjectId {
        self.id
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub const fn lifetime(&self) -> Lifetime {
        self.lifetime
    }

    pub fn lock(&self) -> ObjectGuard<'_> {
        self.cache.lock()
    }

    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.cache.is_locked()
    }

    /// Drops `guard`, sleeps until some page of this object changes hands,
    /// and locks again. The caller re-checks whatever it was waiting for.
    pub fn sleep_on_page<'a>(&'a self, guard: ObjectGuard<'a>) -> ObjectGuard<'a> {
        self.page_wanted.sleep(guard)
    }

    /// Clears Busy on the page `busy` refers to.
    ///
    /// # Panics
    /// If the token belongs to another object or its page is neither Busy
    /// nor Released.
    pub fn unbusy(&self, busy: BusyPage) -> Unbusied {
        assert_eq!(busy.object(), self.id, "{}: foreign busy page", self.name);
        let offset = busy.offset();

        let mut cache = self.lock();
        let Some(page) = cache.lookup_mut(offset) else {
            panic!("{}@{offset:#x}: busy page vanished", self.name);
        };

        let outcome = match page.state() {
            PageState::Released => Unbusied::Released(ReleasedPage {
                offset,
                frame: page.frame(),
            }),
            _ => {
                PageCache::expect_transition(page, PageState::Resident);
                Unbusied::Published(page.frame())
            }
        };
        let wake = page.take_wanted();
        drop(cache);

        if wake {
            self.page_wanted.wake_all();
        }
        outcome
    }

    /// Drops a released page from the cache and returns its frame.
    ///
    /// Waiters on the slot are woken; they will find it empty.
    pub fn dispose(&self, released: ReleasedPage) -> PhysicalAddress {
        let mut cache = self.lock();
        let Some(page) = cache.lookup_mut(released.offset) else {
            panic!("{}@{:#x}: released page vanished", self.name, released.offset);
        };
        PageCache::expect_transition(page, PageState::Free);
        cache.pages.remove(&released.offset);
        drop(cache);

        trace!("{}@{:#x}: released page disposed", self.name, released.offset);
        self.page_wanted.wake_all();
        released.frame
    }

    /// State of the page at `offset`, if the cache holds one.
    #[must_use]
    pub fn page_state(&self, offset: u64) -> Option<PageState> {
        self.lock().lookup(offset).map(Page::state)
    }

    #[must_use]
    pub fn resident_count(&self) -> usize {
        self.lock().resident_count()
    }

    /// Snapshot of `(offset, state)` for every cached page.
    #[must_use]
    pub fn pages(&self) -> Vec<(u64, PageState)> {
        self.lock()
            .pages
            .iter()
            .map(|(&off, p)| (off, p.state()))
            .collect()
    }

    /// Threads currently sleeping on a page of this object.
    #[must_use]
    pub fn waiters(&self) -> usize {
        self.page_wanted.sleepers()
    }
}
