//! Address spaces: ordered interval maps of reserved kernel virtual ranges.

use crate::addresses::{PAGE_SIZE, Size4K, VirtualAddress};
use crate::error::KmError;
use crate::flags::MapFlags;
use crate::object::KernelObject;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use kernel_sync::{SpinMutex, SpinMutexGuard, SyncOnceCell, WaitChannel};
use log::{debug, trace};

/// What a reserved range is backed by.
pub enum Backing<P> {
    /// Nothing; the range is just kept out of circulation.
    Hole,
    /// Pages of a kernel object, starting at the entry's offset.
    Object(Arc<KernelObject>),
    /// A child address space that manages the range itself.
    Submap(Arc<AddressSpace<P>>),
}

impl<P> Clone for Backing<P> {
    fn clone(&self) -> Self {
        match self {
            Self::Hole => Self::Hole,
            Self::Object(o) => Self::Object(o.clone()),
            Self::Submap(m) => Self::Submap(m.clone()),
        }
    }
}

impl<P> fmt::Debug for Backing<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hole => f.write_str("Hole"),
            Self::Object(o) => write!(f, "Object({})", o.name()),
            Self::Submap(m) => write!(f, "Submap({})", m.name()),
        }
    }
}

/// A reserved range `[start, end)`.
pub struct MapEntry<P> {
    pub start: VirtualAddress,
    pub end: VirtualAddress,
    pub backing: Backing<P>,
    /// Object offset of `start`; zero unless object backed.
    pub offset: u64,
}

impl<P> Clone for MapEntry<P> {
    fn clone(&self) -> Self {
        Self {
            start: self.start,
            end: self.end,
            backing: self.backing.clone(),
            offset: self.offset,
        }
    }
}

impl<P> fmt::Debug for MapEntry<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {}) {:?} @{:#x}",
            self.start, self.end, self.backing, self.offset
        )
    }
}

impl<P> MapEntry<P> {
    #[must_use]
    pub fn size(&self) -> u64 {
        self.end - self.start
    }

    const fn contains(&self, va: VirtualAddress) -> bool {
        self.start.as_u64() <= va.as_u64() && va.as_u64() < self.end.as_u64()
    }

    /// Moves `start` up to `to`, keeping the object offset in step.
    fn advance(&mut self, to: VirtualAddress) {
        if matches!(self.backing, Backing::Object(_)) {
            self.offset += to - self.start;
        }
        self.start = to;
    }
}

/// A run of object pages covered by part of a range.
#[derive(Debug)]
pub struct ObjectSpan {
    pub object: Arc<KernelObject>,
    pub start: u64,
    pub end: u64,
}

struct MapState<P> {
    configured: bool,
    min: VirtualAddress,
    max: VirtualAddress,
    /// Address that object offsets are measured from.
    object_base: VirtualAddress,
    entries: BTreeMap<VirtualAddress, MapEntry<P>>,
}

impl<P> MapState<P> {
    fn is_free(&self, start: VirtualAddress, end: VirtualAddress) -> bool {
        if start < self.min || end > self.max || start >= end {
            return false;
        }
        let before = self.entries.range(..end).next_back();
        before.is_none_or(|(_, e)| e.end <= start)
    }

    fn first_fit(&self, from: VirtualAddress, size: u64) -> Option<VirtualAddress> {
        let mut cursor = from.max(self.min);
        if let Some((_, e)) = self.entries.range(..=cursor).next_back() {
            cursor = cursor.max(e.end);
        }
        for e in self.entries.range(cursor..).map(|(_, e)| e) {
            if cursor.checked_add(size)? <= e.start {
                break;
            }
            cursor = cursor.max(e.end);
        }
        let end = cursor.checked_add(size)?;
        (end <= self.max).then_some(cursor)
    }

    /// Removes `[start, end)` from every overlapping entry, splitting entries
    /// that straddle either boundary. Returns the removed pieces.
    fn punch(&mut self, start: VirtualAddress, end: VirtualAddress) -> Vec<MapEntry<P>> {
        let keys: Vec<VirtualAddress> = self
            .entries
            .range(..end)
            .rev()
            .take_while(|(_, e)| e.end > start)
            .map(|(&k, _)| k)
            .collect();

        let mut removed = Vec::with_capacity(keys.len());
        for key in keys.into_iter().rev() {
            let Some(entry) = self.entries.remove(&key) else {
                continue;
            };
            if entry.start < start {
                let mut left = entry.clone();
                left.end = start;
                self.entries.insert(left.start, left);
            }
            if entry.end > end {
                let mut right = entry.clone();
                right.advance(end);
                self.entries.insert(right.start, right);
            }
            let mut middle = entry;
            middle.advance(start.max(middle.start));
            middle.end = middle.end.min(end);
            removed.push(middle);
        }
        removed
    }
}

/// A kernel address space, top level or submap.
pub struct AddressSpace<P> {
    name: &'static str,
    state: SpinMutex<MapState<P>>,
    pmap: SyncOnceCell<Arc<P>>,
    space_wanted: WaitChannel,
}

impl<P> fmt::Debug for AddressSpace<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("AddressSpace")
            .field("name", &self.name)
            .field("min", &state.min)
            .field("max", &state.max)
            .field("entries", &state.entries.values().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl<P> AddressSpace<P> {
    /// Creates an address space over `[min, max)` using translation root
    /// `pmap`. Object offsets are measured from `object_base`.
    ///
    /// # Panics
    /// If the bounds are unaligned or empty.
    #[must_use]
    pub fn new(
        name: &'static str,
        min: VirtualAddress,
        max: VirtualAddress,
        object_base: VirtualAddress,
        pmap: Arc<P>,
    ) -> Self {
        let map = Self::placeholder(name);
        map.setup(min, max, object_base, pmap);
        map
    }

    /// An address space that is not usable until [`setup`](Self::setup).
    ///
    /// Lets a caller own the storage of a submap that
    /// [`suballoc`](crate::KernelMemory::suballoc) initializes in place.
    #[must_use]
    pub const fn placeholder(name: &'static str) -> Self {
        Self {
            name,
            state: SpinMutex::new(MapState {
                configured: false,
                min: VirtualAddress::new(0),
                max: VirtualAddress::new(0),
                object_base: VirtualAddress::new(0),
                entries: BTreeMap::new(),
            }),
            pmap: SyncOnceCell::new(),
            space_wanted: WaitChannel::new(),
        }
    }

    /// Initializes the bounds and translation root.
    ///
    /// # Panics
    /// If the address space was already set up, or the bounds are unaligned
    /// or empty.
    pub fn setup(
        &self,
        min: VirtualAddress,
        max: VirtualAddress,
        object_base: VirtualAddress,
        pmap: Arc<P>,
    ) {
        assert!(
            min.is_aligned::<Size4K>() && max.is_aligned::<Size4K>() && min < max,
            "{}: bad bounds [{min}, {max})",
            self.name
        );

        let mut state = self.state.lock();
        assert!(!state.configured, "{}: already set up", self.name);
        state.configured = true;
        state.min = min;
        state.max = max;
        state.object_base = object_base;
        drop(state);

        if self.pmap.set(pmap).is_err() {
            panic!("{}: translation root already set", self.name);
        }
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// The translation root shared by this space and its submaps.
    ///
    /// # Panics
    /// If the address space has not been set up.
    #[must_use]
    pub fn pmap(&self) -> &Arc<P> {
        match self.pmap.get() {
            Some(pmap) => pmap,
            None => panic!("{}: used before setup", self.name),
        }
    }

    /// `[min, max)` managed by this space.
    #[must_use]
    pub fn bounds(&self) -> (VirtualAddress, VirtualAddress) {
        let state = self.state.lock();
        (state.min, state.max)
    }

    #[must_use]
    pub fn total_span(&self) -> u64 {
        let (min, max) = self.bounds();
        max - min
    }

    #[must_use]
    pub fn object_base(&self) -> VirtualAddress {
        self.state.lock().object_base
    }

    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.state.is_locked()
    }

    fn lock_state(&self, flags: MapFlags) -> Result<SpinMutexGuard<'_, MapState<P>>, KmError> {
        let state = if flags.try_lock() {
            self.state.try_lock().ok_or(KmError::WouldBlock)?
        } else {
            self.state.lock()
        };
        assert!(state.configured, "{}: used before setup", self.name);
        Ok(state)
    }

    /// Reserves `size` bytes backed by `backing`.
    ///
    /// Without `fixed` the first free range at or above `hint` is taken,
    /// falling back to a search from the bottom of the space; with `fixed`
    /// the range must start exactly at `hint`.
    ///
    /// # Errors
    /// - [`KmError::InvalidSize`] if `size` is zero or not page aligned.
    /// - [`KmError::NoSpace`] if no suitable range is free.
    /// - [`KmError::WouldBlock`] if `try_lock` was requested and the map is
    ///   locked.
    pub fn reserve(
        &self,
        size: u64,
        backing: Backing<P>,
        hint: VirtualAddress,
        flags: MapFlags,
    ) -> Result<VirtualAddress, KmError> {
        if size == 0 || size % PAGE_SIZE != 0 {
            return Err(KmError::InvalidSize { size });
        }

        let mut state = self.lock_state(flags)?;
        let start = if flags.fixed() {
            let end = hint.checked_add(size).ok_or(KmError::NoSpace { size })?;
            (hint.is_aligned::<Size4K>() && state.is_free(hint, end)).then_some(hint)
        } else {
            let from = hint.align_down::<Size4K>().max(state.min);
            state
                .first_fit(from, size)
                .or_else(|| (from > state.min).then(|| state.first_fit(state.min, size))?)
        };

        let Some(start) = start else {
            drop(state);
            debug!("{}: no space for {size:#x} bytes", self.name);
            return Err(KmError::NoSpace { size });
        };

        let offset = match backing {
            Backing::Object(_) => start - state.object_base,
            _ => 0,
        };
        let entry = MapEntry {
            start,
            end: start + size,
            backing,
            offset,
        };
        trace!("{}: reserved {entry:?}", self.name);
        state.entries.insert(start, entry);
        Ok(start)
    }

    /// Object page runs covered by `[start, end)`.
    #[must_use]
    pub fn object_spans(&self, start: VirtualAddress, end: VirtualAddress) -> Vec<ObjectSpan> {
        let state = self.state.lock();
        state
            .entries
            .range(..end)
            .rev()
            .take_while(|(_, e)| e.end > start)
            .filter_map(|(_, e)| match &e.backing {
                Backing::Object(object) => {
                    let from = start.max(e.start);
                    let to = end.min(e.end);
                    Some(ObjectSpan {
                        object: object.clone(),
                        start: e.offset + (from - e.start),
                        end: e.offset + (to - e.start),
                    })
                }
                _ => None,
            })
            .collect()
    }

    /// Releases every reservation inside `[start, end)`, clipping entries
    /// that extend past either end. Returns the number of bytes released.
    ///
    /// # Panics
    /// If the range is not page aligned.
    pub fn release(&self, start: VirtualAddress, end: VirtualAddress) -> u64 {
        assert!(
            start.is_aligned::<Size4K>() && end.is_aligned::<Size4K>(),
            "{}: unaligned release [{start}, {end})",
            self.name
        );
        let removed = self.state.lock().punch(start, end);
        let bytes = removed.iter().map(MapEntry::size).sum();
        trace!("{}: released {bytes:#x} bytes at {start}", self.name);
        bytes
    }

    /// Entry covering `va`, if any.
    #[must_use]
    pub fn find_entry(&self, va: VirtualAddress) -> Option<MapEntry<P>> {
        let state = self.state.lock();
        state
            .entries
            .range(..=va)
            .next_back()
            .map(|(_, e)| e)
            .filter(|e| e.contains(va))
            .cloned()
    }

    /// Resolves `va` to the kernel object page backing it, descending into
    /// submaps.
    ///
    /// # Errors
    /// [`KmError::NotMapped`] if `va` is unreserved or lies in a hole.
    pub fn lookup(&self, va: VirtualAddress) -> Result<(Arc<KernelObject>, u64), KmError> {
        let entry = self
            .find_entry(va)
            .ok_or(KmError::NotMapped { address: va })?;
        match entry.backing {
            Backing::Object(object) => {
                let offset = entry.offset + (va.align_down::<Size4K>() - entry.start);
                Ok((object, offset))
            }
            Backing::Submap(child) => child.lookup(va),
            Backing::Hole => Err(KmError::NotMapped { address: va }),
        }
    }

    /// Hands the hole `[start, end)` over to `child`.
    ///
    /// # Errors
    /// [`KmError::NotMapped`] if no hole entry spans exactly that range.
    pub fn register_submap(
        &self,
        start: VirtualAddress,
        end: VirtualAddress,
        child: Arc<Self>,
    ) -> Result<(), KmError> {
        let mut state = self.state.lock();
        match state.entries.get_mut(&start) {
            Some(entry) if entry.end == end && matches!(entry.backing, Backing::Hole) => {
                entry.backing = Backing::Submap(child);
                Ok(())
            }
            _ => Err(KmError::NotMapped { address: start }),
        }
    }

    /// Snapshot of all reservations, in address order.
    #[must_use]
    pub fn entries(&self) -> Vec<MapEntry<P>> {
        self.state.lock().entries.values().cloned().collect()
    }

    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Bytes currently reserved.
    #[must_use]
    pub fn reserved_bytes(&self) -> u64 {
        self.state.lock().entries.values().map(MapEntry::size).sum()
    }

    /// Channel woken when space is returned by
    /// [`free_wakeup`](crate::KernelMemory::free_wakeup).
    #[must_use]
    pub const fn space_wanted(&self) -> &WaitChannel {
        &self.space_wanted
    }

    #[must_use]
    pub fn space_waiters(&self) -> usize {
        self.space_wanted.sleepers()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::object::ObjectId;

    struct NoPmap;

    const MIN: VirtualAddress = VirtualAddress::new(0x4000_0000);

    fn map(pages: u64) -> AddressSpace<NoPmap> {
        AddressSpace::new("test", MIN, MIN + pages * PAGE_SIZE, MIN, Arc::new(NoPmap))
    }

    fn object() -> Backing<NoPmap> {
        Backing::Object(Arc::new(KernelObject::immortal(ObjectId::new(0), "obj")))
    }

    #[test]
    fn first_fit_fills_gaps() {
        let m = map(8);
        let a = m.reserve(2 * PAGE_SIZE, Backing::Hole, MIN, MapFlags::new()).unwrap();
        let b = m.reserve(PAGE_SIZE, Backing::Hole, MIN, MapFlags::new()).unwrap();
        assert_eq!(a, MIN);
        assert_eq!(b, MIN + 2 * PAGE_SIZE);

        assert_eq!(m.release(a, a + 2 * PAGE_SIZE), 2 * PAGE_SIZE);
        let c = m.reserve(PAGE_SIZE, Backing::Hole, MIN, MapFlags::new()).unwrap();
        assert_eq!(c, MIN);
    }

    #[test]
    fn hint_is_preferred_then_falls_back() {
        let m = map(4);
        let hint = MIN + 3 * PAGE_SIZE;
        assert_eq!(m.reserve(PAGE_SIZE, Backing::Hole, hint, MapFlags::new()), Ok(hint));
        assert_eq!(m.reserve(PAGE_SIZE, Backing::Hole, hint, MapFlags::new()), Ok(MIN));
    }

    #[test]
    fn fixed_reservation_needs_a_free_range() {
        let m = map(4);
        let fixed = MapFlags::new().with_fixed(true);
        let at = MIN + PAGE_SIZE;
        assert_eq!(m.reserve(2 * PAGE_SIZE, Backing::Hole, at, fixed), Ok(at));
        assert_eq!(
            m.reserve(PAGE_SIZE, Backing::Hole, MIN + 2 * PAGE_SIZE, fixed),
            Err(KmError::NoSpace { size: PAGE_SIZE })
        );
        assert_eq!(
            m.reserve(2 * PAGE_SIZE, Backing::Hole, MIN + 3 * PAGE_SIZE, fixed),
            Err(KmError::NoSpace { size: 2 * PAGE_SIZE })
        );
    }

    #[test]
    fn rejects_bad_sizes_and_exhaustion() {
        let m = map(2);
        assert_eq!(
            m.reserve(0, Backing::Hole, MIN, MapFlags::new()),
            Err(KmError::InvalidSize { size: 0 })
        );
        assert_eq!(
            m.reserve(100, Backing::Hole, MIN, MapFlags::new()),
            Err(KmError::InvalidSize { size: 100 })
        );
        assert_eq!(
            m.reserve(3 * PAGE_SIZE, Backing::Hole, MIN, MapFlags::new()),
            Err(KmError::NoSpace { size: 3 * PAGE_SIZE })
        );
    }

    #[test]
    fn try_lock_reports_contention() {
        let m = map(2);
        let _held = m.state.lock();
        assert_eq!(
            m.reserve(PAGE_SIZE, Backing::Hole, MIN, MapFlags::new().with_try_lock(true)),
            Err(KmError::WouldBlock)
        );
    }

    #[test]
    fn object_offsets_follow_addresses_through_clipping() {
        let m = map(8);
        let va = m.reserve(4 * PAGE_SIZE, object(), MIN + PAGE_SIZE, MapFlags::new()).unwrap();
        assert_eq!(va, MIN + PAGE_SIZE);

        let (_, offset) = m.lookup(va + 2 * PAGE_SIZE + 17).unwrap();
        assert_eq!(offset, 3 * PAGE_SIZE);

        // Punch out the middle two pages.
        assert_eq!(m.release(va + PAGE_SIZE, va + 3 * PAGE_SIZE), 2 * PAGE_SIZE);
        let entries = m.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].offset, PAGE_SIZE);
        assert_eq!(entries[1].start, va + 3 * PAGE_SIZE);
        assert_eq!(entries[1].offset, 4 * PAGE_SIZE);
        assert!(m.lookup(va + PAGE_SIZE).is_err());

        let spans = m.object_spans(MIN, MIN + 8 * PAGE_SIZE);
        let mut ranges: Vec<_> = spans.iter().map(|s| (s.start, s.end)).collect();
        ranges.sort_unstable();
        assert_eq!(
            ranges,
            [(PAGE_SIZE, 2 * PAGE_SIZE), (4 * PAGE_SIZE, 5 * PAGE_SIZE)]
        );
    }

    #[test]
    fn holes_are_not_mapped() {
        let m = map(2);
        let va = m.reserve(PAGE_SIZE, Backing::Hole, MIN, MapFlags::new()).unwrap();
        assert_eq!(m.lookup(va).err(), Some(KmError::NotMapped { address: va }));
        assert_eq!(
            m.lookup(MIN + PAGE_SIZE).err(),
            Some(KmError::NotMapped {
                address: MIN + PAGE_SIZE
            })
        );
    }

    #[test]
    #[should_panic(expected = "already set up")]
    fn setup_twice_panics() {
        let m = map(2);
        m.setup(MIN, MIN + PAGE_SIZE, MIN, Arc::new(NoPmap));
    }
}
