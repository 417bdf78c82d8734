mod common;

use common::{is_zeroed, machine, offset_of, wait_until};
use kernel_kmem::pager::get_blocking;
use kernel_kmem::{KmFlags, PAGE_SIZE, PageState, PagerSlot, PagerStatus, Pmap, Protection};
use std::thread;

#[test]
fn busy_page_is_released_and_resident_page_freed() {
    let km = machine(8, 64);
    let object = km.kernel_object();
    let va = km.valloc(km.kernel_map(), 2 * PAGE_SIZE).unwrap();
    let base = offset_of(va);

    let mut slots = [PagerSlot::Empty, PagerSlot::Empty];
    let status = get_blocking(object, object.lock(), km.frames(), base, &mut slots);
    assert_eq!(status, PagerStatus::Ok);
    let held = slots[0].take().unwrap();
    let second = slots[1].take().unwrap();

    let frame = km.page_unbusy(object, second).unwrap();
    km.pmap().enter(va + PAGE_SIZE, frame, Protection::READ_WRITE);
    km.pmap().enter(va, held.frame(), Protection::READ_WRITE);
    assert_eq!(km.frames().in_use(), 2);

    km.pgremove(object, base, base + 2 * PAGE_SIZE);

    assert_eq!(object.page_state(base), Some(PageState::Released));
    assert_eq!(object.page_state(base + PAGE_SIZE), None);
    assert_eq!(km.frames().owner_of(frame), None);
    assert_eq!(km.pmap().extract(va + PAGE_SIZE), None);
    assert_eq!(km.frames().in_use(), 1);

    // The holder clears Busy and ends up freeing the page.
    assert_eq!(km.page_unbusy(object, held), None);
    assert_eq!(object.page_state(base), None);
    assert_eq!(km.pmap().extract(va), None);
    assert_eq!(km.frames().in_use(), 0);
}

#[test]
fn pgremove_ignores_offsets_outside_the_range() {
    let km = machine(8, 64);
    let va = km
        .kmemalloc(km.kernel_map(), km.kmem_object(), 3 * PAGE_SIZE, KmFlags::WAIT)
        .unwrap();
    let base = offset_of(va);

    km.pgremove(km.kmem_object(), base + PAGE_SIZE, base + 2 * PAGE_SIZE);
    assert_eq!(km.kmem_object().pages(), [
        (base, PageState::Resident),
        (base + 2 * PAGE_SIZE, PageState::Resident),
    ]);
    assert_eq!(km.pmap().len(), 2);
}

#[test]
fn alloc1_waits_for_a_released_page() {
    let km = machine(8, 64);
    let object = km.kernel_object();
    let va = km.valloc(km.kernel_map(), PAGE_SIZE).unwrap();
    let offset = offset_of(va);

    let mut slots = [PagerSlot::Empty];
    let status = get_blocking(object, object.lock(), km.frames(), offset, &mut slots);
    assert_eq!(status, PagerStatus::Ok);
    let held = slots[0].take().unwrap();

    // Tear the range down while the page is still busy.
    km.free(km.kernel_map(), va, PAGE_SIZE);
    assert_eq!(object.page_state(offset), Some(PageState::Released));

    let waiter = {
        let km = km.clone();
        thread::spawn(move || km.alloc1(km.kernel_map(), PAGE_SIZE, true))
    };
    wait_until("alloc1 to wait on the released page", || object.waiters() == 1);
    assert_eq!(object.page_state(offset), Some(PageState::Released));

    assert_eq!(km.page_unbusy(object, held), None);

    let again = waiter.join().unwrap().unwrap();
    assert_eq!(again, va);
    assert_eq!(object.page_state(offset), Some(PageState::Resident));
    assert!(is_zeroed(&km, again));
    assert_eq!(km.frames().in_use(), 1);
}

#[test]
fn free_wakeup_without_waiters_is_harmless() {
    let km = machine(4, 64);
    let va = km.valloc(km.kernel_map(), 2 * PAGE_SIZE).unwrap();
    km.free_wakeup(km.kernel_map(), va, 2 * PAGE_SIZE);
    assert!(km.kernel_map().find_entry(va).is_none());
    assert_eq!(km.kernel_map().space_waiters(), 0);
}
