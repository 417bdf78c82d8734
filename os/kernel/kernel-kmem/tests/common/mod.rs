#![allow(dead_code)]

use kernel_kmem::{
    ArenaMapper, BitmapFrameSource, KernelMemory, KmConfig, PAGE_SIZE, SoftPmap, VirtualAddress,
};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

pub type Frames = BitmapFrameSource<ArenaMapper>;
pub type Km = KernelMemory<Frames, SoftPmap>;

pub const VM_MIN: VirtualAddress = VirtualAddress::new(0xffff_c000_0000_0000);

/// Pages at the bottom of the kernel map taken by the bootstrap region.
pub const BOOT_PAGES: u64 = 4;

/// A kernel with `frames` physical frames and a map of `map_pages` pages.
pub fn machine(frames: usize, map_pages: u64) -> Arc<Km> {
    let config = KmConfig::new(
        VM_MIN,
        VM_MIN + map_pages * PAGE_SIZE,
        VM_MIN + BOOT_PAGES * PAGE_SIZE,
    );
    let km = KernelMemory::bootstrap(
        config,
        BitmapFrameSource::with_arena(frames),
        Arc::new(SoftPmap::new()),
    )
    .expect("valid layout");
    Arc::new(km)
}

/// First address handed out by a fresh machine.
pub fn first_free() -> VirtualAddress {
    VM_MIN + BOOT_PAGES * PAGE_SIZE
}

/// Object offset of a kernel virtual address.
pub fn offset_of(va: VirtualAddress) -> u64 {
    va - VM_MIN
}

/// Spins until `cond` holds; fails the test after a generous deadline.
pub fn wait_until(what: &str, cond: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::yield_now();
    }
}

pub fn is_zeroed(km: &Km, va: VirtualAddress) -> bool {
    let pa = km.pmap().translation(va).expect("mapped").0;
    km.frames().with_frame(pa, |bytes| bytes.iter().all(|&b| b == 0))
}
