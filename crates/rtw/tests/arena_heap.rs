//! Acquiring and releasing arena regions never touches the heap.

use std::alloc::{GlobalAlloc, Layout, System};
use std::cell::Cell;
use std::sync::atomic::{AtomicUsize, Ordering};

use rtw::Arena;

struct CountingAlloc;

static ALLOCATIONS: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    static COUNTING: Cell<bool> = const { Cell::new(false) };
}

unsafe impl GlobalAlloc for CountingAlloc {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if COUNTING.with(Cell::get) {
            ALLOCATIONS.fetch_add(1, Ordering::SeqCst);
        }
        System.alloc(layout)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        System.dealloc(ptr, layout)
    }
}

#[global_allocator]
static GLOBAL: CountingAlloc = CountingAlloc;

fn counted<R>(f: impl FnOnce() -> R) -> (R, usize) {
    let before = ALLOCATIONS.load(Ordering::SeqCst);
    COUNTING.with(|c| c.set(true));
    let result = f();
    COUNTING.with(|c| c.set(false));
    (result, ALLOCATIONS.load(Ordering::SeqCst) - before)
}

#[test]
fn fragmenting_acquire_and_release_stay_off_the_heap() {
    let arena = Arena::new(64 * 48, 64, 8);
    let mut regions = Vec::with_capacity(40);
    let mut kept = Vec::with_capacity(20);

    // Warm up the critical-section implementation outside the count.
    let warm = arena.acquire_bytes(64).unwrap();
    arena.release(warm);

    let ((), allocations) = counted(|| {
        for _ in 0..40 {
            if let Ok(region) = arena.acquire_bytes(64) {
                regions.push(region);
            }
        }
        for (i, region) in regions.drain(..).enumerate() {
            if i % 2 == 0 {
                arena.release(region);
            } else {
                kept.push(region);
            }
        }
    });

    assert_eq!(allocations, 0);
    assert_eq!(kept.len(), 20);
    assert_eq!(arena.stats().regions, 20);
    for region in kept {
        arena.release(region);
    }
    assert_eq!(arena.stats().used, 0);
}
