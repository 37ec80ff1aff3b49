//! Fixed-capacity arena for control blocks, stacks and queue storage.
//!
//! The arena only does the accounting: it hands out non-overlapping
//! `[base, base + size)` spans of a pool whose capacity is fixed at
//! construction. A [`Region`] is a move-only token; giving it back through
//! [`Arena::release`] consumes it, so a region cannot be released twice.
//!
//! Allocation is first fit over an address-ordered free list, and released
//! spans are merged with their free neighbours. All state sits behind a
//! `critical_section::Mutex`, so acquire and release are safe from task and
//! interrupt context alike.
//!
//! The free list is a fixed-capacity `heapless::Vec`: acquire and release
//! never touch the heap. Free spans are never adjacent, so there is at most
//! one more of them than there are live regions. Capping live regions at
//! [`MAX_REGIONS`] therefore bounds the list, and a request past the cap
//! fails with [`AllocationFailed`] like any other shortage.

use core::cell::RefCell;
use core::sync::atomic::{AtomicU32, Ordering};

use critical_section::Mutex;

use crate::config::RtosConfig;
use crate::error::AllocationFailed;

static NEXT_ARENA_ID: AtomicU32 = AtomicU32::new(1);

/// Most regions one arena hands out at a time.
pub const MAX_REGIONS: usize = 128;

const FREE_SPANS: usize = MAX_REGIONS + 1;

/// What a region is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RegionClass {
    ControlBlock,
    General,
}

/// A span of arena memory owned by one object.
#[must_use = "a region must be released back to the arena it came from"]
#[derive(Debug, PartialEq, Eq)]
pub struct Region {
    arena: u32,
    base: usize,
    size: usize,
    class: RegionClass,
}

impl Region {
    /// Offset of the first byte inside the arena.
    pub fn base(&self) -> usize {
        self.base
    }

    /// Length in bytes, after alignment rounding.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn class(&self) -> RegionClass {
        self.class
    }

    /// One past the last byte.
    pub fn end(&self) -> usize {
        self.base + self.size
    }
}

/// Usage statistics of an [`Arena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaStats {
    /// Capacity in bytes.
    pub total: usize,
    pub free: usize,
    pub used: usize,
    /// Low-water mark of `free`.
    pub min_free: usize,
    /// Regions currently handed out.
    pub regions: usize,
    /// Requests that could not be satisfied.
    pub failures: usize,
}

impl ArenaStats {
    const fn new(total: usize) -> Self {
        Self {
            total,
            free: total,
            used: 0,
            min_free: total,
            regions: 0,
            failures: 0,
        }
    }

    fn on_acquire(&mut self, size: usize) {
        self.used += size;
        self.free -= size;
        self.regions += 1;
        if self.free < self.min_free {
            self.min_free = self.free;
        }
    }

    fn on_release(&mut self, size: usize) {
        self.used -= size;
        self.free += size;
        self.regions -= 1;
    }

    /// Used share of the capacity as a percentage (0-100).
    pub fn utilization(&self) -> u8 {
        if self.total == 0 {
            0
        } else {
            ((self.used * 100) / self.total) as u8
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for ArenaStats {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(
            fmt,
            "ArenaStats{{ total: {}, free: {}, used: {}, min_free: {} }}",
            self.total,
            self.free,
            self.used,
            self.min_free
        );
    }
}

#[derive(Debug, Clone, Copy)]
struct Span {
    base: usize,
    len: usize,
}

impl Span {
    fn end(&self) -> usize {
        self.base + self.len
    }
}

struct Pool {
    /// Free spans ordered by base, never adjacent to each other.
    free: heapless::Vec<Span, FREE_SPANS>,
    stats: ArenaStats,
}

impl Pool {
    fn new(capacity: usize) -> Self {
        let mut free = heapless::Vec::new();
        if capacity > 0 {
            let _ = free.push(Span {
                base: 0,
                len: capacity,
            });
        }
        Self {
            free,
            stats: ArenaStats::new(capacity),
        }
    }

    fn take(&mut self, size: usize) -> Option<usize> {
        if self.stats.regions >= MAX_REGIONS {
            return None;
        }
        let index = self.free.iter().position(|span| span.len >= size)?;
        let span = &mut self.free[index];
        let base = span.base;
        if span.len == size {
            self.free.remove(index);
        } else {
            span.base += size;
            span.len -= size;
        }
        self.stats.on_acquire(size);
        Some(base)
    }

    fn give(&mut self, base: usize, size: usize) {
        let index = self.free.partition_point(|span| span.base < base);
        let merges_prev = index > 0 && self.free[index - 1].end() == base;
        let merges_next = self
            .free
            .get(index)
            .is_some_and(|next| next.base == base + size);

        match (merges_prev, merges_next) {
            (true, true) => {
                let next = self.free.remove(index);
                self.free[index - 1].len += size + next.len;
            }
            (true, false) => self.free[index - 1].len += size,
            (false, true) => {
                let next = &mut self.free[index];
                next.base = base;
                next.len += size;
            }
            (false, false) => {
                if self.free.insert(index, Span { base, len: size }).is_err() {
                    // Unreachable while live regions stay under MAX_REGIONS.
                    log::error!("arena free list full; {size} bytes at {base} lost");
                    debug_assert!(false, "arena free list overflow");
                    return;
                }
            }
        }
        self.stats.on_release(size);
    }

    fn largest_free(&self) -> usize {
        self.free.iter().map(|span| span.len).max().unwrap_or(0)
    }
}

/// The static pool every wrapper object draws its memory from.
pub struct Arena {
    id: u32,
    capacity: usize,
    control_block_size: usize,
    align: usize,
    pool: Mutex<RefCell<Pool>>,
}

impl Arena {
    /// Creates an arena of `capacity` bytes.
    ///
    /// `align` is rounded up to a power of two.
    pub fn new(capacity: usize, control_block_size: usize, align: usize) -> Self {
        Self {
            id: NEXT_ARENA_ID.fetch_add(1, Ordering::Relaxed),
            capacity,
            control_block_size,
            align: align.max(1).next_power_of_two(),
            pool: Mutex::new(RefCell::new(Pool::new(capacity))),
        }
    }

    pub fn from_config(config: &RtosConfig) -> Self {
        Self::new(
            config.arena_size,
            config.control_block_size,
            config.region_align,
        )
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn control_block_size(&self) -> usize {
        self.control_block_size
    }

    /// Reserves one kernel control block.
    pub fn acquire_control_block(&self) -> Result<Region, AllocationFailed> {
        self.acquire(self.control_block_size, RegionClass::ControlBlock)
    }

    /// Reserves a stack of `bytes` bytes.
    pub fn acquire_stack(&self, bytes: usize) -> Result<Region, AllocationFailed> {
        self.acquire(bytes, RegionClass::General)
    }

    /// Reserves `bytes` bytes of general storage, such as queue item slots.
    pub fn acquire_bytes(&self, bytes: usize) -> Result<Region, AllocationFailed> {
        self.acquire(bytes, RegionClass::General)
    }

    /// Returns a region to the pool.
    ///
    /// A region that belongs to another arena is refused and leaked.
    pub fn release(&self, region: Region) {
        if region.arena != self.id {
            log::error!(
                "region {}+{} released to arena {} but belongs to arena {}",
                region.base,
                region.size,
                self.id,
                region.arena
            );
            debug_assert!(false, "region released to a foreign arena");
            return;
        }
        critical_section::with(|cs| {
            self.pool
                .borrow_ref_mut(cs)
                .give(region.base, region.size)
        });
    }

    pub fn stats(&self) -> ArenaStats {
        critical_section::with(|cs| self.pool.borrow_ref(cs).stats)
    }

    fn acquire(&self, bytes: usize, class: RegionClass) -> Result<Region, AllocationFailed> {
        let size = match align_up(bytes, self.align) {
            Some(size) if size > 0 => size,
            _ => {
                return Err(self.fail(bytes));
            }
        };

        let base = critical_section::with(|cs| self.pool.borrow_ref_mut(cs).take(size));
        match base {
            Some(base) => Ok(Region {
                arena: self.id,
                base,
                size,
                class,
            }),
            None => Err(self.fail(size)),
        }
    }

    fn fail(&self, requested: usize) -> AllocationFailed {
        let largest_free = critical_section::with(|cs| {
            let mut pool = self.pool.borrow_ref_mut(cs);
            pool.stats.failures += 1;
            pool.largest_free()
        });
        log::warn!(
            "arena {}: cannot reserve {} bytes (largest free span {})",
            self.id,
            requested,
            largest_free
        );
        AllocationFailed {
            requested,
            largest_free,
        }
    }
}

fn align_up(value: usize, align: usize) -> Option<usize> {
    value
        .checked_add(align - 1)
        .map(|v| v & !(align - 1))
}
