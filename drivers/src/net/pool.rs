//! Pre-allocated packet buffer pools with lock-free allocation.
//!
//! Provides O(1) alloc/release from any context (including interrupts) via
//! a Treiber stack with ABA-safe tagged pointers.  The backing storage for
//! each size class is a static array in BSS, 64-byte aligned for
//! cache-line friendliness.
//!
//! # Design rationale
//!
//! Linux uses `kmem_cache` (slab) for `sk_buff` allocation because per-packet
//! `kmalloc` is too slow and causes heap fragmentation under load.  A fixed pool
//! gives O(1) alloc/free, predictable memory usage, and cache-friendly layout.
//! The lock-free Treiber stack avoids disabling interrupts on the alloc/release
//! hot path, using a version-tagged CAS to prevent ABA races.
//!
//! # Size classes
//!
//! Three classes cover the packet sizes this stack actually produces: small
//! control packets (ARP, bare ACKs), MTU-1500 Ethernet frames, and jumbo
//! frames.  `alloc_for_size` rounds a requested capacity up to the smallest
//! class that fits; a class whose freelist is empty falls through to the
//! heap and is tagged so `release` knows not to return it to a freelist.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, AtomicU8, AtomicUsize, Ordering};

/// Cache-line alignment for each slot (documentation constant).
pub const CACHE_LINE_ALIGN: usize = 64;

/// Sentinel value: end of freelist / pool exhausted.
const FREELIST_EMPTY: u16 = u16::MAX;

/// Small control-packet class: ARP requests/replies, bare TCP ACKs.
pub const SMALL_BUF_SIZE: usize = 256;
pub const SMALL_POOL_SLOTS: usize = 512;

/// Standard Ethernet-MTU class (1500 payload + headers + headroom).
pub const MEDIUM_BUF_SIZE: usize = 2048;
pub const MEDIUM_POOL_SLOTS: usize = 256;

/// Jumbo-frame class.
pub const LARGE_BUF_SIZE: usize = 9216;
pub const LARGE_POOL_SLOTS: usize = 32;

/// A lock-free fixed-size packet buffer pool (one size class).
///
/// Uses a Treiber stack (atomic CAS on a tagged head pointer) for O(1)
/// allocation and deallocation from any context, including interrupt handlers.
///
/// The head is a packed `u32`: bits `[15:0]` = slot index (or [`FREELIST_EMPTY`]),
/// bits `[31:16]` = version counter (ABA prevention).  The version wraps at
/// 65 536 which is sufficient for a hobby OS.
pub struct PacketPoolClass<const BUF_SIZE: usize, const POOL_SIZE: usize> {
    /// Tagged head pointer: `(version << 16) | index`.
    head: AtomicU32,
    /// Per-slot next-free pointer, forming the intrusive freelist.
    next: [AtomicU16; POOL_SIZE],
    /// Per-slot reference count. 0 means the slot is on the freelist.
    refcount: [AtomicU8; POOL_SIZE],
    /// Number of currently available (free) slots.
    count: AtomicUsize,
    /// Count of allocations that missed this class and fell back to heap.
    misses: AtomicUsize,
    /// Whether [`init`](PacketPoolClass::init) has been called.
    initialized: AtomicBool,
    storage: PoolStorage<BUF_SIZE, POOL_SIZE>,
}

#[repr(C, align(64))]
struct PoolStorage<const BUF_SIZE: usize, const POOL_SIZE: usize> {
    slots: UnsafeCell<[[u8; BUF_SIZE]; POOL_SIZE]>,
}

// SAFETY: Slot access is serialized by the pool ownership model. A slot with
// refcount > 0 is never mutated by more than one owner at a time; the shared
// (cloned) case only permits read-only access by construction in PacketBuf.
unsafe impl<const B: usize, const P: usize> Sync for PoolStorage<B, P> {}

// SAFETY: All fields use atomic types — no unsynchronized shared mutation.
unsafe impl<const B: usize, const P: usize> Send for PacketPoolClass<B, P> {}
unsafe impl<const B: usize, const P: usize> Sync for PacketPoolClass<B, P> {}

impl<const BUF_SIZE: usize, const POOL_SIZE: usize> PacketPoolClass<BUF_SIZE, POOL_SIZE> {
    const fn new() -> Self {
        PacketPoolClass {
            head: AtomicU32::new(FREELIST_EMPTY as u32),
            next: [const { AtomicU16::new(0) }; POOL_SIZE],
            refcount: [const { AtomicU8::new(0) }; POOL_SIZE],
            count: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
            initialized: AtomicBool::new(false),
            storage: PoolStorage {
                slots: UnsafeCell::new([[0u8; BUF_SIZE]; POOL_SIZE]),
            },
        }
    }

    /// Initialize the pool's freelist.
    ///
    /// Builds a linked list of free slots: `0 → 1 → 2 → … → N → ∅`.
    /// Must be called exactly once before networking starts.  Subsequent calls
    /// are harmless no-ops.
    pub fn init(&self) {
        if self.initialized.swap(true, Ordering::AcqRel) {
            return;
        }

        for i in 0..POOL_SIZE {
            let next = if i + 1 < POOL_SIZE {
                (i + 1) as u16
            } else {
                FREELIST_EMPTY
            };
            self.next[i].store(next, Ordering::Relaxed);
            self.refcount[i].store(0, Ordering::Relaxed);
        }

        // Head = slot 0, version 0.  Release ordering makes all prior stores
        // (the next[] chain) visible to any thread that observes this write.
        self.head.store(0, Ordering::Release);
        self.count.store(POOL_SIZE, Ordering::Release);
    }

    /// Allocate a buffer slot with refcount 1.
    ///
    /// Returns `Some(slot_index)` on success, `None` if the pool is exhausted
    /// (the caller then records a miss and falls back to the heap).
    /// O(1) amortized.  Safe from interrupt context (lock-free CAS loop).
    pub fn alloc(&self) -> Option<u16> {
        loop {
            let old = self.head.load(Ordering::Acquire);
            let idx = (old & 0xFFFF) as u16;
            if idx == FREELIST_EMPTY {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            let ver = old >> 16;
            let next_idx = self.next[idx as usize].load(Ordering::Relaxed);
            let new = (ver.wrapping_add(1) << 16) | (next_idx as u32);
            if self
                .head
                .compare_exchange_weak(old, new, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                self.count.fetch_sub(1, Ordering::Relaxed);
                self.refcount[idx as usize].store(1, Ordering::Release);
                return Some(idx);
            }
            core::hint::spin_loop();
        }
    }

    /// Increment a slot's refcount (used by `PacketBuf::clone`).
    pub fn get(&self, slot: u16) {
        self.refcount[slot as usize].fetch_add(1, Ordering::AcqRel);
    }

    /// Current refcount of a slot (1 = exclusively owned, >1 = shared via clone).
    pub fn refcount(&self, slot: u16) -> u8 {
        self.refcount[slot as usize].load(Ordering::Acquire)
    }

    /// Decrement a slot's refcount; returns the slot to the freelist when it
    /// reaches zero.  Returns `true` if the slot was actually released.
    pub fn put(&self, slot: u16) -> bool {
        let prev = self.refcount[slot as usize].fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev != 0, "put: slot {} refcount underflow", slot);
        if prev != 1 {
            return false;
        }
        self.release_inner(slot);
        true
    }

    /// Unconditionally return a slot to the freelist, regardless of refcount.
    /// Kept for callers that allocated a slot and never shared it (refcount
    /// stays at 1, so this has the same effect as `put`).
    pub fn release(&self, slot: u16) {
        self.refcount[slot as usize].store(0, Ordering::Release);
        self.release_inner(slot);
    }

    fn release_inner(&self, slot: u16) {
        debug_assert!(
            (slot as usize) < POOL_SIZE,
            "release: slot index {} out of bounds",
            slot
        );
        loop {
            let old = self.head.load(Ordering::Acquire);
            let old_idx = (old & 0xFFFF) as u16;
            let ver = old >> 16;
            self.next[slot as usize].store(old_idx, Ordering::Relaxed);
            let new = (ver.wrapping_add(1) << 16) | (slot as u32);
            if self
                .head
                .compare_exchange_weak(old, new, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                self.count.fetch_add(1, Ordering::Relaxed);
                return;
            }
            core::hint::spin_loop();
        }
    }

    /// Number of free buffer slots (diagnostic, racy under concurrent access).
    #[inline]
    pub fn available(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    /// Number of allocations that missed this class since boot.
    #[inline]
    pub fn miss_count(&self) -> usize {
        self.misses.load(Ordering::Relaxed)
    }

    /// Whether the pool has been initialized.
    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Raw pointer to the first byte of slot `slot`.
    ///
    /// The returned pointer is valid for `BUF_SIZE` bytes.  The caller must
    /// own the slot (allocated and not yet released) and ensure no aliasing
    /// mutable references exist before dereferencing.
    #[inline]
    pub(crate) fn slot_data(&self, slot: u16) -> *mut u8 {
        debug_assert!((slot as usize) < POOL_SIZE);
        // SAFETY: UnsafeCell grants interior mutability.  Pointer arithmetic
        // is in-bounds because slot < POOL_SIZE and each slot is BUF_SIZE bytes.
        unsafe { (self.storage.slots.get() as *mut u8).add(slot as usize * BUF_SIZE) }
    }
}

pub type SmallPool = PacketPoolClass<SMALL_BUF_SIZE, SMALL_POOL_SLOTS>;
pub type MediumPool = PacketPoolClass<MEDIUM_BUF_SIZE, MEDIUM_POOL_SLOTS>;
pub type LargePool = PacketPoolClass<LARGE_BUF_SIZE, LARGE_POOL_SLOTS>;

pub static SMALL_PACKET_POOL: SmallPool = SmallPool::new();
pub static MEDIUM_PACKET_POOL: MediumPool = MediumPool::new();
pub static LARGE_PACKET_POOL: LargePool = LargePool::new();

/// Backward-compatible alias: the device/NAPI layer and its tests were
/// written against a single pool sized for one Ethernet-MTU frame. That
/// shape is exactly the medium class, so `PacketPool`/`PACKET_POOL` keep
/// working unchanged; only new size-class-aware code (ICMP, fragmentation,
/// TCP segment building) reaches for [`PoolClass::for_size`] directly.
pub type PacketPool = MediumPool;
pub static PACKET_POOL: &MediumPool = &MEDIUM_PACKET_POOL;
pub const BUF_SIZE: usize = MEDIUM_BUF_SIZE;
pub const POOL_SIZE: usize = MEDIUM_POOL_SLOTS;

/// Which size class backs a given [`PacketBuf`](super::packetbuf::PacketBuf).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolClass {
    Small,
    Medium,
    Large,
}

impl PoolClass {
    pub const fn capacity(self) -> usize {
        match self {
            PoolClass::Small => SMALL_BUF_SIZE,
            PoolClass::Medium => MEDIUM_BUF_SIZE,
            PoolClass::Large => LARGE_BUF_SIZE,
        }
    }

    /// Pick the smallest class that can hold `needed` bytes, or `None` if it
    /// exceeds even the largest class (the caller falls back to the heap).
    pub fn for_size(needed: usize) -> Option<PoolClass> {
        if needed <= SMALL_BUF_SIZE {
            Some(PoolClass::Small)
        } else if needed <= MEDIUM_BUF_SIZE {
            Some(PoolClass::Medium)
        } else if needed <= LARGE_BUF_SIZE {
            Some(PoolClass::Large)
        } else {
            None
        }
    }
}

/// Initialize all three pool classes. Must be called once at kernel boot
/// before any networking code runs.
pub fn init_pools() {
    SMALL_PACKET_POOL.init();
    MEDIUM_PACKET_POOL.init();
    LARGE_PACKET_POOL.init();
}

/// Aggregate miss count across all classes (diagnostic).
pub fn total_misses() -> usize {
    SMALL_PACKET_POOL.miss_count() + MEDIUM_PACKET_POOL.miss_count() + LARGE_PACKET_POOL.miss_count()
}
