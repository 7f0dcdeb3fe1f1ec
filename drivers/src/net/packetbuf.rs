//! Pool-backed packet buffer with zero-copy header push/pull and layer tracking.
//!
//! `PacketBuf` is the single currency exchanged between the driver layer and the
//! protocol stack.  It carries both the raw frame data and metadata (layer offsets,
//! head/tail pointers) that let each protocol layer access its headers without
//! reparsing from scratch.
//!
//! # Ownership
//!
//! A freshly allocated `PacketBuf` exclusively owns its backing region.
//! [`clone_shared`](PacketBuf::clone_shared) produces a second `PacketBuf`
//! that shares the same region (refcount incremented); the region is
//! returned to its pool only when the last clone drops.  [`copy`](PacketBuf::copy)
//! instead allocates a fresh, independent region and duplicates the bytes.
//! A shared buffer refuses operations that would extend its data area
//! (`push_header`, `append`) — call `copy()` first if you need to mutate.
//!
//! # Layout
//!
//! ```text
//! |<-- headroom -->|<-- payload (head..tail) -->|<-- tailroom -->|
//! 0            head                          tail           capacity
//! ```
//!
//! * TX path: `alloc()` starts with `head = tail = HEADROOM`.  Headers are
//!   prepended via [`push_header`](PacketBuf::push_header); payload is appended
//!   via [`append`](PacketBuf::append).
//! * RX path: `from_raw_copy()` starts with `head = 0`, `tail = data.len()`.
//!   Headers are consumed via [`pull_header`](PacketBuf::pull_header).

extern crate alloc;

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::cell::UnsafeCell;
use core::fmt;

use super::pool::{
    LARGE_PACKET_POOL, MEDIUM_PACKET_POOL, PoolClass, SMALL_PACKET_POOL,
};
use super::types::{DevIndex, Ipv4Addr, NetError, PacketKind, PacketPriority};

/// Reserved headroom in each pooled buffer (bytes).
///
/// 128 bytes covers: Ethernet (14) + IP (20) + TCP max (60) + 34 spare.
/// Headers are prepended by decrementing `head`.
pub const HEADROOM: u16 = 128;

/// Size of the per-packet scratch area reserved for protocol control state
/// (e.g. the retransmit queue entry attaches its attempt counter here
/// instead of allocating a side structure).
pub const SCRATCH_LEN: usize = 48;

// =============================================================================
// PacketBufInner
// =============================================================================

/// Heap-backed region shared across clones via `Arc`.
struct OversizedRegion(UnsafeCell<Vec<u8>>);

// SAFETY: all mutable access to the inner Vec goes through `PacketBuf::data_mut`,
// which is refused (see `is_shared`) once more than one `Arc` handle exists.
unsafe impl Sync for OversizedRegion {}
unsafe impl Send for OversizedRegion {}

/// Internal storage backing for a [`PacketBuf`].
enum PacketBufInner {
    /// Backed by a fixed-size class pool — the fast-path allocation.
    Pooled { class: PoolClass, slot: u16 },
    /// Heap-allocated fallback for requests the pools can't satisfy (oversized
    /// reassembly buffers, pool-class misses under load).
    Oversized { data: Arc<OversizedRegion>, capacity: usize },
}

fn pool_alloc(class: PoolClass) -> Option<u16> {
    match class {
        PoolClass::Small => SMALL_PACKET_POOL.alloc(),
        PoolClass::Medium => MEDIUM_PACKET_POOL.alloc(),
        PoolClass::Large => LARGE_PACKET_POOL.alloc(),
    }
}

fn pool_get(class: PoolClass, slot: u16) {
    match class {
        PoolClass::Small => SMALL_PACKET_POOL.get(slot),
        PoolClass::Medium => MEDIUM_PACKET_POOL.get(slot),
        PoolClass::Large => LARGE_PACKET_POOL.get(slot),
    }
}

fn pool_put(class: PoolClass, slot: u16) {
    match class {
        PoolClass::Small => {
            SMALL_PACKET_POOL.put(slot);
        }
        PoolClass::Medium => {
            MEDIUM_PACKET_POOL.put(slot);
        }
        PoolClass::Large => {
            LARGE_PACKET_POOL.put(slot);
        }
    }
}

fn pool_refcount(class: PoolClass, slot: u16) -> u8 {
    match class {
        PoolClass::Small => SMALL_PACKET_POOL.refcount(slot),
        PoolClass::Medium => MEDIUM_PACKET_POOL.refcount(slot),
        PoolClass::Large => LARGE_PACKET_POOL.refcount(slot),
    }
}

fn pool_slot_data(class: PoolClass, slot: u16) -> *mut u8 {
    match class {
        PoolClass::Small => SMALL_PACKET_POOL.slot_data(slot),
        PoolClass::Medium => MEDIUM_PACKET_POOL.slot_data(slot),
        PoolClass::Large => LARGE_PACKET_POOL.slot_data(slot),
    }
}

// =============================================================================
// PacketBuf
// =============================================================================

/// A network packet buffer with zero-copy header push/pull and layer offset
/// tracking.
///
/// See [module documentation](self) for layout and ownership semantics.
pub struct PacketBuf {
    inner: PacketBufInner,
    /// Start of the active data region within the backing buffer.
    head: u16,
    /// End of the active data region (exclusive).
    tail: u16,
    /// Byte offset of the L2 (Ethernet) header within the backing buffer.
    l2_offset: u16,
    /// Byte offset of the L3 (IPv4) header within the backing buffer.
    l3_offset: u16,
    /// Byte offset of the L4 (TCP/UDP) header within the backing buffer.
    l4_offset: u16,
    /// Broadcast/multicast/unicast/loopback classification, set by link rx.
    pub kind: PacketKind,
    /// Scheduling priority, set at alloc time.
    pub priority: PacketPriority,
    /// Device this packet arrived on or is destined for, if known.
    pub owning_device: Option<DevIndex>,
    /// Socket this packet is queued against, if any (diagnostic + ownership aid).
    pub owning_socket: Option<u32>,
    /// Per-packet protocol scratch space (e.g. retransmit bookkeeping).
    pub scratch: [u8; SCRATCH_LEN],
    /// Optional one-shot cleanup invoked from `Drop` when the last reference
    /// to this packet's region goes away. Only ever set on the originating
    /// (non-cloned) `PacketBuf`; clones carry `None`.
    destructor: Option<Box<dyn FnOnce() + Send>>,
}

// -- Drop: return pooled buffers automatically, run destructor -----------------

impl Drop for PacketBuf {
    fn drop(&mut self) {
        if let Some(d) = self.destructor.take() {
            d();
        }
        if let PacketBufInner::Pooled { class, slot } = &self.inner {
            pool_put(*class, *slot);
        }
        // Oversized: Arc drop releases the Vec<u8> once the last handle goes.
    }
}

// -- Debug: metadata only, never dump raw buffer contents ---------------------

impl fmt::Debug for PacketBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            PacketBufInner::Pooled { class, slot } => {
                write!(f, "PacketBuf::Pooled(class={:?}, slot={})", class, slot)?;
            }
            PacketBufInner::Oversized { capacity, .. } => {
                write!(f, "PacketBuf::Oversized(cap={})", capacity)?;
            }
        }
        write!(
            f,
            " {{ head={}, tail={}, len={}, l2={}, l3={}, l4={}, kind={:?} }}",
            self.head,
            self.tail,
            self.len(),
            self.l2_offset,
            self.l3_offset,
            self.l4_offset,
            self.kind,
        )
    }
}

// =============================================================================
// Constructors
// =============================================================================

impl PacketBuf {
    fn empty_with(inner: PacketBufInner, head: u16, tail: u16) -> Self {
        Self {
            inner,
            head,
            tail,
            l2_offset: 0,
            l3_offset: 0,
            l4_offset: 0,
            kind: PacketKind::Unicast,
            priority: PacketPriority::default(),
            owning_device: None,
            owning_socket: None,
            scratch: [0u8; SCRATCH_LEN],
            destructor: None,
        }
    }

    /// Allocate an empty buffer from the global pool with [`HEADROOM`] reserved.
    ///
    /// Used by the **TX path** to build outgoing packets. Equivalent to
    /// `alloc_sized(MEDIUM_BUF_SIZE - HEADROOM, HEADROOM, Normal)`, preserved
    /// as a zero-argument convenience for existing call sites that only ever
    /// built single-MTU Ethernet frames.
    ///
    /// Returns `None` if the pool is exhausted.
    pub fn alloc() -> Option<Self> {
        let slot = MEDIUM_PACKET_POOL.alloc()?;
        Some(Self::empty_with(
            PacketBufInner::Pooled {
                class: PoolClass::Medium,
                slot,
            },
            HEADROOM,
            HEADROOM,
        ))
    }

    /// Allocate a buffer sized to hold at least `size + headroom` bytes,
    /// picking the smallest pool class that fits and falling back to the
    /// heap when that class (or all classes, for a jumbo request) is
    /// exhausted.
    pub fn alloc_sized(
        size: usize,
        headroom: usize,
        priority: PacketPriority,
    ) -> Result<Self, NetError> {
        let needed = round_up_16(size + headroom);
        let headroom = headroom as u16;
        match PoolClass::for_size(needed) {
            Some(class) => match pool_alloc(class) {
                Some(slot) => {
                    let mut pb =
                        Self::empty_with(PacketBufInner::Pooled { class, slot }, headroom, headroom);
                    pb.priority = priority;
                    Ok(pb)
                }
                None => {
                    // Class exhausted — fall through to heap, tagged Oversized.
                    let mut pb = Self::heap_alloc(needed, headroom)?;
                    pb.priority = priority;
                    Ok(pb)
                }
            },
            None => {
                let mut pb = Self::heap_alloc(needed, headroom)?;
                pb.priority = priority;
                Ok(pb)
            }
        }
    }

    fn heap_alloc(capacity: usize, headroom: u16) -> Result<Self, NetError> {
        let data = Arc::new(OversizedRegion(UnsafeCell::new(alloc::vec![0u8; capacity])));
        Ok(Self::empty_with(
            PacketBufInner::Oversized { data, capacity },
            headroom,
            headroom,
        ))
    }

    /// Allocate a buffer and copy raw frame data into it.
    ///
    /// Used by the **RX path** when copying from a DMA ring buffer.  The data
    /// starts at offset 0 (no headroom) so that layer offsets match raw wire
    /// positions.
    ///
    /// Returns `None` if no class can hold `data.len()` and the heap
    /// allocation also fails (out-of-memory).
    pub fn from_raw_copy(data: &[u8]) -> Option<Self> {
        let class = PoolClass::for_size(data.len());
        let mut pb = match class {
            Some(class) => match pool_alloc(class) {
                Some(slot) => {
                    // SAFETY: we own this slot exclusively after alloc().
                    unsafe {
                        let dst = pool_slot_data(class, slot);
                        core::ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len());
                    }
                    Self::empty_with(PacketBufInner::Pooled { class, slot }, 0, data.len() as u16)
                }
                None => Self::heap_alloc(data.len(), 0).ok()?,
            },
            None => Self::heap_alloc(data.len(), 0).ok()?,
        };
        if matches!(pb.inner, PacketBufInner::Oversized { .. }) {
            pb.data_mut()[..data.len()].copy_from_slice(data);
            pb.tail = data.len() as u16;
        }
        Some(pb)
    }

    /// Allocate an oversized buffer directly from the heap.
    ///
    /// Used for IP reassembly buffers that exceed even the large pool class.
    /// Normal packet allocation should use [`alloc`](Self::alloc) or
    /// [`alloc_sized`](Self::alloc_sized).
    pub fn oversized(capacity: usize) -> Self {
        Self::heap_alloc(capacity, 0).expect("heap_alloc is infallible for zero-length Vec growth")
    }

    /// Attach a one-shot cleanup closure, run from `Drop` on the owning
    /// (non-shared) `PacketBuf` only.
    pub fn set_destructor(&mut self, f: impl FnOnce() + Send + 'static) {
        self.destructor = Some(Box::new(f));
    }
}

fn round_up_16(n: usize) -> usize {
    (n + 15) & !15
}

// =============================================================================
// Cloning and copying
// =============================================================================

impl PacketBuf {
    /// `true` if this packet's backing region has more than one live owner.
    /// Shared packets refuse operations that would extend the data area.
    pub fn is_shared(&self) -> bool {
        match &self.inner {
            PacketBufInner::Pooled { class, slot } => pool_refcount(*class, *slot) > 1,
            PacketBufInner::Oversized { data, .. } => Arc::strong_count(data) > 1,
        }
    }

    /// Produce a new `PacketBuf` sharing the same backing region.  Refcount
    /// on the region is incremented; the clone carries no destructor (the
    /// original, or whichever handle drops last, is responsible for that).
    ///
    /// Mutating operations that would extend the data area (`push_header`,
    /// `append`) fail with [`NetError::InvalidArgument`] while shared.
    pub fn clone_shared(&self) -> PacketBuf {
        match &self.inner {
            PacketBufInner::Pooled { class, slot } => {
                pool_get(*class, *slot);
                let mut clone = Self::empty_with(
                    PacketBufInner::Pooled {
                        class: *class,
                        slot: *slot,
                    },
                    self.head,
                    self.tail,
                );
                clone.copy_metadata_from(self);
                clone
            }
            PacketBufInner::Oversized { data, capacity } => {
                let mut clone = Self::empty_with(
                    PacketBufInner::Oversized {
                        data: data.clone(),
                        capacity: *capacity,
                    },
                    self.head,
                    self.tail,
                );
                clone.copy_metadata_from(self);
                clone
            }
        }
    }

    /// Produce an independent copy: a fresh region with the same bytes and
    /// offsets. Safe to mutate immediately, including extending the data area.
    pub fn copy(&self) -> Result<PacketBuf, NetError> {
        let cap = self.capacity();
        let mut new = Self::alloc_sized(cap, 0, self.priority)?;
        new.data_mut()[..cap].copy_from_slice(self.data());
        new.head = self.head;
        new.tail = self.tail;
        new.copy_metadata_from(self);
        Ok(new)
    }

    fn copy_metadata_from(&mut self, src: &PacketBuf) {
        self.l2_offset = src.l2_offset;
        self.l3_offset = src.l3_offset;
        self.l4_offset = src.l4_offset;
        self.kind = src.kind;
        self.priority = src.priority;
        self.owning_device = src.owning_device;
        self.owning_socket = src.owning_socket;
        self.scratch = src.scratch;
    }
}

// =============================================================================
// Internal buffer access
// =============================================================================

impl PacketBuf {
    /// Total capacity of the backing buffer.
    #[inline]
    pub fn capacity(&self) -> usize {
        match &self.inner {
            PacketBufInner::Pooled { class, .. } => class.capacity(),
            PacketBufInner::Oversized { capacity, .. } => *capacity,
        }
    }

    /// Shared reference to the entire backing buffer.
    #[inline]
    fn data(&self) -> &[u8] {
        match &self.inner {
            PacketBufInner::Pooled { class, slot } => {
                // SAFETY: a pooled slot outlives every PacketBuf referencing it
                // (refcounted release only on last drop).
                unsafe { core::slice::from_raw_parts(pool_slot_data(*class, *slot), class.capacity()) }
            }
            PacketBufInner::Oversized { data, capacity } => {
                // SAFETY: read-only view; writers go through data_mut which
                // refuses to run while shared.
                unsafe { core::slice::from_raw_parts((*data.0.get()).as_ptr(), *capacity) }
            }
        }
    }

    /// Mutable reference to the entire backing buffer.
    #[inline]
    fn data_mut(&mut self) -> &mut [u8] {
        match &mut self.inner {
            PacketBufInner::Pooled { class, slot } => {
                // SAFETY: caller holds &mut self; exclusivity of the write is
                // the caller's responsibility once `is_shared()` is false.
                unsafe {
                    core::slice::from_raw_parts_mut(pool_slot_data(*class, *slot), class.capacity())
                }
            }
            PacketBufInner::Oversized { data, capacity } => unsafe {
                core::slice::from_raw_parts_mut((*data.0.get()).as_mut_ptr(), *capacity)
            },
        }
    }
}

// =============================================================================
// 1B.4 — Header push/pull and payload access
// =============================================================================

impl PacketBuf {
    /// Number of active payload bytes (`tail - head`).
    #[inline]
    pub fn len(&self) -> usize {
        (self.tail - self.head) as usize
    }

    /// `true` if the active region is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    /// Active data region `data[head..tail]`.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.data()[self.head as usize..self.tail as usize]
    }

    /// Mutable active data region `data[head..tail]`.
    #[inline]
    pub fn payload_mut(&mut self) -> &mut [u8] {
        debug_assert!(!self.is_shared(), "payload_mut on a shared PacketBuf");
        let h = self.head as usize;
        let t = self.tail as usize;
        &mut self.data_mut()[h..t]
    }

    /// Prepend `len` bytes of header space by extending `head` backward into
    /// the headroom.
    ///
    /// Returns a mutable slice over the newly exposed bytes (caller fills in
    /// the header).  Fails with [`NoBufferSpace`](NetError::NoBufferSpace) if
    /// the headroom is insufficient, or [`InvalidArgument`](NetError::InvalidArgument)
    /// if the buffer is shared.
    pub fn push_header(&mut self, len: usize) -> Result<&mut [u8], NetError> {
        if self.is_shared() {
            return Err(NetError::InvalidArgument);
        }
        let len16 = len as u16;
        if self.head < len16 {
            return Err(NetError::NoBufferSpace);
        }
        self.head -= len16;
        let h = self.head as usize;
        Ok(&mut self.data_mut()[h..h + len])
    }

    /// Consume `len` bytes from the front of the active region.
    ///
    /// Returns a shared slice over the consumed bytes (the header that was
    /// removed).  Fails with [`InvalidArgument`](NetError::InvalidArgument) if
    /// `len > self.len()`.
    pub fn pull_header(&mut self, len: usize) -> Result<&[u8], NetError> {
        if len > self.len() {
            return Err(NetError::InvalidArgument);
        }
        let old_head = self.head as usize;
        self.head += len as u16;
        Ok(&self.data()[old_head..old_head + len])
    }

    /// Append `src` bytes at the tail end of the active region.
    ///
    /// Fails with [`NoBufferSpace`](NetError::NoBufferSpace) if the remaining
    /// tailroom cannot hold `src`, or [`InvalidArgument`](NetError::InvalidArgument)
    /// if the buffer is shared.
    pub fn append(&mut self, src: &[u8]) -> Result<(), NetError> {
        if self.is_shared() {
            return Err(NetError::InvalidArgument);
        }
        let new_tail = self.tail as usize + src.len();
        if new_tail > self.capacity() {
            return Err(NetError::NoBufferSpace);
        }
        let t = self.tail as usize;
        self.data_mut()[t..new_tail].copy_from_slice(src);
        self.tail = new_tail as u16;
        Ok(())
    }

    /// Move `data` forward by `n` bytes, shrinking the active region from
    /// the front without returning the removed bytes (see [`pull_header`]
    /// when the header contents are needed).
    pub fn reserve(&mut self, n: usize) -> Result<(), NetError> {
        self.pull_header(n).map(|_| ())
    }

    /// Truncate the active region to `len` bytes by moving `tail` backward.
    /// A no-op (not an error) if `len >= self.len()`.
    pub fn trim(&mut self, len: usize) {
        let new_len = (len as u16).min(self.tail.saturating_sub(self.head));
        self.tail = self.head + new_len;
    }
}

// =============================================================================
// 1B.5 — Layer offset helpers
// =============================================================================

impl PacketBuf {
    /// Record the byte offset of the L2 (Ethernet) header.
    #[inline]
    pub fn set_l2(&mut self, offset: u16) {
        self.l2_offset = offset;
    }

    /// Record the byte offset of the L3 (IPv4) header.
    #[inline]
    pub fn set_l3(&mut self, offset: u16) {
        self.l3_offset = offset;
    }

    /// Record the byte offset of the L4 (TCP/UDP) header.
    #[inline]
    pub fn set_l4(&mut self, offset: u16) {
        self.l4_offset = offset;
    }

    /// Reset the L2 header marker to the current `head`.
    #[inline]
    pub fn reset_l2_header(&mut self) {
        self.l2_offset = self.head;
    }

    /// Reset the L3 header marker to the current `head`.
    #[inline]
    pub fn reset_l3_header(&mut self) {
        self.l3_offset = self.head;
    }

    /// Reset the L4 header marker to the current `head`.
    #[inline]
    pub fn reset_l4_header(&mut self) {
        self.l4_offset = self.head;
    }

    /// Raw L2 offset value.
    #[inline]
    pub fn l2_offset(&self) -> u16 {
        self.l2_offset
    }

    /// Raw L3 offset value.
    #[inline]
    pub fn l3_offset(&self) -> u16 {
        self.l3_offset
    }

    /// Raw L4 offset value.
    #[inline]
    pub fn l4_offset(&self) -> u16 {
        self.l4_offset
    }

    /// L2 (Ethernet) header bytes: `data[l2_offset..l3_offset]`.
    ///
    /// Returns `&[]` if `l3_offset` has not been set (i.e., the L2 end is
    /// not yet known).
    pub fn l2_header(&self) -> &[u8] {
        let start = self.l2_offset as usize;
        let end = self.l3_offset as usize;
        if end == 0 || end <= start {
            return &[];
        }
        let buf = self.data();
        let end = end.min(buf.len());
        &buf[start..end]
    }

    /// L3 (IPv4) header bytes: `data[l3_offset..l4_offset]`.
    ///
    /// Returns `&[]` if either `l3_offset` or `l4_offset` has not been set.
    pub fn l3_header(&self) -> &[u8] {
        let start = self.l3_offset as usize;
        let end = self.l4_offset as usize;
        if start == 0 || end == 0 || end <= start {
            return &[];
        }
        let buf = self.data();
        let end = end.min(buf.len());
        &buf[start..end]
    }

    /// L4 (TCP/UDP) header + payload bytes: `data[l4_offset..tail]`.
    ///
    /// Returns `&[]` if `l4_offset` has not been set.
    pub fn l4_header(&self) -> &[u8] {
        let start = self.l4_offset as usize;
        let end = self.tail as usize;
        if start == 0 || end <= start {
            return &[];
        }
        let buf = self.data();
        let end = end.min(buf.len());
        &buf[start..end]
    }

    /// Raw `head` value (useful for setting layer offsets during parsing).
    #[inline]
    pub fn head(&self) -> u16 {
        self.head
    }

    /// Raw `tail` value.
    #[inline]
    pub fn tail(&self) -> u16 {
        self.tail
    }
}

// =============================================================================
// 1B.6 — Checksum helpers
// =============================================================================

/// Accumulate the one's-complement sum over a byte slice.
///
/// Used internally by the checksum methods.  The caller must fold the result
/// via [`fold_checksum`] after accumulating all data.
fn ones_complement_sum(data: &[u8]) -> u32 {
    let mut sum = 0u32;
    let mut i = 0usize;
    while i + 1 < data.len() {
        let word = u16::from_be_bytes([data[i], data[i + 1]]) as u32;
        sum = sum.wrapping_add(word);
        i += 2;
    }
    // Odd trailing byte — pad with zero on the right.
    if i < data.len() {
        sum = sum.wrapping_add((data[i] as u32) << 8);
    }
    sum
}

/// Fold a 32-bit running sum into a 16-bit one's-complement checksum.
pub fn fold_checksum(mut sum: u32) -> u16 {
    while (sum >> 16) != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

/// Accumulate the IPv4 pseudo-header into `sum`.
fn add_pseudo_header(sum: &mut u32, src: &Ipv4Addr, dst: &Ipv4Addr, protocol: u8, l4_len: usize) {
    *sum = sum.wrapping_add(u16::from_be_bytes([src.0[0], src.0[1]]) as u32);
    *sum = sum.wrapping_add(u16::from_be_bytes([src.0[2], src.0[3]]) as u32);
    *sum = sum.wrapping_add(u16::from_be_bytes([dst.0[0], dst.0[1]]) as u32);
    *sum = sum.wrapping_add(u16::from_be_bytes([dst.0[2], dst.0[3]]) as u32);
    *sum = sum.wrapping_add(protocol as u32);
    *sum = sum.wrapping_add(l4_len as u32);
}

impl PacketBuf {
    /// Compute the IPv4 header checksum over the L3 header bytes.
    ///
    /// The checksum field (bytes 10–11) is treated as zero during computation.
    /// Requires `l3_offset` and `l4_offset` to be set.
    pub fn compute_ipv4_checksum(&self) -> u16 {
        let header = self.l3_header();
        if header.len() < 20 {
            return 0;
        }
        // Use IHL to determine actual header length (may include options).
        let ihl = ((header[0] & 0x0F) as usize) * 4;
        let header = &header[..ihl.min(header.len())];

        let mut sum = 0u32;
        // Bytes before the checksum field (0..10).
        sum = sum.wrapping_add(ones_complement_sum(&header[..10]));
        // Skip bytes 10–11 (checksum field — treated as zero).
        if header.len() > 12 {
            sum = sum.wrapping_add(ones_complement_sum(&header[12..]));
        }
        fold_checksum(sum)
    }

    /// Compute the TCP checksum (pseudo-header + L4 segment).
    ///
    /// The checksum field at TCP header bytes 16–17 is treated as zero.
    /// The L4 segment includes both the TCP header and its payload.
    ///
    /// Software checksum is always computed.  If `NetDeviceFeatures::CHECKSUM_TX`
    /// is set, the driver may offload — but the stack does not skip computation
    /// (simplicity over performance for now).
    pub fn compute_tcp_checksum(&self, src: Ipv4Addr, dst: Ipv4Addr) -> u16 {
        let segment = self.l4_header();
        if segment.len() < 20 {
            return 0;
        }

        let mut sum = 0u32;
        add_pseudo_header(&mut sum, &src, &dst, 6, segment.len());

        // TCP header bytes before the checksum field (0..16).
        sum = sum.wrapping_add(ones_complement_sum(&segment[..16]));
        // Skip bytes 16–17 (checksum field).
        if segment.len() > 18 {
            sum = sum.wrapping_add(ones_complement_sum(&segment[18..]));
        }
        fold_checksum(sum)
    }

    /// Compute the UDP checksum (pseudo-header + L4 datagram).
    ///
    /// The checksum field at UDP header bytes 6–7 is treated as zero.
    /// Per RFC 768, a computed checksum of zero is transmitted as `0xFFFF`.
    pub fn compute_udp_checksum(&self, src: Ipv4Addr, dst: Ipv4Addr) -> u16 {
        let segment = self.l4_header();
        if segment.len() < 8 {
            return 0;
        }

        let mut sum = 0u32;
        add_pseudo_header(&mut sum, &src, &dst, 17, segment.len());

        // UDP header bytes before the checksum field (0..6).
        sum = sum.wrapping_add(ones_complement_sum(&segment[..6]));
        // Skip bytes 6–7 (checksum field).
        if segment.len() > 8 {
            sum = sum.wrapping_add(ones_complement_sum(&segment[8..]));
        }

        let csum = fold_checksum(sum);
        // RFC 768: transmitted checksum of 0 is encoded as 0xFFFF.
        if csum == 0 { 0xFFFF } else { csum }
    }

    /// Compute the ICMP checksum over the L4 message (no pseudo-header; RFC 792).
    ///
    /// The checksum field at ICMP header bytes 2–3 is treated as zero.
    pub fn compute_icmp_checksum(&self) -> u16 {
        let message = self.l4_header();
        if message.len() < 4 {
            return 0;
        }

        let mut sum = 0u32;
        sum = sum.wrapping_add(ones_complement_sum(&message[..2]));
        if message.len() > 4 {
            sum = sum.wrapping_add(ones_complement_sum(&message[4..]));
        }
        fold_checksum(sum)
    }
}
