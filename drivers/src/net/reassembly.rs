//! IP fragment reassembly (RFC 791 §3.2).
//!
//! Fragments are grouped into buckets keyed by `(id, saddr, daddr,
//! protocol)`. A bucket is complete once its fragments cover `[0, total_len)`
//! with no gaps, at which point the reassembled L4 payload is handed back to
//! ordinary protocol dispatch. Overlapping fragments favor the most
//! recently received write — there is no anti-overlap-attack policy here.
//! Buckets that don't complete before their timer fires are dropped and
//! counted as a reassembly failure.

extern crate alloc;

use alloc::vec::Vec;

use slopos_lib::{IrqMutex, klog_debug};

use super::timer::{NET_TIMER_WHEEL, TimerKind, TimerToken};
use super::types::Ipv4Addr;

const MAX_BUCKETS: usize = 16;

/// Fragments must complete reassembly within this many 10ms ticks or the
/// bucket is dropped (RFC 792 time-exceeded / reassembly-timeout territory).
const REASSEMBLY_TIMEOUT_TICKS: u64 = 1500;

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct FragmentKey {
    pub id: u16,
    pub saddr: Ipv4Addr,
    pub daddr: Ipv4Addr,
    pub protocol: u8,
}

/// Mix the key into a 32-bit timer key. IP identification alone collides
/// too easily across unrelated (src, dst) pairs to key the timer wheel on.
fn timer_key(key: &FragmentKey) -> u32 {
    let mix = key.saddr.to_u32_be() ^ key.daddr.to_u32_be().rotate_left(16);
    (key.id as u32) ^ mix ^ ((key.protocol as u32) << 24)
}

struct Segment {
    offset: usize,
    data: Vec<u8>,
}

struct Bucket {
    key: FragmentKey,
    segments: Vec<Segment>,
    total_len: Option<usize>,
    timer_token: TimerToken,
}

impl Bucket {
    /// `true` once received segments cover `[0, total_len)` with no gaps.
    /// Requires the final fragment (MF=0) to have been seen, fixing `total_len`.
    fn is_complete(&self) -> bool {
        let Some(total_len) = self.total_len else {
            return false;
        };
        if total_len == 0 {
            return true;
        }

        let mut sorted: Vec<&Segment> = self.segments.iter().collect();
        sorted.sort_by_key(|s| s.offset);

        let mut covered = 0usize;
        for seg in sorted {
            if seg.offset > covered {
                return false;
            }
            covered = covered.max(seg.offset + seg.data.len());
        }
        covered >= total_len
    }

    /// Flatten segments into one contiguous buffer. Segments are stored in
    /// arrival order, so later writes overwrite earlier ones on overlap.
    fn assemble(&self) -> Vec<u8> {
        let total_len = self.total_len.unwrap_or(0);
        let mut out = alloc::vec![0u8; total_len];
        for seg in &self.segments {
            let end = (seg.offset + seg.data.len()).min(total_len);
            if seg.offset >= end {
                continue;
            }
            out[seg.offset..end].copy_from_slice(&seg.data[..end - seg.offset]);
        }
        out
    }
}

struct ReassemblyTable {
    buckets: Vec<Bucket>,
}

impl ReassemblyTable {
    const fn new() -> Self {
        Self {
            buckets: Vec::new(),
        }
    }
}

static REASSEMBLY_TABLE: IrqMutex<ReassemblyTable> = IrqMutex::new(ReassemblyTable::new());

/// Insert one fragment into its bucket (creating it on first sight).
/// Returns the reassembled L4 payload once the bucket's coverage is
/// gap-free, `None` while fragments are still outstanding.
pub fn insert(key: FragmentKey, frag_offset: usize, more_fragments: bool, data: &[u8]) -> Option<Vec<u8>> {
    let mut table = REASSEMBLY_TABLE.lock();

    let idx = match table.buckets.iter().position(|b| b.key == key) {
        Some(idx) => idx,
        None => {
            if table.buckets.len() >= MAX_BUCKETS {
                klog_debug!("reassembly: table full, dropping fragment id={}", key.id);
                return None;
            }
            let token = NET_TIMER_WHEEL.schedule(
                REASSEMBLY_TIMEOUT_TICKS,
                TimerKind::ReassemblyTimeout,
                timer_key(&key),
            );
            table.buckets.push(Bucket {
                key,
                segments: Vec::new(),
                total_len: None,
                timer_token: token,
            });
            table.buckets.len() - 1
        }
    };

    {
        let bucket = &mut table.buckets[idx];
        bucket.segments.push(Segment {
            offset: frag_offset,
            data: data.to_vec(),
        });
        if !more_fragments {
            bucket.total_len = Some(frag_offset + data.len());
        }
    }

    if table.buckets[idx].is_complete() {
        let bucket = table.buckets.swap_remove(idx);
        NET_TIMER_WHEEL.cancel(bucket.timer_token);
        klog_debug!(
            "reassembly: id={} complete ({} bytes from {} fragments)",
            bucket.key.id,
            bucket.total_len.unwrap_or(0),
            bucket.segments.len()
        );
        Some(bucket.assemble())
    } else {
        None
    }
}

/// Timer-driven eviction of a bucket that never completed. Called from
/// [`super::timer`]'s dispatch loop on `TimerKind::ReassemblyTimeout`.
pub fn on_timeout(key: u32) {
    let mut table = REASSEMBLY_TABLE.lock();
    if let Some(idx) = table.buckets.iter().position(|b| timer_key(&b.key) == key) {
        let bucket = table.buckets.swap_remove(idx);
        klog_debug!(
            "reassembly: id={} timed out with {} fragments, dropping (reasm_fail)",
            bucket.key.id,
            bucket.segments.len()
        );
    }
}
