//! Lock-free bounded history for scalar samples.
//!
//! Logically an append-only sequence with capacity `C`, physically `C` slots
//! plus a monotonic write index. Slot reservation is a fetch-add on the write
//! index, so concurrent ingest streams targeting the same metric are safe;
//! the cost is that timestamps from different instances may interleave inside
//! the window, while each sample stays internally consistent.
//!
//! Readers never observe torn samples. Each slot carries a sequence word: a
//! slot holding the sample with global index `i` reads `2*i + 2`, and the
//! value is odd while a writer is mid-update. A reader checks the sequence
//! before and after copying the payload and silently discards slots that a
//! writer touched in between.

use crate::core::types::Sample;
use std::sync::atomic::{fence, AtomicI64, AtomicU64, Ordering};

/// Sequence value of a slot that has never been written.
const SEQ_EMPTY: u64 = 0;

/// Stable sequence word for the sample with global index `i`.
fn stable_seq(index: u64) -> u64 {
    index.wrapping_mul(2).wrapping_add(2)
}

#[derive(Debug)]
struct Slot {
    seq: AtomicU64,
    ts: AtomicI64,
    bits: AtomicU64,
}

impl Slot {
    fn empty() -> Self {
        Slot {
            seq: AtomicU64::new(SEQ_EMPTY),
            ts: AtomicI64::new(0),
            bits: AtomicU64::new(0),
        }
    }
}

/// Fixed-capacity circular history of scalar samples with wait-free writes
/// and consistent snapshot reads.
#[derive(Debug)]
pub struct SampleRing {
    slots: Box<[Slot]>,
    widx: AtomicU64,
}

impl SampleRing {
    /// Create a ring with the given capacity.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring capacity must be greater than 0");
        let slots: Vec<Slot> = (0..capacity).map(|_| Slot::empty()).collect();
        SampleRing {
            slots: slots.into_boxed_slice(),
            widx: AtomicU64::new(0),
        }
    }

    /// Ring capacity
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Append one sample. Wait-free; overwriting the oldest slot is silent.
    pub fn push(&self, sample: Sample) {
        let i = self.widx.fetch_add(1, Ordering::AcqRel);
        let slot = &self.slots[(i % self.slots.len() as u64) as usize];
        // Odd marker: payload is in flux until the stable sequence lands.
        slot.seq.store(stable_seq(i).wrapping_sub(1), Ordering::Relaxed);
        fence(Ordering::Release);
        slot.ts.store(sample.ts, Ordering::Relaxed);
        slot.bits.store(sample.val.to_bits(), Ordering::Relaxed);
        slot.seq.store(stable_seq(i), Ordering::Release);
    }

    /// Copy the slot expected to hold global index `i`, or `None` if a writer
    /// has moved past it.
    fn read_slot(&self, i: u64) -> Option<Sample> {
        let slot = &self.slots[(i % self.slots.len() as u64) as usize];
        let expect = stable_seq(i);
        if slot.seq.load(Ordering::Acquire) != expect {
            return None;
        }
        let ts = slot.ts.load(Ordering::Relaxed);
        let bits = slot.bits.load(Ordering::Relaxed);
        fence(Ordering::Acquire);
        if slot.seq.load(Ordering::Relaxed) != expect {
            return None;
        }
        Some(Sample::new(ts, f64::from_bits(bits)))
    }

    /// Return up to `min(n, capacity, count)` most recent samples, oldest
    /// first. Slots overwritten while the window is being copied are dropped
    /// silently.
    pub fn snapshot_window(&self, n: usize) -> Vec<Sample> {
        let w = self.widx.load(Ordering::Acquire);
        let take = (n as u64).min(self.slots.len() as u64).min(w);
        let mut out = Vec::with_capacity(take as usize);
        for i in (w - take)..w {
            if let Some(sample) = self.read_slot(i) {
                out.push(sample);
            }
        }
        out
    }

    /// The most recent sample, or `None` before the first push.
    pub fn latest(&self) -> Option<Sample> {
        loop {
            let w = self.widx.load(Ordering::Acquire);
            if w == 0 {
                return None;
            }
            if let Some(sample) = self.read_slot(w - 1) {
                return Some(sample);
            }
            // The head slot is being rewritten, so an even newer sample
            // exists; reload the index and try again.
            std::hint::spin_loop();
        }
    }

    /// Number of valid samples currently in the window
    pub fn len(&self) -> usize {
        self.widx
            .load(Ordering::Acquire)
            .min(self.slots.len() as u64) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.widx.load(Ordering::Acquire) == 0
    }

    /// Total number of samples ever pushed
    pub fn count(&self) -> u64 {
        self.widx.load(Ordering::Acquire)
    }
}
