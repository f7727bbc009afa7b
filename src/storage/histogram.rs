//! Bounded history for histogram samples.
//!
//! Histogram payloads are variable-length, so the scalar ring's atomic slot
//! discipline does not apply; pushes and reads take a short mutex region
//! instead. Bucket bounds are pinned by the first accepted push and later
//! samples with a different layout are rejected.

use crate::core::types::HistogramSample;
use parking_lot::Mutex;

struct Inner {
    slots: Vec<Option<HistogramSample>>,
    widx: u64,
    bounds: Option<Vec<f64>>,
}

/// Fixed-capacity circular history of histogram samples.
pub struct HistogramRing {
    inner: Mutex<Inner>,
}

impl HistogramRing {
    /// Create a ring with the given capacity.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring capacity must be greater than 0");
        HistogramRing {
            inner: Mutex::new(Inner {
                slots: vec![None; capacity],
                widx: 0,
                bounds: None,
            }),
        }
    }

    /// Append one sample. Returns `false` when the sample's bounds differ
    /// from the layout pinned by the first push; the sample is dropped and
    /// the history is left untouched.
    pub fn push(&self, sample: HistogramSample) -> bool {
        let mut inner = self.inner.lock();
        let pinned_matches = inner
            .bounds
            .as_deref()
            .map(|bounds| bounds == sample.bounds.as_slice());
        match pinned_matches {
            Some(false) => return false,
            Some(true) => {}
            None => inner.bounds = Some(sample.bounds.clone()),
        }

        let capacity = inner.slots.len() as u64;
        let idx = (inner.widx % capacity) as usize;
        inner.slots[idx] = Some(sample);
        inner.widx += 1;
        true
    }

    /// The most recent sample, or `None` before the first push.
    pub fn latest(&self) -> Option<HistogramSample> {
        let inner = self.inner.lock();
        if inner.widx == 0 {
            return None;
        }
        let capacity = inner.slots.len() as u64;
        inner.slots[((inner.widx - 1) % capacity) as usize].clone()
    }

    /// Return up to `min(n, capacity, count)` most recent samples, oldest
    /// first.
    pub fn snapshot_window(&self, n: usize) -> Vec<HistogramSample> {
        let inner = self.inner.lock();
        let capacity = inner.slots.len() as u64;
        let take = (n as u64).min(capacity).min(inner.widx);
        let mut out = Vec::with_capacity(take as usize);
        for i in (inner.widx - take)..inner.widx {
            if let Some(sample) = &inner.slots[(i % capacity) as usize] {
                out.push(sample.clone());
            }
        }
        out
    }

    /// The bucket layout pinned by the first push, if any.
    pub fn bounds(&self) -> Option<Vec<f64>> {
        self.inner.lock().bounds.clone()
    }

    /// Number of valid samples currently in the window
    pub fn len(&self) -> usize {
        let inner = self.inner.lock();
        inner.widx.min(inner.slots.len() as u64) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().widx == 0
    }

    /// Total number of samples ever accepted
    pub fn count(&self) -> u64 {
        self.inner.lock().widx
    }
}
