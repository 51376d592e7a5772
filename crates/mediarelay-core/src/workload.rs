//! Per-connection load accounting
//!
//! Each upstream connection has an in-flight stream counter. New resolutions
//! go to the least loaded connection; streams hold a [`WorkloadGuard`] that
//! gives the slot back when the stream ends, fails or is dropped.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// In-flight stream counters, one per pool index
#[derive(Debug)]
pub struct WorkloadTable {
    active: Vec<AtomicUsize>,
    cdn_redirects: Vec<AtomicU64>,
}

impl WorkloadTable {
    pub fn new(connections: usize) -> Self {
        Self {
            active: (0..connections).map(|_| AtomicUsize::new(0)).collect(),
            cdn_redirects: (0..connections).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Streams currently in flight on `index`
    pub fn load(&self, index: usize) -> usize {
        self.active
            .get(index)
            .map_or(0, |counter| counter.load(Ordering::Relaxed))
    }

    pub fn snapshot(&self) -> Vec<usize> {
        self.active
            .iter()
            .map(|counter| counter.load(Ordering::Relaxed))
            .collect()
    }

    /// Index with the lowest counter; ties go to the lowest index
    pub fn least_loaded(&self) -> Option<usize> {
        self.active
            .iter()
            .enumerate()
            .min_by_key(|(_, counter)| counter.load(Ordering::Relaxed))
            .map(|(index, _)| index)
    }

    /// Count a new stream on `index` until the guard is dropped
    pub fn acquire(self: &Arc<Self>, index: usize) -> WorkloadGuard {
        if let Some(counter) = self.active.get(index) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
        WorkloadGuard {
            table: Arc::clone(self),
            index,
        }
    }

    pub fn record_cdn_redirect(&self, index: usize) {
        if let Some(counter) = self.cdn_redirects.get(index) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn cdn_redirects(&self, index: usize) -> u64 {
        self.cdn_redirects
            .get(index)
            .map_or(0, |counter| counter.load(Ordering::Relaxed))
    }
}

/// RAII slot in the workload table
#[must_use = "the workload is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct WorkloadGuard {
    table: Arc<WorkloadTable>,
    index: usize,
}

impl WorkloadGuard {
    pub const fn index(&self) -> usize {
        self.index
    }
}

impl Drop for WorkloadGuard {
    fn drop(&mut self) {
        if let Some(counter) = self.table.active.get(self.index) {
            counter.fetch_sub(1, Ordering::Relaxed);
        }
    }
}
