//! Single-flight descriptor cache
//!
//! Every file id maps to a shared [`OnceCell`]. Concurrent resolutions of the
//! same id all wait on the one cell, so only the first caller reaches the
//! upstream. A failed population leaves the cell empty and the next caller
//! retries.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::OnceCell;

use crate::descriptor::FileDescriptor;
use crate::error::Result;

type Slot = Arc<OnceCell<Arc<FileDescriptor>>>;

/// Counters exposed through the status endpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub sweeps: u64,
}

#[derive(Debug, Default)]
pub struct DescriptorCache {
    entries: DashMap<String, Slot>,
    hits: AtomicU64,
    misses: AtomicU64,
    sweeps: AtomicU64,
}

impl DescriptorCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached descriptor, if one has been populated
    pub fn get(&self, file_id: &str) -> Option<Arc<FileDescriptor>> {
        self.entries
            .get(file_id)
            .and_then(|slot| slot.get().cloned())
    }

    /// Return the cached descriptor or run `populate` exactly once for all
    /// concurrent callers of the same id.
    ///
    /// The caller that runs `populate` counts as a miss. Everyone served from
    /// the cell counts as a hit, including callers that waited on another
    /// caller's population.
    pub async fn get_or_try_populate<F, Fut>(
        &self,
        file_id: &str,
        populate: F,
    ) -> Result<Arc<FileDescriptor>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<FileDescriptor>>,
    {
        // Clone the slot out so no shard lock is held across the await
        let slot: Slot = Arc::clone(
            self.entries
                .entry(file_id.to_string())
                .or_default()
                .value(),
        );

        if let Some(descriptor) = slot.get() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Arc::clone(descriptor));
        }

        let populated = AtomicBool::new(false);
        let descriptor = slot
            .get_or_try_init(|| async {
                populated.store(true, Ordering::Relaxed);
                self.misses.fetch_add(1, Ordering::Relaxed);
                populate().await.map(Arc::new)
            })
            .await?;

        if !populated.load(Ordering::Relaxed) {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
        Ok(Arc::clone(descriptor))
    }

    /// Swap in a freshly resolved descriptor
    pub fn replace(&self, file_id: &str, descriptor: FileDescriptor) -> Arc<FileDescriptor> {
        let descriptor = Arc::new(descriptor);
        self.entries.insert(
            file_id.to_string(),
            Arc::new(OnceCell::new_with(Some(Arc::clone(&descriptor)))),
        );
        descriptor
    }

    /// Drop every entry, returning how many populated descriptors were evicted
    pub fn clear(&self) -> usize {
        let evicted = self.len();
        self.entries.clear();
        self.sweeps.fetch_add(1, Ordering::Relaxed);
        evicted
    }

    /// Populated entries; in-flight or failed resolutions are not counted
    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.value().initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sweeps: self.sweeps.load(Ordering::Relaxed),
        }
    }
}
