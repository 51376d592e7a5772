//! Periodic descriptor cache sweeps

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::debug;

use crate::cache::DescriptorCache;

/// Background task that empties the descriptor cache on a fixed period.
///
/// Descriptors carry file-reference tokens that expire upstream, so the whole
/// cache is dropped rather than individual entries. The task is aborted when
/// the janitor is stopped or dropped.
#[derive(Debug)]
pub struct CacheJanitor {
    handle: Option<JoinHandle<()>>,
}

impl CacheJanitor {
    /// Start sweeping `cache` every `period`; a zero period disables sweeping
    pub fn spawn(cache: Arc<DescriptorCache>, period: Duration) -> Self {
        if period.is_zero() {
            return Self { handle: None };
        }

        let handle = tokio::spawn(async move {
            // First sweep happens one full period after startup
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let evicted = cache.clear();
                debug!(evicted, "Cleaned the descriptor cache");
            }
        });

        Self {
            handle: Some(handle),
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for CacheJanitor {
    fn drop(&mut self) {
        self.stop();
    }
}
