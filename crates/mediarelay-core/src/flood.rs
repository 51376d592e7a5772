//! Flood-wait recovery
//!
//! The upstream answers bursts with a `FloodWait` carrying a cooldown. The
//! caller sleeps through it, tells the operators, and tries again.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::error::{Result, StreamError};

/// Operational channel notified about rate limiting
#[async_trait]
pub trait OpsNotifier: Send + Sync {
    async fn notify(&self, message: &str);
}

/// Notifier that only writes to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl OpsNotifier for LogNotifier {
    async fn notify(&self, message: &str) {
        warn!(target: "mediarelay::ops", "{message}");
    }
}

/// Retries an operation through upstream flood waits
#[derive(Clone)]
pub struct FloodWaitPolicy {
    max_waits: u32,
    notifier: Arc<dyn OpsNotifier>,
}

impl FloodWaitPolicy {
    pub fn new(max_waits: u32, notifier: Arc<dyn OpsNotifier>) -> Self {
        Self {
            max_waits,
            notifier,
        }
    }

    pub const fn max_waits(&self) -> u32 {
        self.max_waits
    }

    /// Run `operation`, sleeping through at most `max_waits` flood waits.
    ///
    /// `context` names the operation in the operator notification.
    pub async fn execute<F, Fut, T>(&self, context: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut waits = 0;

        loop {
            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            let Some(cooldown) = err.flood_wait() else {
                return Err(err);
            };
            if waits >= self.max_waits {
                return Err(StreamError::RateLimited {
                    seconds: cooldown.as_secs(),
                });
            }

            waits += 1;
            warn!(
                seconds = cooldown.as_secs(),
                attempt = waits,
                "Flood wait while {context}"
            );
            tokio::time::sleep(cooldown).await;
            self.notifier
                .notify(&format!(
                    "Got FloodWait of {}s while {context}",
                    cooldown.as_secs()
                ))
                .await;
        }
    }
}
