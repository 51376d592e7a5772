//! File id to descriptor resolution

use std::sync::Arc;

use tracing::{debug, instrument};

use crate::cache::DescriptorCache;
use crate::descriptor::FileDescriptor;
use crate::error::{Result, StreamError};
use crate::upstream::ConnectionPool;
use crate::workload::WorkloadTable;

/// Resolves internal file ids through the least loaded upstream connection
pub struct FileResolver {
    pool: Arc<ConnectionPool>,
    workloads: Arc<WorkloadTable>,
    cache: Arc<DescriptorCache>,
}

impl FileResolver {
    pub fn new(
        pool: Arc<ConnectionPool>,
        workloads: Arc<WorkloadTable>,
        cache: Arc<DescriptorCache>,
    ) -> Self {
        Self {
            pool,
            workloads,
            cache,
        }
    }

    /// Descriptor for `file_id`, resolving it at most once across concurrent
    /// callers.
    #[instrument(skip(self))]
    pub async fn resolve(&self, file_id: &str) -> Result<Arc<FileDescriptor>> {
        self.cache
            .get_or_try_populate(file_id, || self.generate(file_id))
            .await
    }

    /// Resolve `file_id` again and replace whatever is cached
    pub async fn refresh(&self, file_id: &str) -> Result<Arc<FileDescriptor>> {
        let descriptor = self.generate(file_id).await?;
        Ok(self.cache.replace(file_id, descriptor))
    }

    pub fn cache(&self) -> &Arc<DescriptorCache> {
        &self.cache
    }

    async fn generate(&self, file_id: &str) -> Result<FileDescriptor> {
        let index = self.workloads.least_loaded().ok_or(StreamError::EmptyPool)?;
        let connection = self.pool.get(index)?;

        debug!(
            connection = connection.name(),
            index, "Looking up file metadata"
        );

        let descriptor = connection
            .lookup_file(file_id)
            .await?
            .ok_or_else(|| StreamError::FileNotFound(file_id.to_string()))?;

        debug!(
            dc_id = descriptor.dc_id,
            media_id = descriptor.media_id,
            "Generated file descriptor"
        );

        Ok(descriptor.with_connection(index))
    }
}
