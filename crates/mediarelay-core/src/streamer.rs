//! The byte-delivery engine facade

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::cache::{CacheStats, DescriptorCache};
use crate::config::StreamerConfig;
use crate::descriptor::FileDescriptor;
use crate::error::Result;
use crate::flood::{FloodWaitPolicy, LogNotifier, OpsNotifier};
use crate::ingest::{AccessPolicy, Ingest, MetadataStore};
use crate::janitor::CacheJanitor;
use crate::pipeline::{ChunkPipeline, ChunkStream, PartWindow};
use crate::range::{ByteRangeSpec, RangePlan};
use crate::resolver::FileResolver;
use crate::session::{SessionManager, SessionStats};
use crate::upstream::ConnectionPool;
use crate::workload::WorkloadTable;

/// A file ready to be served
pub struct MediaStream {
    pub descriptor: Arc<FileDescriptor>,
    pub plan: RangePlan,
    pub body: ChunkStream,
}

impl std::fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaStream")
            .field("descriptor", &self.descriptor)
            .field("plan", &self.plan)
            .finish_non_exhaustive()
    }
}

/// Load of one upstream connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    pub index: usize,
    pub name: String,
    pub workload: usize,
    pub cdn_redirects: u64,
}

/// Point-in-time view of the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamerStatus {
    pub uptime_secs: u64,
    pub connections: Vec<ConnectionStatus>,
    pub cache: CacheStats,
    pub sessions: SessionStats,
}

/// Resolves files, plans ranges and streams bytes.
///
/// One instance owns the connection pool, the workload table, the descriptor
/// cache with its janitor, and the media session table.
pub struct ByteStreamer {
    config: StreamerConfig,
    pool: Arc<ConnectionPool>,
    workloads: Arc<WorkloadTable>,
    cache: Arc<DescriptorCache>,
    sessions: Arc<SessionManager>,
    resolver: Arc<FileResolver>,
    pipeline: ChunkPipeline,
    flood: FloodWaitPolicy,
    janitor: Mutex<Option<CacheJanitor>>,
    started: Instant,
}

impl ByteStreamer {
    pub fn new(pool: ConnectionPool, config: StreamerConfig) -> Result<Self> {
        config.validate()?;

        let pool = Arc::new(pool);
        let workloads = Arc::new(WorkloadTable::new(pool.len()));
        let cache = Arc::new(DescriptorCache::new());
        let sessions = Arc::new(SessionManager::new());
        let resolver = Arc::new(FileResolver::new(
            Arc::clone(&pool),
            Arc::clone(&workloads),
            Arc::clone(&cache),
        ));
        let pipeline = ChunkPipeline::new(
            Arc::clone(&pool),
            Arc::clone(&workloads),
            Arc::clone(&sessions),
            config.max_flood_waits,
        );
        let flood = FloodWaitPolicy::new(config.max_flood_waits, Arc::new(LogNotifier));

        info!(
            connections = pool.len(),
            chunk_size = config.chunk_size,
            "Byte streamer ready"
        );

        Ok(Self {
            config,
            pool,
            workloads,
            cache,
            sessions,
            resolver,
            pipeline,
            flood,
            janitor: Mutex::new(None),
            started: Instant::now(),
        })
    }

    /// Send flood-wait notices to `notifier` instead of the log
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn OpsNotifier>) -> Self {
        self.flood = FloodWaitPolicy::new(self.config.max_flood_waits, notifier);
        self.pipeline = self.pipeline.with_flood_policy(self.flood.clone());
        self
    }

    /// Start the periodic cache sweep; needs a running tokio runtime
    #[must_use]
    pub fn with_janitor(mut self) -> Self {
        *self.janitor.get_mut() = Some(CacheJanitor::spawn(
            Arc::clone(&self.cache),
            self.config.cache_clean_interval,
        ));
        self
    }

    /// Resolve `file_id`, sleeping through upstream flood waits
    pub async fn descriptor(&self, file_id: &str) -> Result<Arc<FileDescriptor>> {
        self.flood
            .execute("resolving a file", || self.resolver.resolve(file_id))
            .await
    }

    /// Stream the parts of an already resolved descriptor
    pub fn stream(
        &self,
        descriptor: Arc<FileDescriptor>,
        window: PartWindow,
    ) -> Result<ChunkStream> {
        self.pipeline.stream(descriptor, window)
    }

    /// Resolve, plan and start streaming `range` of `file_id`
    pub async fn open(&self, file_id: &str, range: Option<ByteRangeSpec>) -> Result<MediaStream> {
        let descriptor = self.descriptor(file_id).await?;
        let plan = RangePlan::new(range, descriptor.file_size, self.config.chunk_size)?;
        debug!(
            file_id,
            from = plan.from,
            until = plan.until,
            parts = plan.window.part_count,
            "Opening media stream"
        );

        let body = self.pipeline.stream(Arc::clone(&descriptor), plan.window)?;
        Ok(MediaStream {
            descriptor,
            plan,
            body,
        })
    }

    /// Registration flow sharing this engine's resolver and flood policy
    pub fn ingest(
        &self,
        store: Arc<dyn MetadataStore>,
        policy: Arc<dyn AccessPolicy>,
        public_url: impl Into<String>,
    ) -> Ingest {
        Ingest::new(
            Arc::clone(&self.resolver),
            store,
            policy,
            self.flood.clone(),
            public_url,
        )
    }

    pub fn config(&self) -> &StreamerConfig {
        &self.config
    }

    pub fn workloads(&self) -> &Arc<WorkloadTable> {
        &self.workloads
    }

    pub fn cache(&self) -> &Arc<DescriptorCache> {
        &self.cache
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn resolver(&self) -> &Arc<FileResolver> {
        &self.resolver
    }

    pub fn status(&self) -> StreamerStatus {
        let connections = self
            .pool
            .iter()
            .enumerate()
            .map(|(index, connection)| ConnectionStatus {
                index,
                name: connection.name().to_string(),
                workload: self.workloads.load(index),
                cdn_redirects: self.workloads.cdn_redirects(index),
            })
            .collect();

        StreamerStatus {
            uptime_secs: self.started.elapsed().as_secs(),
            connections,
            cache: self.cache.stats(),
            sessions: self.sessions.stats(),
        }
    }

    /// Stop the janitor and every cached media session
    pub async fn shutdown(&self) {
        if let Some(mut janitor) = self.janitor.lock().await.take() {
            janitor.stop();
        }
        self.sessions.shutdown().await;
        info!("Byte streamer stopped");
    }
}
