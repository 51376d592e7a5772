//! Byte-range streaming of media stored behind an MTProto-style upstream
//!
//! A viewer asks for a file id and optionally an HTTP byte range. The engine
//! resolves the id to a [`FileDescriptor`] through a single-flight cache,
//! plans which upstream chunks cover the range, and streams them back while
//! trimming the first and last chunk to the exact byte boundaries.
//!
//! # Components
//!
//! - **Resolution**: [`FileResolver`] backed by [`DescriptorCache`], swept in
//!   full by the [`CacheJanitor`]
//! - **Load balancing**: [`WorkloadTable`] counts active streams per
//!   connection and routes new work to the least loaded one
//! - **Sessions**: [`SessionManager`] keeps one authorized media session per
//!   connection and data center
//! - **Delivery**: [`ChunkPipeline`] fetches parts, follows CDN redirects,
//!   decrypts and verifies CDN blocks, and cuts the edges
//! - **Ingest**: [`Ingest`] registers uploads and pre-warms the cache
//!
//! # Example
//!
//! ```
//! use bytes::Bytes;
//! use futures::StreamExt;
//! use mediarelay_core::{ByteRangeSpec, ByteStreamer, MemoryNetwork, StreamerConfig};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> mediarelay_core::Result<()> {
//! let network = MemoryNetwork::new();
//! network.add_document("42", 2, Bytes::from_static(b"hello, world"));
//!
//! let streamer = ByteStreamer::new(network.pool(1, 2)?, StreamerConfig::default())?;
//! let mut media = streamer
//!     .open("42", Some(ByteRangeSpec::FromTo { start: 7, end: 11 }))
//!     .await?;
//!
//! let mut body = Vec::new();
//! while let Some(chunk) = media.body.next().await {
//!     body.extend_from_slice(&chunk?);
//! }
//! assert_eq!(body, b"world");
//! assert_eq!(media.plan.content_range(), "bytes 7-11/12");
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod flood;
pub mod ingest;
pub mod janitor;
pub mod location;
pub mod memory;
pub mod pipeline;
pub mod range;
pub mod resolver;
pub mod session;
pub mod streamer;
pub mod upstream;
pub mod workload;

pub use cache::{CacheStats, DescriptorCache};
pub use config::{CHUNK_ALIGNMENT, MAX_CHUNK_SIZE, StreamerConfig};
pub use descriptor::{ChatPeer, DcId, FileDescriptor, FileKind, ThumbnailSource};
pub use error::{Result, RpcError, StreamError};
pub use flood::{FloodWaitPolicy, LogNotifier, OpsNotifier};
pub use ingest::{
    AccessPolicy, FileInfo, Ingest, IngestError, IngestOptions, MetadataStore, OpenAccess,
    Rejection, StoreError, StreamLink,
};
pub use janitor::CacheJanitor;
pub use location::{FileLocation, InputPeer};
pub use memory::{CdnPlacement, MemoryConnection, MemoryNetwork, MemoryStats};
pub use pipeline::{ChunkPipeline, ChunkStream, PartWindow};
pub use range::{ByteRangeSpec, RangePlan};
pub use resolver::FileResolver;
pub use session::{AUTH_IMPORT_ATTEMPTS, SessionKey, SessionManager, SessionStats};
pub use streamer::{ByteStreamer, ConnectionStatus, MediaStream, StreamerStatus};
pub use upstream::{
    AuthKey, CdnRedirect, ConnectionPool, RemoteSession, Request, Response, SessionKind,
    UpstreamConnection,
};
pub use workload::{WorkloadGuard, WorkloadTable};
