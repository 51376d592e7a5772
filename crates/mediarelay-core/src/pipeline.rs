//! Chunk streaming pipeline
//!
//! Fetches a file in `chunk_size` pages starting at a chunk-aligned offset,
//! trims the first and last page so the consumer sees exactly the requested
//! bytes, and follows CDN redirects: CDN pages are decrypted with the
//! redirect's key and verified against the origin's segment hashes before
//! anything is yielded.
//!
//! Outcomes per upstream failure:
//!
//! - flood waits are slept through and the same request is sent again, up to
//!   the policy's limit, after which the stream fails as rate limited
//! - timeouts and malformed responses end the stream quietly
//! - transport failures drop the cached media session and fail the stream
//! - hash mismatches and everything else fail the stream

use std::pin::Pin;
use std::sync::Arc;

use async_stream::stream;
use bytes::Bytes;
use futures::Stream;
use mediarelay_crypto::verify_segments;
use tracing::{debug, error, info};

use crate::descriptor::{DcId, FileDescriptor};
use crate::error::{Result, RpcError, StreamError};
use crate::flood::{FloodWaitPolicy, LogNotifier};
use crate::location::FileLocation;
use crate::session::{SessionKey, SessionManager};
use crate::upstream::{
    ConnectionPool, RemoteSession, Request, Response, SessionKind, UpstreamConnection,
};
use crate::workload::WorkloadTable;

/// Owned, sendable stream of file bytes
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send + 'static>>;

/// Chunk-aligned fetch plan for one stream call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartWindow {
    /// Chunk-aligned offset of the first fetch
    pub offset: u64,
    /// Bytes dropped from the front of the first part
    pub first_part_cut: usize,
    /// Bytes kept from the front of the last part
    pub last_part_cut: usize,
    pub part_count: u64,
    pub chunk_size: u64,
}

impl PartWindow {
    /// Window that fetches nothing
    pub const fn empty(chunk_size: u64) -> Self {
        Self {
            offset: 0,
            first_part_cut: 0,
            last_part_cut: 0,
            part_count: 0,
            chunk_size,
        }
    }

    /// Trim the fetched `chunk` for 1-based part number `part`
    pub fn slice(&self, part: u64, chunk: &Bytes) -> Bytes {
        if self.part_count == 1 {
            cut(chunk, self.first_part_cut, self.last_part_cut)
        } else if part == 1 {
            cut(chunk, self.first_part_cut, chunk.len())
        } else if part == self.part_count {
            cut(chunk, 0, self.last_part_cut)
        } else {
            chunk.clone()
        }
    }
}

/// `chunk[start..end]` with out-of-range bounds clamped
fn cut(chunk: &Bytes, start: usize, end: usize) -> Bytes {
    let end = end.min(chunk.len());
    let start = start.min(end);
    chunk.slice(start..end)
}

/// Walks a [`PartWindow`] one part at a time
#[derive(Debug)]
struct PartCursor {
    window: PartWindow,
    current_part: u64,
    offset: u64,
}

impl PartCursor {
    const fn new(window: PartWindow) -> Self {
        Self {
            window,
            current_part: 1,
            offset: window.offset,
        }
    }

    /// Trim `chunk` for the current part and advance to the next one
    fn take(&mut self, chunk: &Bytes) -> Bytes {
        let part = self.window.slice(self.current_part, chunk);
        self.current_part += 1;
        self.offset += self.window.chunk_size;
        part
    }

    const fn finished(&self) -> bool {
        self.current_part > self.window.part_count
    }

    const fn parts_yielded(&self) -> u64 {
        self.current_part - 1
    }

    fn get_file(&self, location: &FileLocation) -> Request {
        Request::GetFile {
            location: location.clone(),
            offset: self.offset,
            limit: self.window.chunk_size,
        }
    }

    fn get_cdn_file(&self, file_token: &Bytes) -> Request {
        Request::GetCdnFile {
            file_token: file_token.clone(),
            offset: self.offset,
            limit: self.window.chunk_size,
        }
    }
}

/// Stops a CDN session when the stream is dropped before it could be closed
struct CdnSessionGuard {
    session: Option<Arc<dyn RemoteSession>>,
}

impl CdnSessionGuard {
    fn new(session: Arc<dyn RemoteSession>) -> Self {
        Self {
            session: Some(session),
        }
    }

    async fn close(mut self) {
        if let Some(session) = self.session.take() {
            session.stop().await;
        }
    }
}

impl Drop for CdnSessionGuard {
    fn drop(&mut self) {
        if let Some(session) = self.session.take()
            && let Ok(handle) = tokio::runtime::Handle::try_current()
        {
            handle.spawn(async move { session.stop().await });
        }
    }
}

/// Classify an upstream result for the stream.
///
/// `Ok(None)` means the stream should end without an error.
async fn settle<T>(
    sessions: &SessionManager,
    key: SessionKey,
    session: &Arc<dyn RemoteSession>,
    result: Result<T>,
) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(StreamError::Upstream(err)) if err.ends_stream() => {
            debug!(%err, "Upstream stopped answering, ending stream");
            Ok(None)
        }
        Err(StreamError::Upstream(err)) if err.is_transport() => {
            sessions.invalidate(key, session).await;
            error!(%err, dc_id = key.dc_id, "Transport failure while streaming");
            Err(err.into())
        }
        Err(err) => Err(err),
    }
}

/// Send `request` over `target`, repeating it after every flood wait
async fn call(
    flood: &FloodWaitPolicy,
    target: &dyn RemoteSession,
    request: Request,
) -> Result<Response> {
    let context = format!("fetching {}", request.name());
    flood
        .execute(&context, move || {
            let request = request.clone();
            async move { target.invoke(request).await.map_err(StreamError::from) }
        })
        .await
}

async fn open_cdn_session(
    connection: &dyn UpstreamConnection,
    dc_id: DcId,
) -> std::result::Result<Arc<dyn RemoteSession>, RpcError> {
    let test_mode = connection.test_mode().await?;
    let auth_key = connection.create_auth_key(dc_id, test_mode).await?;
    let session = connection.new_session(dc_id, auth_key, test_mode, SessionKind::Cdn);

    if let Err(err) = session.start().await {
        session.stop().await;
        return Err(err);
    }
    Ok(session)
}

/// Produces byte streams for resolved descriptors
pub struct ChunkPipeline {
    pool: Arc<ConnectionPool>,
    workloads: Arc<WorkloadTable>,
    sessions: Arc<SessionManager>,
    flood: FloodWaitPolicy,
}

impl ChunkPipeline {
    /// Pipeline that sleeps through at most `max_flood_waits` cooldowns per
    /// upstream request and reports them to the log
    pub fn new(
        pool: Arc<ConnectionPool>,
        workloads: Arc<WorkloadTable>,
        sessions: Arc<SessionManager>,
        max_flood_waits: u32,
    ) -> Self {
        Self {
            pool,
            workloads,
            sessions,
            flood: FloodWaitPolicy::new(max_flood_waits, Arc::new(LogNotifier)),
        }
    }

    #[must_use]
    pub fn with_flood_policy(mut self, flood: FloodWaitPolicy) -> Self {
        self.flood = flood;
        self
    }

    /// Stream the parts of `descriptor` described by `window`.
    ///
    /// The descriptor's connection is charged one workload unit from this
    /// call until the returned stream finishes or is dropped.
    pub fn stream(
        &self,
        descriptor: Arc<FileDescriptor>,
        window: PartWindow,
    ) -> Result<ChunkStream> {
        let index = descriptor.connection;
        let connection = Arc::clone(self.pool.get(index)?);
        let workload = self.workloads.acquire(index);
        let workloads = Arc::clone(&self.workloads);
        let sessions = Arc::clone(&self.sessions);
        let flood = self.flood.clone();

        Ok(Box::pin(stream! {
            let _workload = workload;
            if window.part_count == 0 {
                return;
            }

            let key = SessionKey::new(index, descriptor.dc_id);
            debug!(
                connection = connection.name(),
                media_id = descriptor.media_id,
                parts = window.part_count,
                "Starting to yield file"
            );

            let opened = {
                let sessions: &SessionManager = &sessions;
                let connection: &dyn UpstreamConnection = connection.as_ref();
                flood
                    .execute("opening a media session", move || sessions.media_session(connection, key))
                    .await
            };
            let session = match opened {
                Ok(session) => session,
                Err(err) => {
                    yield Err(err);
                    return;
                }
            };
            let location = match FileLocation::from_descriptor(&descriptor) {
                Ok(location) => location,
                Err(err) => {
                    yield Err(err);
                    return;
                }
            };

            let mut cursor = PartCursor::new(window);
            let first = call(&flood, session.as_ref(), cursor.get_file(&location)).await;

            let outcome: Result<()> = match settle(&sessions, key, &session, first).await {
                Ok(None) => Ok(()),
                Err(err) => Err(err),
                Ok(Some(Response::File { bytes })) => {
                    let mut chunk = bytes;
                    loop {
                        if chunk.is_empty() {
                            break Ok(());
                        }
                        yield Ok(cursor.take(&chunk));
                        if cursor.finished() {
                            break Ok(());
                        }

                        let next = call(&flood, session.as_ref(), cursor.get_file(&location)).await;
                        match settle(&sessions, key, &session, next).await {
                            Ok(Some(Response::File { bytes })) => chunk = bytes,
                            Ok(Some(other)) => {
                                break Err(StreamError::unexpected("upload.getFile", &other));
                            }
                            Ok(None) => break Ok(()),
                            Err(err) => break Err(err),
                        }
                    }
                }
                Ok(Some(Response::FileCdnRedirect(redirect))) => {
                    workloads.record_cdn_redirect(index);
                    info!(
                        dc_id = redirect.dc_id,
                        media_id = descriptor.media_id,
                        "File redirected to CDN"
                    );

                    let opened = {
                        let connection: &dyn UpstreamConnection = connection.as_ref();
                        let dc_id = redirect.dc_id;
                        flood
                            .execute("opening a CDN session", move || async move {
                                open_cdn_session(connection, dc_id).await.map_err(StreamError::from)
                            })
                            .await
                    };
                    match settle(&sessions, key, &session, opened).await {
                        Ok(None) => Ok(()),
                        Err(err) => Err(err),
                        Ok(Some(cdn)) => {
                            let guard = CdnSessionGuard::new(Arc::clone(&cdn));
                            let outcome = match redirect.cipher() {
                                Err(err) => Err(err.into()),
                                Ok(cipher) => loop {
                                    let fetched = call(&flood, cdn.as_ref(), cursor.get_cdn_file(&redirect.file_token)).await;
                                    let chunk = match settle(&sessions, key, &session, fetched).await {
                                        Ok(Some(Response::CdnFile { bytes })) => bytes,
                                        Ok(Some(Response::CdnFileReuploadNeeded { request_token })) => {
                                            debug!(offset = cursor.offset, "CDN asked for a reupload");
                                            let reupload = call(
                                                &flood,
                                                session.as_ref(),
                                                Request::ReuploadCdnFile {
                                                    file_token: redirect.file_token.clone(),
                                                    request_token,
                                                },
                                            )
                                            .await;
                                            match reupload {
                                                Err(StreamError::Upstream(RpcError::VolumeLocNotFound)) => {
                                                    debug!("Origin lost the file volume, ending stream");
                                                    break Ok(());
                                                }
                                                other => match settle(&sessions, key, &session, other).await {
                                                    Ok(Some(_)) => continue,
                                                    Ok(None) => break Ok(()),
                                                    Err(err) => break Err(err),
                                                },
                                            }
                                        }
                                        Ok(Some(other)) => {
                                            break Err(StreamError::unexpected("upload.getCdnFile", &other));
                                        }
                                        Ok(None) => break Ok(()),
                                        Err(err) => break Err(err),
                                    };

                                    let decrypted = match cipher.decrypt(cursor.offset, &chunk) {
                                        Ok(plain) => Bytes::from(plain),
                                        Err(err) => break Err(err.into()),
                                    };

                                    let requested = call(
                                        &flood,
                                        session.as_ref(),
                                        Request::GetCdnFileHashes {
                                            file_token: redirect.file_token.clone(),
                                            offset: cursor.offset,
                                        },
                                    )
                                    .await;
                                    let hashes = match settle(&sessions, key, &session, requested).await {
                                        Ok(Some(Response::CdnFileHashes(hashes))) => hashes,
                                        Ok(Some(other)) => {
                                            break Err(StreamError::unexpected("upload.getCdnFileHashes", &other));
                                        }
                                        Ok(None) => break Ok(()),
                                        Err(err) => break Err(err),
                                    };

                                    if let Err(err) = verify_segments(&decrypted, &hashes) {
                                        error!(%err, offset = cursor.offset, "CDN chunk failed verification");
                                        break Err(err.into());
                                    }

                                    if decrypted.is_empty() {
                                        break Ok(());
                                    }
                                    yield Ok(cursor.take(&decrypted));
                                    if cursor.finished() {
                                        break Ok(());
                                    }
                                },
                            };
                            guard.close().await;
                            outcome
                        }
                    }
                }
                Ok(Some(other)) => Err(StreamError::unexpected("upload.getFile", &other)),
            };

            debug!(
                media_id = descriptor.media_id,
                parts = cursor.parts_yielded(),
                "Finished yielding file"
            );
            if let Err(err) = outcome {
                yield Err(err);
            }
        }))
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use futures::StreamExt;
    use mockall::mock;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    use super::*;
    use crate::flood::OpsNotifier;
    use crate::memory::{CdnPlacement, MemoryNetwork};
    use crate::range::{ByteRangeSpec, RangePlan};

    const CHUNK: u64 = 8192;

    struct Fixture {
        network: MemoryNetwork,
        workloads: Arc<WorkloadTable>,
        sessions: Arc<SessionManager>,
        pipeline: ChunkPipeline,
    }

    fn fixture(connections: usize, home_dc: DcId) -> Fixture {
        let network = MemoryNetwork::new();
        let pool = Arc::new(network.pool(connections, home_dc).unwrap());
        let workloads = Arc::new(WorkloadTable::new(connections));
        let sessions = Arc::new(SessionManager::new());
        let pipeline = ChunkPipeline::new(pool, Arc::clone(&workloads), Arc::clone(&sessions), 3);
        Fixture {
            network,
            workloads,
            sessions,
            pipeline,
        }
    }

    fn payload(len: usize) -> Bytes {
        (0..len).map(|i| (i * 31 % 251) as u8).collect::<Vec<_>>().into()
    }

    fn window_for(range: Option<ByteRangeSpec>, size: u64) -> PartWindow {
        RangePlan::new(range, size, CHUNK).unwrap().window
    }

    async fn collect(mut stream: ChunkStream) -> (Vec<u8>, Option<StreamError>) {
        let mut data = Vec::new();
        let mut failure = None;
        while let Some(item) = stream.next().await {
            match item {
                Ok(bytes) => data.extend_from_slice(&bytes),
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }
        (data, failure)
    }

    #[test]
    fn test_slice_single_part() {
        let window = PartWindow {
            offset: 0,
            first_part_cut: 2,
            last_part_cut: 5,
            part_count: 1,
            chunk_size: 8,
        };
        let chunk = Bytes::from_static(b"abcdefgh");
        assert_eq!(window.slice(1, &chunk), Bytes::from_static(b"cde"));

        // Short final chunk never panics
        let short = Bytes::from_static(b"ab");
        assert_eq!(window.slice(1, &short), Bytes::new());
    }

    #[test]
    fn test_slice_multi_part() {
        let window = PartWindow {
            offset: 0,
            first_part_cut: 3,
            last_part_cut: 2,
            part_count: 3,
            chunk_size: 4,
        };
        let chunk = Bytes::from_static(b"wxyz");
        assert_eq!(window.slice(1, &chunk), Bytes::from_static(b"z"));
        assert_eq!(window.slice(2, &chunk), Bytes::from_static(b"wxyz"));
        assert_eq!(window.slice(3, &chunk), Bytes::from_static(b"wx"));
    }

    #[tokio::test]
    async fn test_streams_whole_file() {
        let f = fixture(1, 2);
        let data = payload(3 * CHUNK as usize + 100);
        let descriptor = Arc::new(f.network.add_document("a", 2, data.clone()));

        let stream = f
            .pipeline
            .stream(descriptor, window_for(None, data.len() as u64))
            .unwrap();
        let (bytes, failure) = collect(stream).await;

        assert!(failure.is_none());
        assert_eq!(bytes, data.to_vec());
        assert_eq!(f.network.stats().get_file_calls, 4);
    }

    #[tokio::test]
    async fn test_streams_exact_range() {
        let f = fixture(1, 2);
        let data = payload(5 * CHUNK as usize);
        let descriptor = Arc::new(f.network.add_document("a", 2, data.clone()));

        let range = ByteRangeSpec::FromTo {
            start: CHUNK - 3,
            end: 3 * CHUNK + 10,
        };
        let stream = f
            .pipeline
            .stream(descriptor, window_for(Some(range), data.len() as u64))
            .unwrap();
        let (bytes, failure) = collect(stream).await;

        assert!(failure.is_none());
        assert_eq!(bytes, data[(CHUNK - 3) as usize..=(3 * CHUNK + 10) as usize].to_vec());
    }

    #[tokio::test]
    async fn test_workload_tracks_stream_lifetime() {
        let f = fixture(2, 2);
        let data = payload(2 * CHUNK as usize);
        let descriptor = Arc::new(f.network.add_document("a", 2, data.clone()).with_connection(1));

        let stream = f
            .pipeline
            .stream(descriptor, window_for(None, data.len() as u64))
            .unwrap();
        assert_eq!(f.workloads.snapshot(), vec![0, 1]);

        let (bytes, _) = collect(stream).await;
        assert_eq!(bytes.len(), data.len());
        assert_eq!(f.workloads.snapshot(), vec![0, 0]);
    }

    #[tokio::test]
    async fn test_dropped_stream_releases_workload() {
        let f = fixture(1, 2);
        let data = payload(4 * CHUNK as usize);
        let descriptor = Arc::new(f.network.add_document("a", 2, data.clone()));

        let mut stream = f
            .pipeline
            .stream(descriptor, window_for(None, data.len() as u64))
            .unwrap();
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.len(), CHUNK as usize);
        assert_eq!(f.workloads.load(0), 1);

        drop(stream);
        assert_eq!(f.workloads.load(0), 0);
    }

    #[tokio::test]
    async fn test_unknown_connection_is_rejected() {
        let f = fixture(1, 2);
        let descriptor = Arc::new(FileDescriptor::document(2, 1, 1, 10).with_connection(3));
        let err = f
            .pipeline
            .stream(descriptor, window_for(None, 10))
            .err()
            .unwrap();
        assert!(matches!(err, StreamError::UnknownConnection(3)));
    }

    #[tokio::test]
    async fn test_timeout_ends_stream_gracefully() {
        let f = fixture(1, 2);
        let data = payload(3 * CHUNK as usize);
        let descriptor = Arc::new(f.network.add_document("a", 2, data.clone()));

        f.network.time_out(1);
        let stream = f
            .pipeline
            .stream(descriptor, window_for(None, data.len() as u64))
            .unwrap();
        let (bytes, failure) = collect(stream).await;

        assert!(failure.is_none());
        assert!(bytes.is_empty());
        assert_eq!(f.workloads.load(0), 0);
    }

    #[tokio::test]
    async fn test_transport_failure_invalidates_session() {
        let f = fixture(1, 2);
        let data = payload(CHUNK as usize);
        let descriptor = Arc::new(f.network.add_document("a", 2, data.clone()));
        let window = window_for(None, data.len() as u64);

        f.network.fail_transport(1);
        let (_, failure) = collect(f.pipeline.stream(Arc::clone(&descriptor), window).unwrap()).await;
        assert!(matches!(
            failure,
            Some(StreamError::Upstream(RpcError::Transport(_)))
        ));
        assert_eq!(f.sessions.stats().invalidated, 1);
        assert_eq!(f.sessions.active_sessions(), 0);

        // The next call builds a fresh session and succeeds
        let (bytes, failure) = collect(f.pipeline.stream(descriptor, window).unwrap()).await;
        assert!(failure.is_none());
        assert_eq!(bytes, data.to_vec());
        assert_eq!(f.network.stats().media_sessions_started, 2);
    }

    #[tokio::test]
    async fn test_foreign_dc_stream() {
        let f = fixture(1, 2);
        let data = payload(CHUNK as usize + 1);
        let descriptor = Arc::new(f.network.add_document("a", 4, data.clone()));

        let (bytes, failure) = collect(
            f.pipeline
                .stream(descriptor, window_for(None, data.len() as u64))
                .unwrap(),
        )
        .await;
        assert!(failure.is_none());
        assert_eq!(bytes, data.to_vec());
        assert_eq!(f.network.stats().imports, 1);
    }

    fn cdn_fixture(len: usize) -> (Fixture, Arc<FileDescriptor>, Bytes) {
        let f = fixture(1, 2);
        let data = payload(len);
        let descriptor = Arc::new(f.network.add_document("a", 2, data.clone()));
        f.network.place_on_cdn(
            "a",
            CdnPlacement::new(201).with_segments(4096, CHUNK as usize),
        );
        (f, descriptor, data)
    }

    #[tokio::test]
    async fn test_cdn_stream_decrypts_and_verifies() {
        let (f, descriptor, data) = cdn_fixture(3 * CHUNK as usize + 77);

        let range = ByteRangeSpec::From { start: 100 };
        let (bytes, failure) = collect(
            f.pipeline
                .stream(descriptor, window_for(Some(range), data.len() as u64))
                .unwrap(),
        )
        .await;

        assert!(failure.is_none(), "{failure:?}");
        assert_eq!(bytes, data[100..].to_vec());

        let stats = f.network.stats();
        assert_eq!(stats.cdn_sessions_started, 1);
        assert_eq!(stats.cdn_sessions_stopped, 1);
        assert_eq!(stats.hash_requests, 4);
        assert_eq!(f.workloads.cdn_redirects(0), 1);
    }

    #[tokio::test]
    async fn test_cdn_hash_mismatch_aborts() {
        let (f, descriptor, data) = cdn_fixture(2 * CHUNK as usize);
        f.network.corrupt_cdn_hashes(true);

        let (bytes, failure) = collect(
            f.pipeline
                .stream(descriptor, window_for(None, data.len() as u64))
                .unwrap(),
        )
        .await;

        assert!(bytes.is_empty());
        assert!(failure.unwrap().is_integrity_failure());
        assert_eq!(f.network.stats().cdn_sessions_stopped, 1);
        assert_eq!(f.workloads.load(0), 0);
    }

    #[tokio::test]
    async fn test_cdn_reupload_then_retry() {
        let (f, descriptor, data) = cdn_fixture(2 * CHUNK as usize);
        f.network.require_reuploads(2);

        let (bytes, failure) = collect(
            f.pipeline
                .stream(descriptor, window_for(None, data.len() as u64))
                .unwrap(),
        )
        .await;

        assert!(failure.is_none());
        assert_eq!(bytes, data.to_vec());
        let stats = f.network.stats();
        assert_eq!(stats.reuploads, 2);
        assert_eq!(stats.cdn_file_calls, 4);
    }

    #[tokio::test]
    async fn test_cdn_missing_volume_ends_stream() {
        let (f, descriptor, data) = cdn_fixture(2 * CHUNK as usize);
        f.network.require_reuploads(1);
        f.network.lose_reupload_volume(true);

        let (bytes, failure) = collect(
            f.pipeline
                .stream(descriptor, window_for(None, data.len() as u64))
                .unwrap(),
        )
        .await;

        assert!(failure.is_none());
        assert!(bytes.is_empty());
        assert_eq!(f.network.stats().cdn_sessions_stopped, 1);
    }

    #[tokio::test]
    async fn test_dropped_cdn_stream_stops_cdn_session() {
        let (f, descriptor, data) = cdn_fixture(4 * CHUNK as usize);

        let mut stream = f
            .pipeline
            .stream(descriptor, window_for(None, data.len() as u64))
            .unwrap();
        stream.next().await.unwrap().unwrap();
        drop(stream);

        // The stop runs on a spawned task
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(f.network.stats().cdn_sessions_stopped, 1);
        assert_eq!(f.workloads.load(0), 0);
    }

    #[tokio::test]
    async fn test_empty_window_yields_nothing() {
        let f = fixture(1, 2);
        let descriptor = Arc::new(f.network.add_document("a", 2, Bytes::new()));

        let (bytes, failure) = collect(
            f.pipeline
                .stream(descriptor, PartWindow::empty(CHUNK))
                .unwrap(),
        )
        .await;
        assert!(failure.is_none());
        assert!(bytes.is_empty());
        assert_eq!(f.network.stats().get_file_calls, 0);
    }

    mock! {
        Notifier {}

        #[async_trait]
        impl OpsNotifier for Notifier {
            async fn notify(&self, message: &str);
        }
    }

    fn expect_notices(f: Fixture, messages: &'static [&'static str]) -> Fixture {
        let mut notifier = MockNotifier::new();
        for message in messages {
            notifier
                .expect_notify()
                .withf(move |sent: &str| sent == *message)
                .times(1)
                .return_const(());
        }
        Fixture {
            pipeline: f
                .pipeline
                .with_flood_policy(FloodWaitPolicy::new(3, Arc::new(notifier))),
            ..f
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_flood_wait_mid_stream_is_slept_through() {
        let f = expect_notices(
            fixture(1, 2),
            &["Got FloodWait of 1s while fetching upload.getFile"],
        );
        let data = payload(10_000);
        let descriptor = Arc::new(f.network.add_document("a", 2, data.clone()));

        f.network.flood_wait_requests(1, 1);
        let started = tokio::time::Instant::now();
        let (bytes, failure) = collect(
            f.pipeline
                .stream(descriptor, window_for(None, data.len() as u64))
                .unwrap(),
        )
        .await;

        assert!(failure.is_none(), "{failure:?}");
        assert_eq!(bytes, data.to_vec());
        assert!(started.elapsed() >= Duration::from_secs(1));
        assert_eq!(f.network.stats().get_file_calls, 2);
        assert_eq!(f.workloads.load(0), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flood_wait_while_importing_authorization() {
        let f = expect_notices(
            fixture(1, 2),
            &["Got FloodWait of 2s while opening a media session"],
        );
        let data = payload(CHUNK as usize);
        let descriptor = Arc::new(f.network.add_document("a", 4, data.clone()));

        f.network.flood_wait_requests(1, 2);
        let (bytes, failure) = collect(
            f.pipeline
                .stream(descriptor, window_for(None, data.len() as u64))
                .unwrap(),
        )
        .await;

        assert!(failure.is_none(), "{failure:?}");
        assert_eq!(bytes, data.to_vec());
        let stats = f.network.stats();
        assert_eq!(stats.media_sessions_started, 2);
        assert_eq!(stats.media_sessions_stopped, 1);
        assert_eq!(stats.imports, 1);
        assert_eq!(f.sessions.active_sessions(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flood_wait_on_cdn_requests() {
        let (f, descriptor, data) = cdn_fixture(2 * CHUNK as usize + 10);
        let f = expect_notices(
            f,
            &[
                "Got FloodWait of 1s while fetching upload.getFile",
                "Got FloodWait of 1s while fetching upload.getCdnFile",
                "Got FloodWait of 1s while fetching upload.getCdnFileHashes",
            ],
        );

        f.network.flood_wait_requests(3, 1);
        let (bytes, failure) = collect(
            f.pipeline
                .stream(descriptor, window_for(None, data.len() as u64))
                .unwrap(),
        )
        .await;

        assert!(failure.is_none(), "{failure:?}");
        assert_eq!(bytes, data.to_vec());
        assert_eq!(f.network.stats().cdn_sessions_stopped, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flood_waits_beyond_limit_fail_stream() {
        let f = fixture(1, 2);
        let data = payload(CHUNK as usize);
        let descriptor = Arc::new(f.network.add_document("a", 2, data.clone()));

        f.network.flood_wait_requests(10, 5);
        let (bytes, failure) = collect(
            f.pipeline
                .stream(descriptor, window_for(None, data.len() as u64))
                .unwrap(),
        )
        .await;

        assert!(bytes.is_empty());
        assert!(matches!(failure, Some(StreamError::RateLimited { seconds: 5 })));
        assert_eq!(f.network.stats().get_file_calls, 0);
        assert_eq!(f.workloads.load(0), 0);
    }

    proptest! {
        #[test]
        fn ranged_stream_matches_slice(
            len in 1usize..(4 * CHUNK as usize),
            a in 0usize..(4 * CHUNK as usize),
            b in 0usize..(4 * CHUNK as usize),
        ) {
            let from = a % len;
            let until = from + b % (len - from);

            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let (bytes, failure) = runtime.block_on(async {
                let f = fixture(1, 2);
                let data = payload(len);
                let descriptor = Arc::new(f.network.add_document("a", 2, data));
                let range = ByteRangeSpec::FromTo { start: from as u64, end: until as u64 };
                collect(f.pipeline.stream(descriptor, window_for(Some(range), len as u64)).unwrap()).await
            });

            prop_assert!(failure.is_none());
            prop_assert_eq!(bytes, payload(len)[from..=until].to_vec());
        }
    }
}
