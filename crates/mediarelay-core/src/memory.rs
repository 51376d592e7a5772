//! In-process upstream network
//!
//! [`MemoryNetwork`] plays the part of the remote storage service: it keeps
//! files in memory, hands out sessions per data center, serves CDN copies
//! encrypted with AES-256-CTR together with their segment hashes, and can be
//! told to misbehave in the ways a real upstream does. The server binary uses
//! it to serve a local media directory, and the test suites use it to drive
//! every streaming path.

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use mediarelay_crypto::{CdnCipher, FileHash, sha256};
use serde::Serialize;
use tracing::debug;

use crate::descriptor::{DcId, FileDescriptor, mime_for_extension};
use crate::error::{Result, RpcError};
use crate::location::FileLocation;
use crate::upstream::{
    AuthKey, CdnRedirect, ConnectionPool, RemoteSession, Request, Response, SessionKind,
    UpstreamConnection,
};

/// Default size of one hashed CDN segment
pub const HASH_SEGMENT_SIZE: usize = 128 * 1024;

/// Default span of file covered by one hash request
pub const HASH_WINDOW: usize = 1024 * 1024;

/// Where and how a file is mirrored on a CDN node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CdnPlacement {
    pub dc_id: DcId,
    pub key: [u8; 32],
    pub iv: [u8; 16],
    pub segment_size: usize,
    pub hash_window: usize,
}

impl CdnPlacement {
    /// Placement on `dc_id` with key material derived from the data center id
    pub fn new(dc_id: DcId) -> Self {
        let key = sha256(format!("cdn-key:{dc_id}").as_bytes());
        let digest = sha256(format!("cdn-iv:{dc_id}").as_bytes());
        let mut iv = [0u8; 16];
        iv.copy_from_slice(&digest[..16]);

        Self {
            dc_id,
            key,
            iv,
            segment_size: HASH_SEGMENT_SIZE,
            hash_window: HASH_WINDOW,
        }
    }

    /// Override segment size and hash window, both in bytes
    #[must_use]
    pub fn with_segments(mut self, segment_size: usize, hash_window: usize) -> Self {
        self.segment_size = segment_size.max(1);
        self.hash_window = hash_window.max(1);
        self
    }
}

#[derive(Debug, Clone)]
struct StoredFile {
    descriptor: FileDescriptor,
    data: Bytes,
    cdn: Option<CdnPlacement>,
}

/// Request counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemoryStats {
    pub lookups: u64,
    pub get_file_calls: u64,
    pub cdn_redirects: u64,
    pub cdn_file_calls: u64,
    pub reuploads: u64,
    pub hash_requests: u64,
    pub exports: u64,
    pub imports: u64,
    pub auth_keys_created: u64,
    pub media_sessions_started: u64,
    pub media_sessions_stopped: u64,
    pub cdn_sessions_started: u64,
    pub cdn_sessions_stopped: u64,
}

#[derive(Debug, Default)]
struct Counters {
    lookups: AtomicU64,
    get_file_calls: AtomicU64,
    cdn_redirects: AtomicU64,
    cdn_file_calls: AtomicU64,
    reuploads: AtomicU64,
    hash_requests: AtomicU64,
    exports: AtomicU64,
    imports: AtomicU64,
    auth_keys_created: AtomicU64,
    media_sessions_started: AtomicU64,
    media_sessions_stopped: AtomicU64,
    cdn_sessions_started: AtomicU64,
    cdn_sessions_stopped: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Consume one pending fault, returning whether one was pending
fn take(pending: &AtomicUsize) -> bool {
    pending
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[derive(Debug, Default)]
struct Faults {
    corrupt_hashes: AtomicBool,
    volume_missing: AtomicBool,
    reuploads_needed: AtomicUsize,
    invalid_auth_imports: AtomicUsize,
    transport_failures: AtomicUsize,
    timeouts: AtomicUsize,
    flood_waits: AtomicUsize,
    flood_wait_seconds: AtomicU64,
    request_flood_waits: AtomicUsize,
    request_flood_wait_seconds: AtomicU64,
}

impl Faults {
    /// Cooldown for the next session or connection request, if one is pending
    fn request_flood_wait(&self) -> Option<RpcError> {
        take(&self.request_flood_waits).then(|| RpcError::FloodWait {
            seconds: self.request_flood_wait_seconds.load(Ordering::SeqCst),
        })
    }
}

#[derive(Debug, Default)]
struct Shared {
    files: DashMap<String, StoredFile>,
    by_media: DashMap<i64, String>,
    by_token: DashMap<Bytes, String>,
    next_media_id: AtomicI64,
    next_export_id: AtomicI64,
    generation: AtomicU64,
    faults: Faults,
    counters: Counters,
}

impl Shared {
    fn file_by_media(&self, media_id: i64) -> Option<StoredFile> {
        let file_id = self.by_media.get(&media_id)?.value().clone();
        self.files.get(&file_id).map(|file| file.value().clone())
    }

    fn file_by_token(&self, token: &Bytes) -> Option<StoredFile> {
        let file_id = self.by_token.get(token)?.value().clone();
        self.files.get(&file_id).map(|file| file.value().clone())
    }
}

fn cdn_token(media_id: i64) -> Bytes {
    Bytes::from(format!("cdn:{media_id:x}"))
}

fn window(data: &Bytes, offset: u64, limit: u64) -> Bytes {
    let len = data.len() as u64;
    let start = offset.min(len);
    let end = offset.saturating_add(limit).min(len);
    data.slice(start as usize..end as usize)
}

fn rpc(code: i32, message: impl Into<String>) -> RpcError {
    RpcError::Rpc {
        code,
        message: message.into(),
    }
}

/// Shared in-memory upstream; clones refer to the same network
#[derive(Debug, Clone, Default)]
pub struct MemoryNetwork {
    shared: Arc<Shared>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `data` under `file_id`; the descriptor's size is taken from the data
    pub fn add_file(&self, file_id: &str, mut descriptor: FileDescriptor, data: Bytes) {
        descriptor.file_size = data.len() as u64;
        self.shared
            .by_media
            .insert(descriptor.media_id, file_id.to_string());
        self.shared
            .by_token
            .insert(cdn_token(descriptor.media_id), file_id.to_string());

        let cdn = self
            .shared
            .files
            .get(file_id)
            .and_then(|existing| existing.cdn.clone());
        self.shared.files.insert(
            file_id.to_string(),
            StoredFile {
                descriptor,
                data,
                cdn,
            },
        );
    }

    /// Store `data` as a plain document on `dc_id`
    pub fn add_document(&self, file_id: &str, dc_id: DcId, data: Bytes) -> FileDescriptor {
        let descriptor = self.new_document(file_id, dc_id, &data);
        self.add_file(file_id, descriptor.clone(), data);
        descriptor
    }

    fn new_document(&self, file_id: &str, dc_id: DcId, data: &[u8]) -> FileDescriptor {
        let media_id = self.shared.next_media_id.fetch_add(1, Ordering::Relaxed) + 1;
        let digest = sha256(file_id.as_bytes());
        let mut hash = [0u8; 8];
        hash.copy_from_slice(&digest[..8]);

        let mut descriptor =
            FileDescriptor::document(dc_id, media_id, i64::from_be_bytes(hash), data.len() as u64);
        descriptor.file_reference = Bytes::copy_from_slice(&sha256(data)[..8]);
        descriptor
    }

    /// Mirror an existing file onto a CDN node; returns false if it is unknown
    pub fn place_on_cdn(&self, file_id: &str, placement: CdnPlacement) -> bool {
        match self.shared.files.get_mut(file_id) {
            Some(mut file) => {
                file.cdn = Some(placement);
                true
            }
            None => false,
        }
    }

    pub fn remove_file(&self, file_id: &str) -> bool {
        self.shared.files.remove(file_id).is_some()
    }

    pub fn file_count(&self) -> usize {
        self.shared.files.len()
    }

    /// Register every regular file in `dir` as a document on `dc_id`.
    ///
    /// File ids are the file names. Returns the registered ids, sorted.
    pub async fn load_dir(&self, dir: &Path, dc_id: DcId) -> io::Result<Vec<String>> {
        let mut entries = tokio::fs::read_dir(dir).await?;
        let mut loaded = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let Some(file_id) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };

            let data = Bytes::from(tokio::fs::read(entry.path()).await?);
            let mime = entry
                .path()
                .extension()
                .and_then(|ext| ext.to_str())
                .map_or(crate::descriptor::DEFAULT_MIME_TYPE, mime_for_extension);

            let descriptor = self
                .new_document(&file_id, dc_id, &data)
                .with_mime_type(mime)
                .with_file_name(file_id.clone());
            self.add_file(&file_id, descriptor, data);
            loaded.push(file_id);
        }

        loaded.sort();
        debug!(count = loaded.len(), dir = %dir.display(), "Loaded media directory");
        Ok(loaded)
    }

    /// Flip a byte in every hash served from now on
    pub fn corrupt_cdn_hashes(&self, corrupt: bool) {
        self.shared
            .faults
            .corrupt_hashes
            .store(corrupt, Ordering::SeqCst);
    }

    /// Answer the next `count` CDN chunk requests with a reupload demand
    pub fn require_reuploads(&self, count: usize) {
        self.shared
            .faults
            .reuploads_needed
            .store(count, Ordering::SeqCst);
    }

    /// Make reupload requests fail because the origin lost the file
    pub fn lose_reupload_volume(&self, lost: bool) {
        self.shared
            .faults
            .volume_missing
            .store(lost, Ordering::SeqCst);
    }

    /// Reject the next `count` authorization imports as invalid
    pub fn reject_auth_imports(&self, count: usize) {
        self.shared
            .faults
            .invalid_auth_imports
            .store(count, Ordering::SeqCst);
    }

    /// Break the transport on the next `count` file requests
    pub fn fail_transport(&self, count: usize) {
        self.shared
            .faults
            .transport_failures
            .store(count, Ordering::SeqCst);
    }

    /// Time out the next `count` file or CDN chunk requests
    pub fn time_out(&self, count: usize) {
        self.shared.faults.timeouts.store(count, Ordering::SeqCst);
    }

    /// Demand a cooldown on the next `count` metadata lookups
    pub fn flood_wait(&self, count: usize, seconds: u64) {
        let faults = &self.shared.faults;
        faults.flood_wait_seconds.store(seconds, Ordering::SeqCst);
        faults.flood_waits.store(count, Ordering::SeqCst);
    }

    /// Demand a cooldown on the next `count` RPC requests, whether sent over
    /// a session or the connection itself
    pub fn flood_wait_requests(&self, count: usize, seconds: u64) {
        let faults = &self.shared.faults;
        faults
            .request_flood_wait_seconds
            .store(seconds, Ordering::SeqCst);
        faults.request_flood_waits.store(count, Ordering::SeqCst);
    }

    /// Mark every session opened so far as disconnected
    pub fn disconnect_all(&self) {
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
    }

    pub fn stats(&self) -> MemoryStats {
        let c = &self.shared.counters;
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        MemoryStats {
            lookups: load(&c.lookups),
            get_file_calls: load(&c.get_file_calls),
            cdn_redirects: load(&c.cdn_redirects),
            cdn_file_calls: load(&c.cdn_file_calls),
            reuploads: load(&c.reuploads),
            hash_requests: load(&c.hash_requests),
            exports: load(&c.exports),
            imports: load(&c.imports),
            auth_keys_created: load(&c.auth_keys_created),
            media_sessions_started: load(&c.media_sessions_started),
            media_sessions_stopped: load(&c.media_sessions_stopped),
            cdn_sessions_started: load(&c.cdn_sessions_started),
            cdn_sessions_stopped: load(&c.cdn_sessions_stopped),
        }
    }

    /// Connection logged into `home_dc`
    pub fn connection(&self, name: &str, home_dc: DcId) -> MemoryConnection {
        MemoryConnection {
            shared: Arc::clone(&self.shared),
            name: name.to_string(),
            home_dc,
            auth_key: AuthKey::new(sha256(format!("home:{name}").as_bytes()).to_vec()),
        }
    }

    /// Pool of `size` connections, all logged into `home_dc`
    pub fn pool(&self, size: usize, home_dc: DcId) -> Result<ConnectionPool> {
        ConnectionPool::new(
            (0..size)
                .map(|index| {
                    Arc::new(self.connection(&format!("memory-{index}"), home_dc))
                        as Arc<dyn UpstreamConnection>
                })
                .collect(),
        )
    }
}

/// Connection into a [`MemoryNetwork`]
#[derive(Debug)]
pub struct MemoryConnection {
    shared: Arc<Shared>,
    name: String,
    home_dc: DcId,
    auth_key: AuthKey,
}

#[async_trait]
impl UpstreamConnection for MemoryConnection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn home_dc(&self) -> std::result::Result<DcId, RpcError> {
        Ok(self.home_dc)
    }

    async fn auth_key(&self) -> std::result::Result<AuthKey, RpcError> {
        Ok(self.auth_key.clone())
    }

    async fn test_mode(&self) -> std::result::Result<bool, RpcError> {
        Ok(false)
    }

    async fn create_auth_key(
        &self,
        dc_id: DcId,
        _test_mode: bool,
    ) -> std::result::Result<AuthKey, RpcError> {
        let serial = self
            .shared
            .counters
            .auth_keys_created
            .fetch_add(1, Ordering::Relaxed);
        Ok(AuthKey::new(
            sha256(format!("{}:{dc_id}:{serial}", self.name).as_bytes()).to_vec(),
        ))
    }

    fn new_session(
        &self,
        dc_id: DcId,
        _auth_key: AuthKey,
        _test_mode: bool,
        kind: SessionKind,
    ) -> Arc<dyn RemoteSession> {
        Arc::new(MemorySession {
            shared: Arc::clone(&self.shared),
            dc_id,
            kind,
            authorized: AtomicBool::new(kind == SessionKind::Cdn || dc_id == self.home_dc),
            started: AtomicBool::new(false),
            generation: AtomicU64::new(0),
        })
    }

    async fn invoke(&self, request: Request) -> std::result::Result<Response, RpcError> {
        if let Some(err) = self.shared.faults.request_flood_wait() {
            return Err(err);
        }

        match request {
            Request::ExportAuthorization { dc_id } => {
                bump(&self.shared.counters.exports);
                let id = self.shared.next_export_id.fetch_add(1, Ordering::Relaxed) + 1;
                Ok(Response::ExportedAuthorization {
                    id,
                    bytes: Bytes::from(format!("auth:{dc_id}:{id}")),
                })
            }
            other => Err(rpc(400, format!("{}_INVALID", other.name()))),
        }
    }

    async fn lookup_file(
        &self,
        file_id: &str,
    ) -> std::result::Result<Option<FileDescriptor>, RpcError> {
        bump(&self.shared.counters.lookups);

        let faults = &self.shared.faults;
        if take(&faults.flood_waits) {
            return Err(RpcError::FloodWait {
                seconds: faults.flood_wait_seconds.load(Ordering::SeqCst),
            });
        }

        Ok(self
            .shared
            .files
            .get(file_id)
            .map(|file| file.descriptor.clone()))
    }
}

/// Session opened by a [`MemoryConnection`]
#[derive(Debug)]
struct MemorySession {
    shared: Arc<Shared>,
    dc_id: DcId,
    kind: SessionKind,
    authorized: AtomicBool,
    started: AtomicBool,
    generation: AtomicU64,
}

impl MemorySession {
    fn get_file(
        &self,
        location: &FileLocation,
        offset: u64,
        limit: u64,
    ) -> std::result::Result<Response, RpcError> {
        let counters = &self.shared.counters;
        let faults = &self.shared.faults;
        bump(&counters.get_file_calls);

        if take(&faults.transport_failures) {
            self.started.store(false, Ordering::SeqCst);
            return Err(io::Error::new(io::ErrorKind::ConnectionReset, "connection lost").into());
        }
        if take(&faults.timeouts) {
            return Err(RpcError::Timeout);
        }
        if !self.authorized.load(Ordering::SeqCst) {
            return Err(rpc(401, "AUTH_KEY_UNREGISTERED"));
        }

        let file = self
            .shared
            .file_by_media(location.media_id())
            .ok_or_else(|| rpc(400, "FILE_ID_INVALID"))?;
        if file.descriptor.dc_id != self.dc_id {
            return Err(rpc(303, format!("FILE_MIGRATE_{}", file.descriptor.dc_id)));
        }

        if let Some(cdn) = file.cdn {
            bump(&counters.cdn_redirects);
            return Ok(Response::FileCdnRedirect(CdnRedirect {
                dc_id: cdn.dc_id,
                file_token: cdn_token(file.descriptor.media_id),
                encryption_key: Bytes::copy_from_slice(&cdn.key),
                encryption_iv: Bytes::copy_from_slice(&cdn.iv),
                file_hashes: Vec::new(),
            }));
        }

        Ok(Response::File {
            bytes: window(&file.data, offset, limit),
        })
    }

    fn get_cdn_file(
        &self,
        token: &Bytes,
        offset: u64,
        limit: u64,
    ) -> std::result::Result<Response, RpcError> {
        let faults = &self.shared.faults;
        bump(&self.shared.counters.cdn_file_calls);

        if self.kind != SessionKind::Cdn {
            return Err(rpc(400, "CDN_METHOD_INVALID"));
        }
        if take(&faults.timeouts) {
            return Err(RpcError::Timeout);
        }
        if take(&faults.reuploads_needed) {
            return Ok(Response::CdnFileReuploadNeeded {
                request_token: Bytes::from_static(b"reupload"),
            });
        }

        let (file, cdn) = self.cdn_file(token)?;
        let plain = window(&file.data, offset, limit);
        let cipher =
            CdnCipher::new(&cdn.key, &cdn.iv).map_err(|err| RpcError::Malformed(err.to_string()))?;
        let encrypted = cipher
            .encrypt(offset, &plain)
            .map_err(|err| RpcError::Malformed(err.to_string()))?;

        Ok(Response::CdnFile {
            bytes: Bytes::from(encrypted),
        })
    }

    fn cdn_hashes(&self, token: &Bytes, offset: u64) -> std::result::Result<Response, RpcError> {
        bump(&self.shared.counters.hash_requests);

        let (file, cdn) = self.cdn_file(token)?;
        let len = file.data.len();
        let start = (offset as usize).min(len);
        let end = start.saturating_add(cdn.hash_window).min(len);

        let mut hashes = Vec::new();
        let mut segment = start;
        while segment < end {
            let segment_end = segment.saturating_add(cdn.segment_size).min(len);
            hashes.push(FileHash::for_segment(
                segment as u64,
                &file.data[segment..segment_end],
            ));
            segment = segment_end;
        }

        if self.shared.faults.corrupt_hashes.load(Ordering::SeqCst) {
            if let Some(byte) = hashes.first_mut().and_then(|hash| hash.hash.first_mut()) {
                *byte ^= 0xFF;
            }
        }

        Ok(Response::CdnFileHashes(hashes))
    }

    fn cdn_file(
        &self,
        token: &Bytes,
    ) -> std::result::Result<(StoredFile, CdnPlacement), RpcError> {
        let file = self
            .shared
            .file_by_token(token)
            .ok_or_else(|| rpc(400, "FILE_TOKEN_INVALID"))?;
        let cdn = file
            .cdn
            .clone()
            .ok_or_else(|| rpc(400, "FILE_TOKEN_INVALID"))?;
        Ok((file, cdn))
    }
}

#[async_trait]
impl RemoteSession for MemorySession {
    fn dc_id(&self) -> DcId {
        self.dc_id
    }

    fn kind(&self) -> SessionKind {
        self.kind
    }

    async fn start(&self) -> std::result::Result<(), RpcError> {
        self.generation.store(
            self.shared.generation.load(Ordering::SeqCst),
            Ordering::SeqCst,
        );
        if !self.started.swap(true, Ordering::SeqCst) {
            let counters = &self.shared.counters;
            match self.kind {
                SessionKind::Media => bump(&counters.media_sessions_started),
                SessionKind::Cdn => bump(&counters.cdn_sessions_started),
            }
        }
        Ok(())
    }

    async fn stop(&self) {
        if self.started.swap(false, Ordering::SeqCst) {
            let counters = &self.shared.counters;
            match self.kind {
                SessionKind::Media => bump(&counters.media_sessions_stopped),
                SessionKind::Cdn => bump(&counters.cdn_sessions_stopped),
            }
        }
    }

    fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
            && self.generation.load(Ordering::SeqCst)
                == self.shared.generation.load(Ordering::SeqCst)
    }

    async fn invoke(&self, request: Request) -> std::result::Result<Response, RpcError> {
        if !self.is_started() {
            return Err(
                io::Error::new(io::ErrorKind::NotConnected, "session is not started").into(),
            );
        }
        if let Some(err) = self.shared.faults.request_flood_wait() {
            return Err(err);
        }

        match request {
            Request::GetFile {
                location,
                offset,
                limit,
            } => self.get_file(&location, offset, limit),
            Request::GetCdnFile {
                file_token,
                offset,
                limit,
            } => self.get_cdn_file(&file_token, offset, limit),
            Request::ReuploadCdnFile { .. } => {
                bump(&self.shared.counters.reuploads);
                if self.shared.faults.volume_missing.load(Ordering::SeqCst) {
                    return Err(RpcError::VolumeLocNotFound);
                }
                Ok(Response::CdnFileHashes(Vec::new()))
            }
            Request::GetCdnFileHashes { file_token, offset } => {
                self.cdn_hashes(&file_token, offset)
            }
            Request::ImportAuthorization { .. } => {
                bump(&self.shared.counters.imports);
                if take(&self.shared.faults.invalid_auth_imports) {
                    return Err(RpcError::AuthBytesInvalid);
                }
                self.authorized.store(true, Ordering::SeqCst);
                Ok(Response::Authorization)
            }
            Request::ExportAuthorization { .. } => Err(rpc(400, "AUTH_EXPORT_INVALID")),
        }
    }
}
