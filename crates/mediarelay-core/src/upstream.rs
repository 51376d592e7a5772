//! Seams to the upstream remote-procedure client
//!
//! The engine never speaks the wire protocol itself. It talks to a pool of
//! [`UpstreamConnection`]s, each of which can open [`RemoteSession`]s to
//! individual data centers.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use mediarelay_crypto::{CdnCipher, CryptoError, FileHash};

use crate::descriptor::{DcId, FileDescriptor};
use crate::error::{Result, RpcError, StreamError};
use crate::location::FileLocation;

/// Authorization key material for a session
#[derive(Clone, PartialEq, Eq)]
pub struct AuthKey(Bytes);

impl AuthKey {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for AuthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthKey")
            .field("len", &self.0.len())
            .finish_non_exhaustive()
    }
}

/// What a session is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionKind {
    /// Long-lived, cached per (connection, data center)
    Media,
    /// Request-scoped, never cached
    Cdn,
}

/// Redirect to an encrypted CDN copy of a file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CdnRedirect {
    pub dc_id: DcId,
    pub file_token: Bytes,
    pub encryption_key: Bytes,
    pub encryption_iv: Bytes,
    pub file_hashes: Vec<FileHash>,
}

impl CdnRedirect {
    /// Cipher for decrypting chunks served by the CDN
    pub fn cipher(&self) -> std::result::Result<CdnCipher, CryptoError> {
        CdnCipher::new(&self.encryption_key, &self.encryption_iv)
    }
}

/// Requests the engine issues upstream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    GetFile {
        location: FileLocation,
        offset: u64,
        limit: u64,
    },
    GetCdnFile {
        file_token: Bytes,
        offset: u64,
        limit: u64,
    },
    ReuploadCdnFile {
        file_token: Bytes,
        request_token: Bytes,
    },
    GetCdnFileHashes {
        file_token: Bytes,
        offset: u64,
    },
    ExportAuthorization {
        dc_id: DcId,
    },
    ImportAuthorization {
        id: i64,
        bytes: Bytes,
    },
}

impl Request {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::GetFile { .. } => "upload.getFile",
            Self::GetCdnFile { .. } => "upload.getCdnFile",
            Self::ReuploadCdnFile { .. } => "upload.reuploadCdnFile",
            Self::GetCdnFileHashes { .. } => "upload.getCdnFileHashes",
            Self::ExportAuthorization { .. } => "auth.exportAuthorization",
            Self::ImportAuthorization { .. } => "auth.importAuthorization",
        }
    }
}

/// Responses the engine understands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    File { bytes: Bytes },
    FileCdnRedirect(CdnRedirect),
    CdnFile { bytes: Bytes },
    CdnFileReuploadNeeded { request_token: Bytes },
    CdnFileHashes(Vec<FileHash>),
    ExportedAuthorization { id: i64, bytes: Bytes },
    Authorization,
}

impl Response {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::File { .. } => "upload.File",
            Self::FileCdnRedirect(_) => "upload.FileCdnRedirect",
            Self::CdnFile { .. } => "upload.CdnFile",
            Self::CdnFileReuploadNeeded { .. } => "upload.CdnFileReuploadNeeded",
            Self::CdnFileHashes(_) => "Vector<FileHash>",
            Self::ExportedAuthorization { .. } => "auth.ExportedAuthorization",
            Self::Authorization => "auth.Authorization",
        }
    }
}

/// A live channel to one data center
#[async_trait]
pub trait RemoteSession: Send + Sync {
    fn dc_id(&self) -> DcId;

    fn kind(&self) -> SessionKind;

    async fn start(&self) -> std::result::Result<(), RpcError>;

    async fn stop(&self);

    /// Whether the session is still connected
    fn is_started(&self) -> bool;

    async fn invoke(&self, request: Request) -> std::result::Result<Response, RpcError>;
}

/// One logged-in upstream client
#[async_trait]
pub trait UpstreamConnection: Send + Sync {
    /// Name used in logs and status output
    fn name(&self) -> &str;

    /// Data center the connection is logged into
    async fn home_dc(&self) -> std::result::Result<DcId, RpcError>;

    /// Key authorized on the home data center
    async fn auth_key(&self) -> std::result::Result<AuthKey, RpcError>;

    async fn test_mode(&self) -> std::result::Result<bool, RpcError>;

    /// Negotiate a fresh key with another data center
    async fn create_auth_key(
        &self,
        dc_id: DcId,
        test_mode: bool,
    ) -> std::result::Result<AuthKey, RpcError>;

    /// Build a session; it is not connected until [`RemoteSession::start`]
    fn new_session(
        &self,
        dc_id: DcId,
        auth_key: AuthKey,
        test_mode: bool,
        kind: SessionKind,
    ) -> Arc<dyn RemoteSession>;

    /// Invoke a request on the connection's own home session
    async fn invoke(&self, request: Request) -> std::result::Result<Response, RpcError>;

    /// Look up the stored message behind an internal file id.
    ///
    /// `Ok(None)` means the message exists but carries no media, or does not
    /// exist at all.
    async fn lookup_file(
        &self,
        file_id: &str,
    ) -> std::result::Result<Option<FileDescriptor>, RpcError>;
}

/// Ordered list of upstream connections, addressed by index
pub struct ConnectionPool {
    connections: Vec<Arc<dyn UpstreamConnection>>,
}

impl ConnectionPool {
    pub fn new(connections: Vec<Arc<dyn UpstreamConnection>>) -> Result<Self> {
        if connections.is_empty() {
            return Err(StreamError::EmptyPool);
        }
        Ok(Self { connections })
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn get(&self, index: usize) -> Result<&Arc<dyn UpstreamConnection>> {
        self.connections
            .get(index)
            .ok_or(StreamError::UnknownConnection(index))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn UpstreamConnection>> {
        self.connections.iter()
    }
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.connections.iter().map(|c| c.name()))
            .finish()
    }
}
