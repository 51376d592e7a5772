//! Error types for streaming operations

use std::time::Duration;

use mediarelay_crypto::CryptoError;
use thiserror::Error;

use crate::descriptor::DcId;
use crate::upstream::Response;

/// Failures reported by the remote protocol client
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("Invalid authorization bytes")]
    AuthBytesInvalid,

    #[error("Volume location not found")]
    VolumeLocNotFound,

    #[error("Flood wait of {seconds} seconds required")]
    FloodWait { seconds: u64 },

    #[error("Request timed out")]
    Timeout,

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i32, message: String },
}

impl RpcError {
    /// Whether this failure means the upstream simply stopped answering.
    ///
    /// A stream that hits one of these ends gracefully instead of failing.
    pub const fn ends_stream(&self) -> bool {
        matches!(self, Self::Timeout | Self::Malformed(_))
    }

    /// Whether the underlying connection is broken
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Cooldown demanded by the upstream, if any
    pub const fn flood_wait(&self) -> Option<Duration> {
        match self {
            Self::FloodWait { seconds } => Some(Duration::from_secs(*seconds)),
            _ => None,
        }
    }
}

/// Errors surfaced by the byte-delivery engine
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Upstream error: {0}")]
    Upstream(#[from] RpcError),

    #[error("Authorization import for DC {dc_id} failed after {attempts} attempts")]
    AuthorizationFailed { dc_id: DcId, attempts: usize },

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Upstream connection {0} is not in the pool")]
    UnknownConnection(usize),

    #[error("Connection pool is empty")]
    EmptyPool,

    #[error("Chat photo {media_id} has no owning peer")]
    MissingChatPeer { media_id: i64 },

    #[error("Invalid range for file of {file_size} bytes: {reason}")]
    InvalidRange { file_size: u64, reason: String },

    #[error("Unexpected response {response} to {request}")]
    UnexpectedResponse {
        request: &'static str,
        response: &'static str,
    },

    #[error("Rate limited, upstream asked to wait {seconds} seconds")]
    RateLimited { seconds: u64 },

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl StreamError {
    pub(crate) fn unexpected(request: &'static str, response: &Response) -> Self {
        Self::UnexpectedResponse {
            request,
            response: response.name(),
        }
    }

    /// CDN content failed verification and must not be retried transparently
    pub const fn is_integrity_failure(&self) -> bool {
        matches!(self, Self::Crypto(CryptoError::HashMismatch { .. }))
    }

    /// The requested file does not exist upstream
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::FileNotFound(_))
    }

    /// The requested byte range cannot be served
    pub const fn is_invalid_range(&self) -> bool {
        matches!(self, Self::InvalidRange { .. })
    }

    /// Cooldown demanded by the upstream, if this is a flood wait
    pub const fn flood_wait(&self) -> Option<Duration> {
        match self {
            Self::Upstream(err) => err.flood_wait(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, StreamError>;
