//! Registration of newly uploaded files
//!
//! An upload is admitted by the [`AccessPolicy`], recorded in the
//! [`MetadataStore`], and resolved once so the first viewer finds its
//! descriptor already cached. The caller gets back the public links.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::error::StreamError;
use crate::flood::FloodWaitPolicy;
use crate::resolver::FileResolver;

/// Metadata of an uploaded file as recorded in the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub user_id: i64,
    pub user_name: String,
    pub unique_id: String,
    pub file_name: Option<String>,
    pub file_size: u64,
    pub mime_type: Option<String>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Metadata store unavailable: {0}")]
    Unavailable(String),

    #[error("File {0} is already registered")]
    Duplicate(String),
}

/// Persistent record of uploaded files
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Record `info`, returning the internal file id
    async fn add_file(&self, info: &FileInfo) -> Result<String, StoreError>;

    /// Number of links `user_id` may still generate
    async fn link_availability(&self, user_id: i64) -> Result<u64, StoreError>;
}

/// Why an upload was turned away
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Rejection {
    Banned,
    TermsNotAccepted,
    NotJoined,
}

/// Onboarding checks consulted before an upload is stored
#[async_trait]
pub trait AccessPolicy: Send + Sync {
    async fn is_banned(&self, user_id: i64) -> bool;

    async fn accepted_terms(&self, user_id: i64) -> bool;

    async fn joined_channel(&self, user_id: i64) -> bool;
}

/// Policy admitting everyone
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenAccess;

#[async_trait]
impl AccessPolicy for OpenAccess {
    async fn is_banned(&self, _user_id: i64) -> bool {
        false
    }

    async fn accepted_terms(&self, _user_id: i64) -> bool {
        true
    }

    async fn joined_channel(&self, _user_id: i64) -> bool {
        true
    }
}

/// Which optional onboarding checks apply
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestOptions {
    pub require_terms: bool,
    pub require_membership: bool,
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Upload rejected: {0:?}")]
    Rejected(Rejection),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Stream(#[from] StreamError),
}

/// Public links for a registered file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamLink {
    pub file_id: String,
    pub stream_url: String,
    pub download_url: String,
}

impl StreamLink {
    pub fn new(public_url: &str, file_id: &str) -> Self {
        let base = public_url.trim_end_matches('/');
        Self {
            file_id: file_id.to_string(),
            stream_url: format!("{base}/stream/{file_id}"),
            download_url: format!("{base}/dl/{file_id}"),
        }
    }
}

pub struct Ingest {
    resolver: Arc<FileResolver>,
    store: Arc<dyn MetadataStore>,
    policy: Arc<dyn AccessPolicy>,
    flood: FloodWaitPolicy,
    options: IngestOptions,
    public_url: String,
}

impl Ingest {
    pub fn new(
        resolver: Arc<FileResolver>,
        store: Arc<dyn MetadataStore>,
        policy: Arc<dyn AccessPolicy>,
        flood: FloodWaitPolicy,
        public_url: impl Into<String>,
    ) -> Self {
        Self {
            resolver,
            store,
            policy,
            flood,
            options: IngestOptions::default(),
            public_url: public_url.into(),
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: IngestOptions) -> Self {
        self.options = options;
        self
    }

    pub async fn register(&self, info: FileInfo) -> Result<StreamLink, IngestError> {
        if let Some(rejection) = self.admission(info.user_id).await {
            info!(user_id = info.user_id, ?rejection, "Upload rejected");
            return Err(IngestError::Rejected(rejection));
        }

        let file_id = self.store.add_file(&info).await?;

        let context = format!(
            "registering a file from {} (user {})",
            info.user_name, info.user_id
        );
        self.flood
            .execute(&context, || self.resolver.resolve(&file_id))
            .await?;

        info!(user_id = info.user_id, file_id, "Registered upload");
        Ok(StreamLink::new(&self.public_url, &file_id))
    }

    async fn admission(&self, user_id: i64) -> Option<Rejection> {
        if self.policy.is_banned(user_id).await {
            return Some(Rejection::Banned);
        }
        if self.options.require_terms && !self.policy.accepted_terms(user_id).await {
            return Some(Rejection::TermsNotAccepted);
        }
        if self.options.require_membership && !self.policy.joined_channel(user_id).await {
            return Some(Rejection::NotJoined);
        }
        None
    }
}
