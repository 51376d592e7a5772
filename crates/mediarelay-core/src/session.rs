//! Media session management
//!
//! Sessions are cached per (connection index, data center). Creating one for
//! a foreign data center needs a fresh auth key plus an exported authorization
//! imported into the new session. Each key has its own async lock so two
//! streams racing for the same data center never build two sessions, while
//! other keys proceed independently.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::descriptor::DcId;
use crate::error::{Result, RpcError, StreamError};
use crate::upstream::{RemoteSession, Request, Response, SessionKind, UpstreamConnection};

/// Export/import round trips attempted before giving up on a data center
pub const AUTH_IMPORT_ATTEMPTS: usize = 6;

type SessionSlot = Arc<Mutex<Option<Arc<dyn RemoteSession>>>>;

/// Cache key of a media session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SessionKey {
    pub connection: usize,
    pub dc_id: DcId,
}

impl SessionKey {
    pub const fn new(connection: usize, dc_id: DcId) -> Self {
        Self { connection, dc_id }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub active: usize,
    pub created: u64,
    pub replaced: u64,
    pub invalidated: u64,
}

#[derive(Default)]
pub struct SessionManager {
    slots: DashMap<SessionKey, SessionSlot>,
    active: AtomicUsize,
    created: AtomicU64,
    replaced: AtomicU64,
    invalidated: AtomicU64,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Started media session for `key`, creating it if needed.
    ///
    /// A cached session that reports itself disconnected is stopped and
    /// replaced.
    pub async fn media_session(
        &self,
        connection: &dyn UpstreamConnection,
        key: SessionKey,
    ) -> Result<Arc<dyn RemoteSession>> {
        let slot = self.slot(key);
        let mut current = slot.lock().await;

        if let Some(session) = current.as_ref() {
            if session.is_started() {
                debug!(dc_id = key.dc_id, "Using cached media session");
                return Ok(Arc::clone(session));
            }

            info!(dc_id = key.dc_id, "Media session disconnected, replacing it");
            if let Some(stale) = current.take() {
                self.active.fetch_sub(1, Ordering::Relaxed);
                stale.stop().await;
            }
            self.replaced.fetch_add(1, Ordering::Relaxed);
        }

        let session = Self::create(connection, key.dc_id).await?;
        *current = Some(Arc::clone(&session));
        self.active.fetch_add(1, Ordering::Relaxed);
        self.created.fetch_add(1, Ordering::Relaxed);

        debug!(
            connection = connection.name(),
            dc_id = key.dc_id,
            "Created media session"
        );
        Ok(session)
    }

    /// Drop `session` from the cache if it is still the one stored under `key`.
    ///
    /// Returns whether anything was removed.
    pub async fn invalidate(&self, key: SessionKey, session: &Arc<dyn RemoteSession>) -> bool {
        let Some(slot) = self.slots.get(&key).map(|slot| Arc::clone(slot.value())) else {
            return false;
        };

        let stale = {
            let mut current = slot.lock().await;
            match current.as_ref() {
                Some(cached) if Arc::ptr_eq(cached, session) => current.take(),
                _ => None,
            }
        };

        match stale {
            Some(stale) => {
                self.active.fetch_sub(1, Ordering::Relaxed);
                info!(dc_id = key.dc_id, "Removing media session");
                stale.stop().await;
                self.invalidated.fetch_add(1, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Sessions currently cached
    pub fn active_sessions(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            active: self.active_sessions(),
            created: self.created.load(Ordering::Relaxed),
            replaced: self.replaced.load(Ordering::Relaxed),
            invalidated: self.invalidated.load(Ordering::Relaxed),
        }
    }

    /// Stop every cached session
    pub async fn shutdown(&self) {
        let slots: Vec<SessionSlot> = self
            .slots
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        for slot in slots {
            let session = slot.lock().await.take();
            if let Some(session) = session {
                self.active.fetch_sub(1, Ordering::Relaxed);
                session.stop().await;
            }
        }
        self.slots.clear();
    }

    fn slot(&self, key: SessionKey) -> SessionSlot {
        Arc::clone(self.slots.entry(key).or_default().value())
    }

    async fn create(
        connection: &dyn UpstreamConnection,
        dc_id: DcId,
    ) -> Result<Arc<dyn RemoteSession>> {
        let test_mode = connection.test_mode().await?;

        if dc_id == connection.home_dc().await? {
            let auth_key = connection.auth_key().await?;
            let session = connection.new_session(dc_id, auth_key, test_mode, SessionKind::Media);
            Self::start(session.as_ref()).await?;
            return Ok(session);
        }

        let auth_key = connection.create_auth_key(dc_id, test_mode).await?;
        let session = connection.new_session(dc_id, auth_key, test_mode, SessionKind::Media);
        Self::start(session.as_ref()).await?;

        if let Err(err) = Self::import_authorization(connection, session.as_ref(), dc_id).await {
            session.stop().await;
            return Err(err);
        }

        Ok(session)
    }

    async fn start(session: &dyn RemoteSession) -> Result<()> {
        if let Err(err) = session.start().await {
            session.stop().await;
            return Err(err.into());
        }
        Ok(())
    }

    async fn import_authorization(
        connection: &dyn UpstreamConnection,
        session: &dyn RemoteSession,
        dc_id: DcId,
    ) -> Result<()> {
        for attempt in 1..=AUTH_IMPORT_ATTEMPTS {
            let request = Request::ExportAuthorization { dc_id };
            let (id, bytes) = match connection.invoke(request).await? {
                Response::ExportedAuthorization { id, bytes } => (id, bytes),
                other => return Err(StreamError::unexpected("auth.exportAuthorization", &other)),
            };

            match session
                .invoke(Request::ImportAuthorization { id, bytes })
                .await
            {
                Ok(_) => return Ok(()),
                Err(RpcError::AuthBytesInvalid) => {
                    debug!(dc_id, attempt, "Invalid authorization bytes");
                }
                Err(err) => return Err(err.into()),
            }
        }

        warn!(dc_id, "Giving up on authorization import");
        Err(StreamError::AuthorizationFailed {
            dc_id,
            attempts: AUTH_IMPORT_ATTEMPTS,
        })
    }
}
