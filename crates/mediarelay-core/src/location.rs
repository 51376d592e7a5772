//! Remote addresses of media blobs
//!
//! A [`FileLocation`] is derived from a [`FileDescriptor`] for every fetch and
//! never stored. The variant is picked from the descriptor's [`FileKind`].
//!
//! [`FileKind`]: crate::descriptor::FileKind

use bytes::Bytes;

use crate::descriptor::{ChatPeer, FileDescriptor, FileKind};
use crate::error::{Result, StreamError};

/// Channel ids are offset from this marker when encoded as peer ids
pub const MAX_CHANNEL_ID: i64 = -1_000_000_000_000;

/// Peer addressed by a chat photo location
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputPeer {
    User { user_id: i64, access_hash: i64 },
    Chat { chat_id: i64 },
    Channel { channel_id: i64, access_hash: i64 },
}

impl InputPeer {
    /// Decode the peer encoded in a chat id.
    ///
    /// Positive ids are users. Negative ids without an access hash are basic
    /// groups, everything else negative is a channel.
    pub const fn from_chat(chat: ChatPeer) -> Self {
        if chat.chat_id > 0 {
            Self::User {
                user_id: chat.chat_id,
                access_hash: chat.access_hash,
            }
        } else if chat.access_hash == 0 {
            Self::Chat {
                chat_id: -chat.chat_id,
            }
        } else {
            Self::Channel {
                channel_id: MAX_CHANNEL_ID - chat.chat_id,
                access_hash: chat.access_hash,
            }
        }
    }
}

/// Fully-qualified remote address of a media blob
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileLocation {
    PeerPhoto {
        peer: InputPeer,
        photo_id: i64,
        big: bool,
    },
    Photo {
        id: i64,
        access_hash: i64,
        file_reference: Bytes,
        thumb_size: String,
    },
    Document {
        id: i64,
        access_hash: i64,
        file_reference: Bytes,
        thumb_size: String,
    },
}

impl FileLocation {
    pub fn from_descriptor(descriptor: &FileDescriptor) -> Result<Self> {
        match descriptor.kind {
            FileKind::ChatPhoto => Self::peer_photo(descriptor),
            kind if kind.is_photo() => Ok(Self::photo(descriptor)),
            _ => Ok(Self::document(descriptor)),
        }
    }

    fn peer_photo(descriptor: &FileDescriptor) -> Result<Self> {
        let chat = descriptor.chat.ok_or(StreamError::MissingChatPeer {
            media_id: descriptor.media_id,
        })?;

        Ok(Self::PeerPhoto {
            peer: InputPeer::from_chat(chat),
            photo_id: descriptor.media_id,
            big: descriptor
                .thumbnail_source
                .is_some_and(crate::descriptor::ThumbnailSource::is_big),
        })
    }

    fn photo(descriptor: &FileDescriptor) -> Self {
        Self::Photo {
            id: descriptor.media_id,
            access_hash: descriptor.access_hash,
            file_reference: descriptor.file_reference.clone(),
            thumb_size: descriptor.thumbnail_size.clone(),
        }
    }

    fn document(descriptor: &FileDescriptor) -> Self {
        Self::Document {
            id: descriptor.media_id,
            access_hash: descriptor.access_hash,
            file_reference: descriptor.file_reference.clone(),
            thumb_size: descriptor.thumbnail_size.clone(),
        }
    }

    /// Media id the location points at
    pub const fn media_id(&self) -> i64 {
        match self {
            Self::PeerPhoto { photo_id, .. } => *photo_id,
            Self::Photo { id, .. } | Self::Document { id, .. } => *id,
        }
    }
}
