//! Resolved file descriptors

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Identifier of an upstream data center
pub type DcId = i32;

/// MIME type reported when the upstream does not know better
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Kind of media a descriptor points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Thumbnail,
    ChatPhoto,
    Photo,
    Voice,
    Video,
    Document,
    Sticker,
    Audio,
    Animation,
    VideoNote,
}

impl FileKind {
    /// Whether the file is addressed through the photo location variant
    pub const fn is_photo(self) -> bool {
        matches!(self, Self::Photo)
    }

    /// Fallback MIME type for this kind of media
    pub const fn default_mime_type(self) -> &'static str {
        match self {
            Self::Thumbnail | Self::ChatPhoto | Self::Photo => "image/jpeg",
            Self::Voice => "audio/ogg",
            Self::Video | Self::VideoNote | Self::Animation => "video/mp4",
            Self::Sticker => "image/webp",
            Self::Audio => "audio/mpeg",
            Self::Document => DEFAULT_MIME_TYPE,
        }
    }
}

/// Where a thumbnail or profile photo comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThumbnailSource {
    Legacy,
    Thumbnail,
    ChatPhotoSmall,
    ChatPhotoBig,
    StickerSetThumbnail,
}

impl ThumbnailSource {
    /// Profile photos come in two sizes; only the big variant selects the large one
    pub const fn is_big(self) -> bool {
        matches!(self, Self::ChatPhotoBig)
    }
}

/// Peer owning a chat photo
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatPeer {
    pub chat_id: i64,
    pub access_hash: i64,
}

/// Everything needed to fetch a stored media file.
///
/// `connection` is the pool index of the upstream connection that resolved
/// the descriptor; every later fetch for it goes through the same connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDescriptor {
    pub dc_id: DcId,
    pub media_id: i64,
    pub access_hash: i64,
    pub file_reference: Bytes,
    pub kind: FileKind,
    pub thumbnail_size: String,
    pub thumbnail_source: Option<ThumbnailSource>,
    pub chat: Option<ChatPeer>,
    pub connection: usize,
    pub unique_id: String,
    pub file_size: u64,
    pub mime_type: Option<String>,
    pub file_name: Option<String>,
}

impl FileDescriptor {
    /// Descriptor for a plain document stored in `dc_id`
    pub fn document(dc_id: DcId, media_id: i64, access_hash: i64, file_size: u64) -> Self {
        Self {
            dc_id,
            media_id,
            access_hash,
            file_reference: Bytes::new(),
            kind: FileKind::Document,
            thumbnail_size: String::new(),
            thumbnail_source: None,
            chat: None,
            connection: 0,
            unique_id: format!("{media_id:x}"),
            file_size,
            mime_type: None,
            file_name: None,
        }
    }

    #[must_use]
    pub fn with_kind(mut self, kind: FileKind) -> Self {
        self.kind = kind;
        self
    }

    #[must_use]
    pub fn with_connection(mut self, connection: usize) -> Self {
        self.connection = connection;
        self
    }

    #[must_use]
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    #[must_use]
    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    #[must_use]
    pub fn with_chat(mut self, chat: ChatPeer, source: ThumbnailSource) -> Self {
        self.chat = Some(chat);
        self.thumbnail_source = Some(source);
        self
    }

    /// MIME type to advertise, falling back on the media kind
    pub fn content_type(&self) -> &str {
        self.mime_type
            .as_deref()
            .filter(|mime| !mime.is_empty())
            .unwrap_or_else(|| self.kind.default_mime_type())
    }

    /// File name to advertise, synthesized from the unique id when absent
    pub fn display_name(&self) -> String {
        match self.file_name.as_deref().filter(|name| !name.is_empty()) {
            Some(name) => name.to_string(),
            None => format!(
                "{}.{}",
                self.unique_id,
                extension_for_mime(self.content_type())
            ),
        }
    }
}

/// Guess a file extension from a MIME type
pub fn extension_for_mime(mime: &str) -> &'static str {
    match mime {
        "video/mp4" => "mp4",
        "video/x-matroska" => "mkv",
        "video/webm" => "webm",
        "audio/mpeg" => "mp3",
        "audio/ogg" => "ogg",
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/webp" => "webp",
        "application/pdf" => "pdf",
        "application/zip" => "zip",
        "text/plain" => "txt",
        _ => "bin",
    }
}

/// Guess a MIME type from a file extension
pub fn mime_for_extension(extension: &str) -> &'static str {
    match extension.to_ascii_lowercase().as_str() {
        "mp4" | "m4v" => "video/mp4",
        "mkv" => "video/x-matroska",
        "webm" => "video/webm",
        "mp3" => "audio/mpeg",
        "ogg" | "oga" => "audio/ogg",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "txt" => "text/plain",
        _ => DEFAULT_MIME_TYPE,
    }
}
