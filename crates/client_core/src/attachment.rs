use std::path::Path;

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::error::{ClientError, ClientResult};

/// Largest file accepted before anything is sent. Base64 grows it by a third, which
/// must still fit the server's default 10 MiB request body.
pub const MAX_ATTACHMENT_BYTES: usize = 7 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    fn mime_prefix(self) -> &'static str {
        match self {
            Self::Image => "image/",
            Self::Video => "video/",
        }
    }
}

/// A picked file, validated and encoded as a `data:` URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaAttachment {
    kind: MediaKind,
    data_url: String,
}

impl MediaAttachment {
    pub fn from_file(kind: MediaKind, mime: &str, bytes: &[u8]) -> ClientResult<Self> {
        let mime = mime.trim().to_ascii_lowercase();
        if !mime.starts_with(kind.mime_prefix()) || mime.len() == kind.mime_prefix().len() {
            return Err(ClientError::InvalidAttachment(format!(
                "expected a {}* file, got '{mime}'",
                kind.mime_prefix()
            )));
        }
        if bytes.is_empty() {
            return Err(ClientError::InvalidAttachment("file is empty".into()));
        }
        if bytes.len() > MAX_ATTACHMENT_BYTES {
            return Err(ClientError::InvalidAttachment(format!(
                "file is {} bytes, limit is {MAX_ATTACHMENT_BYTES}",
                bytes.len()
            )));
        }
        Ok(Self {
            kind,
            data_url: format!("data:{mime};base64,{}", STANDARD.encode(bytes)),
        })
    }

    /// Reads a file from disk, inferring kind and mime type from its extension.
    pub fn from_path(path: &Path) -> ClientResult<Self> {
        let (kind, mime) = media_type_for(path).ok_or_else(|| {
            ClientError::InvalidAttachment(format!("unsupported file type: {}", path.display()))
        })?;
        let bytes = std::fs::read(path).map_err(|err| {
            ClientError::InvalidAttachment(format!("cannot read {}: {err}", path.display()))
        })?;
        Self::from_file(kind, mime, &bytes)
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn data_url(&self) -> &str {
        &self.data_url
    }
}

fn media_type_for(path: &Path) -> Option<(MediaKind, &'static str)> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    let found = match extension.as_str() {
        "png" => (MediaKind::Image, "image/png"),
        "jpg" | "jpeg" => (MediaKind::Image, "image/jpeg"),
        "gif" => (MediaKind::Image, "image/gif"),
        "webp" => (MediaKind::Image, "image/webp"),
        "mp4" => (MediaKind::Video, "video/mp4"),
        "webm" => (MediaKind::Video, "video/webm"),
        "mov" => (MediaKind::Video, "video/quicktime"),
        _ => return None,
    };
    Some(found)
}
