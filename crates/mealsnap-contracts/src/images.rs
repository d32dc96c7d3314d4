use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

const HEIF_BRANDS: &[&[u8; 4]] = &[
    b"heic", b"heix", b"hevc", b"hevx", b"heim", b"heis", b"mif1", b"msf1",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Jpeg,
    Png,
    Webp,
    Gif,
    Heic,
}

impl ImageFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Jpeg => "jpeg",
            Self::Png => "png",
            Self::Webp => "webp",
            Self::Gif => "gif",
            Self::Heic => "heic",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Webp => "image/webp",
            Self::Gif => "image/gif",
            Self::Heic => "image/heic",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
            Self::Webp => "webp",
            Self::Gif => "gif",
            Self::Heic => "heic",
        }
    }

    /// Identifies the container from its leading magic bytes.
    ///
    /// Declared MIME types and file extensions are never consulted here.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            return Some(Self::Jpeg);
        }
        if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
            return Some(Self::Png);
        }
        if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
            return Some(Self::Webp);
        }
        if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
            return Some(Self::Gif);
        }
        if bytes.len() >= 12
            && &bytes[4..8] == b"ftyp"
            && HEIF_BRANDS.iter().any(|brand| &bytes[8..12] == *brand)
        {
            return Some(Self::Heic);
        }
        None
    }

    pub fn from_mime(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_lowercase();
        let subtype = normalized.strip_prefix("image/").unwrap_or(&normalized);
        match subtype {
            "jpeg" | "jpg" | "pjpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            "webp" => Some(Self::Webp),
            "gif" => Some(Self::Gif),
            "heic" | "heif" => Some(Self::Heic),
            _ => None,
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lowercase hex SHA-256 of the raw upload bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    pub fn of(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawImage {
    bytes: Vec<u8>,
    declared_mime: Option<String>,
}

impl RawImage {
    pub fn new(bytes: impl Into<Vec<u8>>, declared_mime: Option<String>) -> Self {
        Self {
            bytes: bytes.into(),
            declared_mime: declared_mime
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty()),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn declared_mime(&self) -> Option<&str> {
        self.declared_mime.as_deref()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ImageMetadata {
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    pub has_alpha: bool,
    pub is_animated: bool,
    pub size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DerivativeKind {
    Analysis,
    Thumbnail,
    Archive,
}

impl DerivativeKind {
    pub const ALL: [DerivativeKind; 3] = [Self::Analysis, Self::Thumbnail, Self::Archive];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Analysis => "analysis",
            Self::Thumbnail => "thumbnail",
            Self::Archive => "archive",
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct ProcessedImage {
    pub bytes: Vec<u8>,
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
    pub size: usize,
    pub base64: Option<String>,
}

impl ProcessedImage {
    pub fn summary(&self) -> Value {
        json!({
            "format": self.format.as_str(),
            "width": self.width,
            "height": self.height,
            "size": self.size,
            "base64": self.base64.is_some(),
        })
    }
}

impl fmt::Debug for ProcessedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessedImage")
            .field("format", &self.format)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("size", &self.size)
            .field("base64", &self.base64.as_ref().map(String::len))
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DerivativeSizes {
    pub analysis: usize,
    pub thumbnail: usize,
    pub archive: usize,
}

impl DerivativeSizes {
    pub fn total(&self) -> usize {
        self.analysis + self.thumbnail + self.archive
    }
}

/// What the AI analysis service receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalysisPayload<'a> {
    pub data: &'a str,
    pub mime_type: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedImageSet {
    pub analysis: ProcessedImage,
    pub thumbnail: ProcessedImage,
    pub archive: ProcessedImage,
}

impl DerivedImageSet {
    pub fn get(&self, kind: DerivativeKind) -> &ProcessedImage {
        match kind {
            DerivativeKind::Analysis => &self.analysis,
            DerivativeKind::Thumbnail => &self.thumbnail,
            DerivativeKind::Archive => &self.archive,
        }
    }

    pub fn sizes(&self) -> DerivativeSizes {
        DerivativeSizes {
            analysis: self.analysis.size,
            thumbnail: self.thumbnail.size,
            archive: self.archive.size,
        }
    }

    pub fn analysis_payload(&self) -> Option<AnalysisPayload<'_>> {
        self.analysis.base64.as_deref().map(|data| AnalysisPayload {
            data,
            mime_type: self.analysis.format.mime_type(),
        })
    }

    pub fn summary(&self) -> Value {
        json!({
            "analysis": self.analysis.summary(),
            "thumbnail": self.thumbnail.summary(),
            "archive": self.archive.summary(),
        })
    }
}
