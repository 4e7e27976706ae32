use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::{fmt, path::PathBuf, str::FromStr};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("could not read image: {0}")] ReadFailure(String),
    #[error("unsupported image type '{0}' (expected PNG, JPEG or WEBP)")] UnsupportedMime(String),
    #[error("malformed data URI: {0}")] MalformedDataUri(String),
    #[error("invalid base64 payload: {0}")] InvalidBase64(String),
}

/// The only image types the editor accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageMime {
    #[serde(rename = "image/png")]
    Png,
    #[serde(rename = "image/jpeg")]
    Jpeg,
    #[serde(rename = "image/webp")]
    WebP,
}

impl ImageMime {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::WebP => "image/webp",
        }
    }
}

impl FromStr for ImageMime {
    type Err = EncodeError;

    /// Parameters such as `; charset=...` are ignored, matching is case-insensitive.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let essence = s.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
        match essence.as_str() {
            "image/png" => Ok(Self::Png),
            "image/jpeg" => Ok(Self::Jpeg),
            "image/webp" => Ok(Self::WebP),
            _ => Err(EncodeError::UnsupportedMime(s.to_string())),
        }
    }
}

impl fmt::Display for ImageMime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the bytes of a selected image live.
#[derive(Debug, Clone)]
pub enum Blob {
    Memory(Bytes),
    /// A `data:<mime>;base64,<payload>` string handed over by a browser `FileReader`.
    DataUri(String),
    /// Read lazily; the file may disappear between selection and submission.
    File(PathBuf),
}

#[derive(Debug, Clone)]
pub struct SourceImage {
    name: String,
    mime: ImageMime,
    blob: Blob,
}

impl SourceImage {
    pub fn from_bytes(name: impl Into<String>, mime: ImageMime, bytes: impl Into<Bytes>) -> Self {
        Self { name: name.into(), mime, blob: Blob::Memory(bytes.into()) }
    }

    /// The MIME type is taken from the URI header; the payload is checked for valid base64.
    /// The stored URI is rebuilt from the checked payload, so encoding sends exactly those bytes.
    pub fn from_data_uri(name: impl Into<String>, uri: impl AsRef<str>) -> Result<Self, EncodeError> {
        let (mime, payload) = parse_data_uri(uri.as_ref().trim())?;
        let mime: ImageMime = mime.parse()?;
        let payload = payload.trim();
        decode(payload)?;
        Ok(Self { name: name.into(), mime, blob: Blob::DataUri(format_data_uri(mime.as_str(), payload)) })
    }

    pub fn from_path(path: impl Into<PathBuf>, mime: ImageMime) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());
        Self { name, mime, blob: Blob::File(path) }
    }

    pub fn name(&self) -> &str { &self.name }

    pub fn mime(&self) -> ImageMime { self.mime }

    /// Size in bytes, if the blob is still readable.
    pub fn size(&self) -> Option<u64> {
        match &self.blob {
            Blob::Memory(bytes) => Some(bytes.len() as u64),
            Blob::DataUri(_) => self.read().ok().map(|b| b.len() as u64),
            Blob::File(path) => std::fs::metadata(path).ok().map(|m| m.len()),
        }
    }

    pub fn read(&self) -> Result<Bytes, EncodeError> {
        match &self.blob {
            Blob::Memory(bytes) => Ok(bytes.clone()),
            Blob::DataUri(uri) => {
                let (_, payload) = parse_data_uri(uri)?;
                decode(payload).map(Bytes::from)
            }
            Blob::File(path) => std::fs::read(path)
                .map(Bytes::from)
                .map_err(|e| EncodeError::ReadFailure(format!("{}: {}", path.display(), e))),
        }
    }

    /// Data URI for displaying the selected image back to the user.
    pub fn preview_uri(&self) -> Option<String> {
        match &self.blob {
            Blob::DataUri(uri) => Some(uri.clone()),
            _ => encode(self).ok().map(|p| p.to_data_uri()),
        }
    }
}

/// Base64 payload plus the MIME type it was declared with. Never cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPayload {
    pub data: String,
    pub mime: ImageMime,
}

impl EncodedPayload {
    pub fn to_data_uri(&self) -> String {
        format_data_uri(self.mime.as_str(), &self.data)
    }
}

pub fn encode(image: &SourceImage) -> Result<EncodedPayload, EncodeError> {
    let data = match &image.blob {
        Blob::DataUri(uri) => strip_data_uri_prefix(uri)?.to_string(),
        _ => base64::engine::general_purpose::STANDARD.encode(image.read()?),
    };
    Ok(EncodedPayload { data, mime: image.mime })
}

pub fn decode(payload: &str) -> Result<Vec<u8>, EncodeError> {
    base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| EncodeError::InvalidBase64(e.to_string()))
}

pub fn format_data_uri(mime: &str, payload: &str) -> String {
    format!("data:{mime};base64,{payload}")
}

/// Splits `data:<mime>;base64,<payload>` into `(mime, payload)`.
pub fn parse_data_uri(uri: &str) -> Result<(&str, &str), EncodeError> {
    let rest = uri
        .strip_prefix("data:")
        .ok_or_else(|| EncodeError::MalformedDataUri("missing 'data:' scheme".into()))?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| EncodeError::MalformedDataUri("missing ',' separator".into()))?;
    let mime = header
        .strip_suffix(";base64")
        .ok_or_else(|| EncodeError::MalformedDataUri("only base64 data URIs are supported".into()))?;
    Ok((mime, payload))
}

pub fn strip_data_uri_prefix(uri: &str) -> Result<&str, EncodeError> {
    parse_data_uri(uri).map(|(_, payload)| payload)
}
