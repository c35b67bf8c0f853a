use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Failures while resolving or downloading an image
#[derive(Debug, Error)]
pub enum AssetError {
    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("HTTP error: status {0}")]
    Status(u16),
    #[error("Object not found: {0}")]
    MissingObject(String),
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("Payload is not a recognised image ({0} bytes)")]
    Undecodable(usize),
}

/// Resolves object paths in cloud storage to downloadable URLs.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn resolve_download_url(&self, path: &str) -> Result<Url, AssetError>;
}

/// Downloads raw bytes from a resolved URL.
#[async_trait]
pub trait ImageClient: Send + Sync {
    async fn get(&self, url: &Url) -> Result<Bytes, AssetError>;
}

pub fn build_client(timeout_secs: u64) -> anyhow::Result<Client> {
    let mut builder = Client::builder().user_agent("MatchdayNews/1.0");
    if timeout_secs > 0 {
        builder = builder.timeout(Duration::from_secs(timeout_secs));
    }
    Ok(builder.build()?)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectMetadata {
    download_tokens: Option<String>,
}

/// Object storage spoken over the Firebase-style REST layout:
/// metadata at `{base}/o/{path}`, content at `{base}/o/{path}?alt=media`.
pub struct HttpObjectStorage {
    client: Client,
    base_url: Url,
}

impl HttpObjectStorage {
    pub fn new(client: Client, base_url: &str) -> Result<Self, AssetError> {
        let base_url =
            Url::parse(base_url).map_err(|e| AssetError::InvalidUrl(format!("{base_url}: {e}")))?;
        Ok(Self { client, base_url })
    }

    /// Object path goes in as a single segment, so `/` is percent-encoded.
    fn object_url(&self, path: &str) -> Result<Url, AssetError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| AssetError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .push("o")
            .push(path);
        Ok(url)
    }
}

#[async_trait]
impl ObjectStorage for HttpObjectStorage {
    async fn resolve_download_url(&self, path: &str) -> Result<Url, AssetError> {
        let metadata_url = self.object_url(path)?;
        let response = self.client.get(metadata_url.clone()).send().await?;

        match response.status() {
            StatusCode::NOT_FOUND => return Err(AssetError::MissingObject(path.to_string())),
            status if !status.is_success() => return Err(AssetError::Status(status.as_u16())),
            _ => {}
        }

        let metadata: ObjectMetadata = response.json().await?;

        let mut download_url = metadata_url;
        {
            let mut pairs = download_url.query_pairs_mut();
            pairs.append_pair("alt", "media");
            if let Some(token) = metadata
                .download_tokens
                .as_deref()
                .and_then(|tokens| tokens.split(',').next())
            {
                pairs.append_pair("token", token);
            }
        }

        Ok(download_url)
    }
}

pub struct ReqwestImageClient {
    client: Client,
}

impl ReqwestImageClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ImageClient for ReqwestImageClient {
    async fn get(&self, url: &Url) -> Result<Bytes, AssetError> {
        let response = self.client.get(url.clone()).send().await?;
        if !response.status().is_success() {
            return Err(AssetError::Status(response.status().as_u16()));
        }
        Ok(response.bytes().await?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Jpeg,
    Png,
    Gif,
    WebP,
}

/// Image bytes that passed signature sniffing. Cloning shares the buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageData {
    format: ImageFormat,
    bytes: Bytes,
}

impl ImageData {
    pub fn decode(bytes: impl Into<Bytes>) -> Result<Self, AssetError> {
        let bytes = bytes.into();
        let format = match bytes.as_ref() {
            [0xFF, 0xD8, 0xFF, ..] => ImageFormat::Jpeg,
            [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, ..] => ImageFormat::Png,
            [b'G', b'I', b'F', b'8', ..] => ImageFormat::Gif,
            [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => ImageFormat::WebP,
            _ => return Err(AssetError::Undecodable(bytes.len())),
        };
        Ok(Self { format, bytes })
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn content_type(&self) -> &'static str {
        match self.format {
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Png => "image/png",
            ImageFormat::Gif => "image/gif",
            ImageFormat::WebP => "image/webp",
        }
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// One file per key under a private directory. No index, expiry or size cap.
#[derive(Debug, Clone)]
pub struct DiskCache {
    dir: PathBuf,
}

impl DiskCache {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn sanitize_key(key: &str) -> String {
        key.replace(['/', '\\'], "_")
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(Self::sanitize_key(key))
    }

    pub async fn read(&self, key: &str) -> std::io::Result<Option<Vec<u8>>> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Sibling the write goes to before it is renamed into place.
    pub fn partial_path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.partial", Self::sanitize_key(key)))
    }

    /// Writes to a temporary sibling and renames it into place.
    pub async fn write(&self, key: &str, bytes: &[u8]) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(key);
        let tmp = self.partial_path_for(key);
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(key = key, size = bytes.len(), "Wrote image to disk cache");
        Ok(())
    }
}
