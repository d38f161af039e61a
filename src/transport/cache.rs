//! On-disk response cache in front of another transport.
//!
//! # Cache Structure
//!
//! ```text
//! ~/.cache/dimensions-records/
//!   responses/
//!     <md5 of method, url and body>.json
//! ```
//!
//! Each file holds the response body plus metadata. Only successful
//! responses to authenticated requests are stored, so credentials posted
//! to the login endpoint never reach the disk.

use http::{header, HeaderMap, Method};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use super::{Transport, TransportResponse};
use crate::config::CacheConfig;
use crate::error::{DimensionsError, Result};

/// Cache metadata stored with each response
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheMetadata {
    /// When the item was cached (Unix timestamp)
    cached_at: u64,

    /// When the item expires (Unix timestamp)
    expires_at: u64,

    url: String,

    /// Request body, for humans inspecting the cache
    request: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedResponse {
    metadata: CacheMetadata,
    body: String,
}

/// Result of a cache lookup
#[derive(Debug, PartialEq)]
pub enum CacheResult<T> {
    /// Item was found and is valid
    Hit(T),

    /// Item was not found
    Miss,

    /// Item was found but has expired
    Expired,
}

/// Transport wrapper answering repeated requests from disk
pub struct CachingTransport {
    inner: Arc<dyn Transport>,
    response_dir: PathBuf,
    config: CacheConfig,
}

impl CachingTransport {
    /// Wrap `inner`. With caching disabled every request passes through.
    pub fn new(inner: Arc<dyn Transport>, config: CacheConfig) -> Result<Self> {
        let base_dir = config
            .directory
            .clone()
            .unwrap_or_else(crate::config::default_cache_dir);
        let response_dir = base_dir.join("responses");

        if config.enabled {
            fs::create_dir_all(&response_dir).map_err(|e| {
                DimensionsError::Config(format!("cache directory {}: {}", response_dir.display(), e))
            })?;
            tracing::info!("Response cache at: {}", response_dir.display());
        } else {
            tracing::debug!("Response cache is disabled");
        }

        Ok(Self {
            inner,
            response_dir,
            config,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Number of stored responses
    pub fn len(&self) -> usize {
        self.response_dir
            .read_dir()
            .map(|entries| entries.count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every stored response
    pub fn clear(&self) -> std::io::Result<()> {
        if !self.is_enabled() {
            return Ok(());
        }
        match fs::remove_dir_all(&self.response_dir) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e),
            _ => {}
        }
        fs::create_dir_all(&self.response_dir)?;
        tracing::info!("Response cache cleared");
        Ok(())
    }

    fn cache_key(method: &Method, url: &str, body: Option<&str>) -> String {
        let input = format!("{}|{}|{}", method, url, body.unwrap_or_default());
        format!("{:x}", md5::compute(input.as_bytes()))
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.response_dir.join(format!("{}.json", key))
    }

    fn lookup(&self, key: &str) -> CacheResult<String> {
        match read_cache_file(&self.path_for(key)) {
            Ok(cached) if now() >= cached.metadata.expires_at => {
                tracing::debug!("Cache expired for response: {}", key);
                CacheResult::Expired
            }
            Ok(cached) => {
                tracing::debug!("Cache HIT for response: {}", key);
                CacheResult::Hit(cached.body)
            }
            Err(_) => {
                tracing::debug!("Cache MISS for response: {}", key);
                CacheResult::Miss
            }
        }
    }

    fn store(&self, key: &str, url: &str, body: Option<&str>, response: &str) {
        let cached_at = now();
        let cached = CachedResponse {
            metadata: CacheMetadata {
                cached_at,
                expires_at: cached_at + self.config.ttl_seconds,
                url: url.to_string(),
                request: body.unwrap_or_default().to_string(),
            },
            body: response.to_string(),
        };
        if let Err(e) = write_cache_file(&self.path_for(key), &cached) {
            tracing::warn!("Failed to cache response: {}", e);
        } else {
            tracing::debug!("Cached response: {}", key);
        }
    }
}

impl Transport for CachingTransport {
    fn request(
        &self,
        method: &Method,
        url: &str,
        body: Option<&str>,
        headers: &HeaderMap,
    ) -> TransportResponse {
        if !self.is_enabled() || !headers.contains_key(header::AUTHORIZATION) {
            return self.inner.request(method, url, body, headers);
        }

        let key = Self::cache_key(method, url, body);
        if let CacheResult::Hit(cached) = self.lookup(&key) {
            return TransportResponse::ok(cached);
        }

        let response = self.inner.request(method, url, body, headers);
        if response.classification.is_ok() {
            self.store(&key, url, body, &response.body);
        }
        response
    }
}

fn now() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn read_cache_file(path: &Path) -> std::io::Result<CachedResponse> {
    let content = fs::read_to_string(path)?;
    serde_json::from_str(&content)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))
}

fn write_cache_file(path: &Path, data: &CachedResponse) -> std::io::Result<()> {
    let content = serde_json::to_string_pretty(data)?;
    fs::write(path, content)
}
