//! HTTP client for an artifact-cache style cache service.

use crate::config::CacheConfig;
use crate::remote::{
    RemoteCacheClient, SyncManifest, cache_version, collect_sync_files, sync_target,
};
use crate::types::{CacheEntry, DownloadOptions, LookupOptions, UploadOptions};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use stowaway_core::{Error, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};
use url::Url;

const API_PREFIX: &str = "_apis/artifactcache/";
const ACCEPT_HEADER: &str = "application/json;api-version=6.0-preview.1";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReserveCacheRequest<'a> {
    key: &'a str,
    version: &'a str,
    cache_size: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReserveCacheResponse {
    cache_id: Option<i64>,
}

#[derive(Debug, Serialize)]
struct CommitCacheRequest {
    size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    files: Option<Vec<String>>,
}

/// Client for the cache service REST API.
pub struct HttpCacheClient {
    client: Client,
    base_url: Url,
    token: Option<String>,
    upload_chunk_size: usize,
    max_attempts: u32,
    retry_delay: Duration,
}

impl HttpCacheClient {
    pub fn new(config: &CacheConfig) -> Result<Self> {
        let raw = config
            .cache_url
            .as_deref()
            .ok_or_else(|| Error::Validation("Cache service URL is not configured".into()))?;
        let mut base_url = Url::parse(raw)
            .map_err(|e| Error::Validation(format!("Invalid cache URL {}: {}", raw, e)))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            client: Client::new(),
            base_url,
            token: config.token.clone(),
            upload_chunk_size: config.upload_chunk_size.max(1),
            max_attempts: config.max_attempts.max(1),
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        })
    }

    fn api_url(&self, resource: &str) -> Result<Url> {
        self.base_url
            .join(&format!("{}{}", API_PREFIX, resource))
            .map_err(|e| Error::Internal(format!("Invalid cache resource {}: {}", resource, e)))
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        let req = req.header(reqwest::header::ACCEPT, ACCEPT_HEADER);
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    /// Storage URLs outside the service never see the token.
    fn authorize_storage(&self, url: &Url, req: RequestBuilder) -> RequestBuilder {
        if url.as_str().starts_with(self.base_url.as_str()) {
            self.authorize(req)
        } else {
            req
        }
    }

    async fn send<F>(&self, operation: &str, build: F) -> Result<Response>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut attempt = 1;
        loop {
            match build().send().await {
                Ok(res) if is_retryable(res.status()) && attempt < self.max_attempts => {
                    warn!(operation, status = %res.status(), attempt, "Cache service request failed, will retry");
                }
                Ok(res) => return Ok(res),
                Err(e) if attempt < self.max_attempts => {
                    warn!(operation, error = %e, attempt, "Cache service unreachable, will retry");
                }
                Err(e) => {
                    return Err(Error::Network(format!("{} failed: {}", operation, e)));
                }
            }
            attempt += 1;
            tokio::time::sleep(self.retry_delay).await;
        }
    }

    async fn reserve(&self, key: &str, version: &str, size: u64) -> Result<i64> {
        let url = self.api_url("caches")?;
        let body = ReserveCacheRequest {
            key,
            version,
            cache_size: Some(size),
        };
        let res = self
            .send("Reserve cache", || {
                self.authorize(self.client.post(url.clone())).json(&body)
            })
            .await?;

        if res.status() == StatusCode::CONFLICT {
            return Err(Error::ReservationConflict {
                key: key.to_string(),
            });
        }
        let res = ensure_success("Reserve cache", res).await?;
        let reserved: ReserveCacheResponse = res
            .json()
            .await
            .map_err(|e| Error::Serialization(format!("Invalid reserve response: {}", e)))?;
        reserved.cache_id.ok_or_else(|| Error::ReservationConflict {
            key: key.to_string(),
        })
    }

    async fn upload_chunks(&self, cache_id: i64, archive: &Path) -> Result<u64> {
        let url = self.api_url(&format!("caches/{}", cache_id))?;
        let mut file = tokio::fs::File::open(archive).await?;
        let mut buf = vec![0u8; self.upload_chunk_size];
        let mut offset = 0u64;

        loop {
            let len = read_chunk(&mut file, &mut buf).await?;
            if len == 0 {
                break;
            }
            let chunk = buf[..len].to_vec();
            let range = format!("bytes {}-{}/*", offset, offset + len as u64 - 1);
            debug!(cache_id, range = %range, "Uploading chunk");

            let res = self
                .send("Upload cache chunk", || {
                    self.authorize(self.client.patch(url.clone()))
                        .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                        .header(reqwest::header::CONTENT_RANGE, range.clone())
                        .body(chunk.clone())
                })
                .await?;
            ensure_success("Upload cache chunk", res).await?;

            offset += len as u64;
            if len < buf.len() {
                break;
            }
        }
        Ok(offset)
    }

    async fn commit(&self, cache_id: i64, size: u64, files: Option<Vec<String>>) -> Result<()> {
        let url = self.api_url(&format!("caches/{}", cache_id))?;
        let body = CommitCacheRequest { size, files };
        let res = self
            .send("Commit cache", || {
                self.authorize(self.client.post(url.clone())).json(&body)
            })
            .await?;
        ensure_success("Commit cache", res).await?;
        Ok(())
    }

    async fn get_entry(&self, keys: &[String], version: &str) -> Result<Option<CacheEntry>> {
        let mut url = self.api_url("cache")?;
        url.query_pairs_mut()
            .append_pair("keys", &keys.join(","))
            .append_pair("version", version);

        let res = self
            .send("Get cache entry", || self.authorize(self.client.get(url.clone())))
            .await?;
        if res.status() == StatusCode::NO_CONTENT || res.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let res = ensure_success("Get cache entry", res).await?;
        let entry: CacheEntry = res
            .json()
            .await
            .map_err(|e| Error::Serialization(format!("Invalid cache entry: {}", e)))?;

        if entry.archive_location.is_none() {
            return Ok(None);
        }
        Ok(Some(entry))
    }

    async fn download_to(&self, url: &Url, dest: &Path) -> Result<u64> {
        let res = self
            .send("Download cache", || {
                self.authorize_storage(url, self.client.get(url.clone()))
            })
            .await?;
        let mut res = ensure_success("Download cache", res).await?;
        let expected = res.content_length();

        let mut file = tokio::fs::File::create(dest).await?;
        let mut written = 0u64;
        while let Some(chunk) = res
            .chunk()
            .await
            .map_err(|e| Error::Network(format!("Download interrupted: {}", e)))?
        {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        if let Some(expected) = expected {
            if expected != written {
                return Err(Error::Network(format!(
                    "Incomplete download. Expected file size: {}, actual file size: {}",
                    expected, written
                )));
            }
        }
        Ok(written)
    }
}

#[async_trait]
impl RemoteCacheClient for HttpCacheClient {
    async fn lookup(
        &self,
        keys: &[String],
        paths: &[String],
        options: &LookupOptions,
    ) -> Result<Option<CacheEntry>> {
        let version = cache_version(
            paths,
            Some(&options.compression),
            options.enable_cross_os_archive,
        );
        self.get_entry(keys, &version).await
    }

    async fn lookup_sync(&self, primary_key: &str, paths: &[String]) -> Result<Option<CacheEntry>> {
        let version = cache_version(paths, None, false);
        self.get_entry(&[primary_key.to_string()], &version).await
    }

    async fn download(&self, location: &str, dest: &Path, _options: &DownloadOptions) -> Result<()> {
        let url = Url::parse(location)
            .map_err(|e| Error::Network(format!("Invalid archive location: {}", e)))?;
        let size = self.download_to(&url, dest).await?;
        info!(size, "Cache downloaded");
        Ok(())
    }

    async fn download_sync(&self, location: &str, workspace: &Path) -> Result<()> {
        let base = Url::parse(location)
            .map_err(|e| Error::Network(format!("Invalid sync location: {}", e)))?;
        let manifest_url = file_url(&base, "manifest.json")?;
        let res = self
            .send("Get sync manifest", || {
                self.authorize_storage(&manifest_url, self.client.get(manifest_url.clone()))
            })
            .await?;
        let manifest: SyncManifest = ensure_success("Get sync manifest", res)
            .await?
            .json()
            .await
            .map_err(|e| Error::Serialization(format!("Invalid sync manifest: {}", e)))?;

        for name in &manifest.files {
            let target = sync_target(name, workspace).ok_or_else(|| {
                Error::Archive(format!("Refusing to restore unsafe path {}", name))
            })?;
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let url = file_url(&base, name)?;
            self.download_to(&url, &target).await?;
        }
        info!(files = manifest.files.len(), "Cache files synced");
        Ok(())
    }

    async fn upload(
        &self,
        key: &str,
        paths: &[String],
        archive: &Path,
        options: &UploadOptions,
    ) -> Result<()> {
        let version = cache_version(
            paths,
            Some(&options.compression),
            options.enable_cross_os_archive,
        );
        let cache_id = self.reserve(key, &version, options.size_hint).await?;
        debug!(cache_id, "Reserved cache");

        let size = self.upload_chunks(cache_id, archive).await?;
        self.commit(cache_id, size, None).await?;
        info!(cache_id, size, "Cache uploaded");
        Ok(())
    }

    async fn upload_sync(
        &self,
        key: &str,
        paths: &[String],
        resolved: &[PathBuf],
        workspace: &Path,
    ) -> Result<()> {
        let version = cache_version(paths, None, false);
        let files = collect_sync_files(resolved, workspace)?;
        let total: u64 = files.iter().map(|f| f.size).sum();
        let cache_id = self.reserve(key, &version, total).await?;

        let files_url = self.api_url(&format!("caches/{}/files/", cache_id))?;
        for file in &files {
            let url = file_url(&files_url, &file.name)?;
            let body = tokio::fs::read(&file.source).await?;
            let res = self
                .send("Upload cache file", || {
                    self.authorize(self.client.put(url.clone()))
                        .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                        .body(body.clone())
                })
                .await?;
            ensure_success("Upload cache file", res).await?;
        }

        let names = files.into_iter().map(|f| f.name).collect();
        self.commit(cache_id, total, Some(names)).await?;
        info!(cache_id, size = total, "Cache files uploaded");
        Ok(())
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

async fn ensure_success(operation: &str, res: Response) -> Result<Response> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    let body = res.text().await.unwrap_or_default();
    Err(Error::Http {
        status: status.as_u16(),
        message: format!("{} failed: {}", operation, body),
    })
}

/// `base` extended with the `/`-separated manifest name.
fn file_url(base: &Url, name: &str) -> Result<Url> {
    let mut url = base.clone();
    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|_| Error::Network(format!("Cannot extend location {}", base)))?;
        segments.pop_if_empty();
        if name.starts_with('/') {
            segments.push("__root__");
        }
        segments.extend(name.trim_start_matches('/').split('/'));
    }
    Ok(url)
}

async fn read_chunk(file: &mut tokio::fs::File, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_gets_trailing_slash() {
        let client = HttpCacheClient::new(&CacheConfig::new("https://cache.example.com/abc")).unwrap();
        assert_eq!(
            client.api_url("cache").unwrap().as_str(),
            "https://cache.example.com/abc/_apis/artifactcache/cache"
        );
    }

    #[test]
    fn test_missing_url_is_rejected() {
        assert!(HttpCacheClient::new(&CacheConfig::default()).is_err());
    }

    #[test]
    fn test_file_url_encodes_segments() {
        let base = Url::parse("https://store.example.com/entries/9/").unwrap();
        let url = file_url(&base, "dist/my file.js").unwrap();
        assert_eq!(
            url.as_str(),
            "https://store.example.com/entries/9/dist/my%20file.js"
        );
        let url = file_url(&base, "/opt/tool").unwrap();
        assert_eq!(
            url.as_str(),
            "https://store.example.com/entries/9/__root__/opt/tool"
        );
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(is_retryable(StatusCode::BAD_GATEWAY));
        assert!(is_retryable(StatusCode::TOO_MANY_REQUESTS));
        assert!(!is_retryable(StatusCode::CONFLICT));
        assert!(!is_retryable(StatusCode::OK));
    }
}
