//! Save and restore of versioned CI artifact caches.
//!
//! A save archives a set of paths (or hands them to the remote client as-is
//! in sync mode), uploads the result and associates it with a key. A restore
//! looks the key list up in order, downloads the best match and extracts it
//! onto the workspace.

pub mod archiver;
pub mod cache;
pub mod compression;
pub mod config;
pub mod http;
pub mod keys;
pub mod paths;
pub mod remote;
pub mod store;
pub mod transport;
pub mod types;

pub use cache::CacheManager;
pub use compression::{Codec, CompressionMethod};
pub use config::CacheConfig;
pub use http::HttpCacheClient;
pub use keys::{KeyList, validate_key, validate_paths};
pub use paths::{GlobResolver, PathResolver};
pub use remote::{RemoteCacheClient, cache_version, connect};
pub use store::FilesystemStore;
pub use transport::{ArchiveTransport, Platform, QuotingRule};
pub use types::{
    CacheEntry, CacheId, DownloadOptions, LookupOptions, RestoreOptions, RestoreOutcome,
    SaveOptions, TransferMode, UploadOptions,
};
