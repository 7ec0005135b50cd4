//! # contract: seams between the publish pipeline and the outside world
//!
//! The pipeline never talks to a storage backend, a token endpoint or the wall clock
//! directly. It goes through the three traits in this module:
//!
//! - [`ObjectUploader`]: transfers one local file to one remote object.
//! - [`CredentialProvider`]: hands out bearer tokens to an uploader implementation.
//! - [`Clock`]: the source of the version timestamp.
//!
//! ## Mocking & Testing
//! - All traits are annotated for `mockall`; the generated `Mock*` types are exported
//!   when the `test-export-mocks` feature is enabled (the default) so the binary crate's
//!   tests can use them too.
//!
//! ## Errors
//! - Backend-facing traits return boxed `Send + Sync` errors. The pipeline wraps them
//!   with the file and key they belong to before surfacing them.

use std::path::PathBuf;

use async_trait::async_trait;

use mockall::automock;

/// Content type applied to every uploaded object.
pub const OBJECT_CONTENT_TYPE: &str = "application/octet-stream";

/// Cache-Control applied to every uploaded object: private, never served from a cache.
pub const OBJECT_CACHE_CONTROL: &str = "private, max-age=0, no-transform";

/// Boxed error returned by backend implementations.
pub type UploadError = Box<dyn std::error::Error + Send + Sync>;

/// Boxed error returned by credential providers.
pub type CredentialError = Box<dyn std::error::Error + Send + Sync>;

/// Everything an uploader needs to transfer one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectUpload {
    /// Target bucket.
    pub bucket: String,
    /// Full object key (prefix already applied).
    pub key: String,
    /// Local file whose bytes become the object's content.
    pub local_path: PathBuf,
    pub content_type: &'static str,
    pub cache_control: &'static str,
}

impl ObjectUpload {
    /// Builds an upload with the fixed content-type and cache-control metadata.
    pub fn new(bucket: impl Into<String>, key: impl Into<String>, local_path: PathBuf) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            local_path,
            content_type: OBJECT_CONTENT_TYPE,
            cache_control: OBJECT_CACHE_CONTROL,
        }
    }
}

/// Facts reported by the backend after a committed write.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct UploadedObject {
    pub bucket: String,
    pub key: String,
    /// Backend-assigned generation of this write.
    pub generation: String,
    /// Base64 CRC32C of the stored content, if reported.
    pub crc32c: Option<String>,
    /// Base64 MD5 of the stored content, if reported.
    pub md5_hash: Option<String>,
    pub size: Option<u64>,
}

/// Transfers a single local file to a remote object.
///
/// Implementations must only commit the object when the whole file was transferred,
/// and must not retry on their own: the pipeline treats every error as fatal.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait ObjectUploader: Send + Sync {
    async fn upload_object(&self, req: ObjectUpload) -> Result<UploadedObject, UploadError>;
}

/// Supplies OAuth2 bearer tokens for backend requests.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Returns a token valid for at least the next request.
    async fn access_token(&self) -> Result<String, CredentialError>;
}

/// Wall-clock source for version tokens.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
pub trait Clock: Send + Sync {
    /// Seconds since the Unix epoch.
    fn unix_seconds(&self) -> u64;
}
