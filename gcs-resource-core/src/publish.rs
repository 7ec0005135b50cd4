//! The `out` pipeline: scan → upload → aggregate.
//!
//! This module provides the orchestration for publishing a directory to a bucket.
//! It implements a strictly sequential pipeline that:
//!   - Stamps the response version from the injected [`Clock`] before anything else
//!   - Scans `source_root/params.source` (a scan failure aborts before any upload)
//!   - Returns straight away on an empty scan, without constructing a backend client
//!   - Uploads each file in scan order through an [`ObjectUploader`], each bounded by
//!     a per-file deadline
//!   - Collects one metadata entry per committed object
//!
//! # Error Handling
//! The first failing file stops the loop. Files already uploaded stay where they are;
//! nothing after the failing file is attempted.

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use tracing::{error, info};

use crate::contract::{Clock, ObjectUpload, ObjectUploader, UploadError, UploadedObject};
use crate::error::PublishError;
use crate::protocol::{MetadataField, OutRequest, OutResponse, TimestampVersion};
use crate::scan::{object_key, scan};
use crate::version::synthesize_version;

/// Default upper bound on a single file transfer.
pub const DEFAULT_UPLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// Tunables for [`publish`].
#[derive(Debug, Clone)]
pub struct PublishConfig {
    pub upload_timeout: Duration,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            upload_timeout: DEFAULT_UPLOAD_TIMEOUT,
        }
    }
}

/// Entrypoint: publish the directory named by `request.params.source` under `source_root`.
///
/// `connect` builds the backend client. It is only awaited when there is at least one
/// file to upload.
pub async fn publish<U, F, Fut>(
    request: &OutRequest,
    source_root: &Path,
    clock: &dyn Clock,
    config: &PublishConfig,
    connect: F,
) -> Result<OutResponse, PublishError>
where
    U: ObjectUploader,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<U, UploadError>>,
{
    let version = TimestampVersion {
        timestamp: synthesize_version(clock),
    };
    info!(version = %version.timestamp, "[OUT] Starting publish");

    let params = &request.params;
    let scan_root = source_root.join(&params.source);
    let entries = scan(&scan_root)?;

    if entries.is_empty() {
        info!(root = %scan_root.display(), "[OUT] Nothing to upload");
        return Ok(OutResponse {
            version,
            metadata: Vec::new(),
        });
    }

    let uploader = connect().await.map_err(|e| {
        error!(error = %e, "[OUT][ERROR] Failed to construct storage client");
        PublishError::Connect(e)
    })?;

    let mut metadata = Vec::with_capacity(entries.len());
    for entry in entries {
        let key = object_key(&params.prefix, &entry.relative_key());
        info!(path = %entry.path.display(), bucket = %params.bucket, key = %key, "[OUT] Uploading file");

        let req = ObjectUpload::new(params.bucket.as_str(), key.as_str(), entry.path.clone());
        let uploaded = match tokio::time::timeout(config.upload_timeout, uploader.upload_object(req)).await {
            Ok(Ok(uploaded)) => uploaded,
            Ok(Err(e)) => {
                error!(path = %entry.path.display(), key = %key, error = %e, "[OUT][ERROR] Upload failed");
                return Err(PublishError::Upload {
                    path: entry.path,
                    key,
                    source: e,
                });
            }
            Err(_) => {
                error!(path = %entry.path.display(), key = %key, "[OUT][ERROR] Upload timed out");
                return Err(PublishError::Timeout {
                    path: entry.path,
                    key,
                    seconds: config.upload_timeout.as_secs(),
                });
            }
        };

        info!(
            key = %uploaded.key,
            generation = %uploaded.generation,
            crc32c = uploaded.crc32c.as_deref().unwrap_or("-"),
            md5 = uploaded.md5_hash.as_deref().unwrap_or("-"),
            "[OUT] Upload committed"
        );
        metadata.push(metadata_field(&uploaded));
    }

    info!(uploaded = metadata.len(), version = %version.timestamp, "[OUT] Publish complete");
    Ok(OutResponse { version, metadata })
}

/// One metadata entry: the object key, pointing at the generation-qualified object URL.
pub fn metadata_field(uploaded: &UploadedObject) -> MetadataField {
    MetadataField {
        name: uploaded.key.clone(),
        value: format!(
            "gs://{}/{}#{}",
            uploaded.bucket, uploaded.key, uploaded.generation
        ),
    }
}
