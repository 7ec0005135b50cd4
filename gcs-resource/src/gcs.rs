//! # Storage client (CLI <-> backend)
//!
//! Google Cloud Storage implementation of the core `ObjectUploader` contract.
//!
//! [`GcsClient`] uploads one file per call with a single `multipart/related` request to the
//! JSON API (`/upload/storage/v1/b/{bucket}/o?uploadType=multipart`). The first part carries
//! the object metadata (name, content type, cache control); the second part is the file,
//! streamed from disk. The object only exists once the backend has received the complete
//! body, so a failed copy never leaves a partial object behind.
//!
//! While streaming, the client computes the MD5 of the bytes it sent and compares it with
//! the `md5Hash` the backend reports.
//!
//! - Construct through [`connect`] for a request, or [`GcsClient::new`] with an explicit
//!   [`CredentialProvider`].

use std::io;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use bytes::Bytes;
use futures::{future, stream, StreamExt};
use gcs_resource_core::contract::{
    CredentialProvider, ObjectUpload, ObjectUploader, UploadError, UploadedObject,
};
use gcs_resource_core::protocol::Source;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Body, Url};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use uuid::Uuid;

use crate::config::ResourceConfig;
use crate::credentials::resolve_credentials;

/// Object metadata part of the multipart body.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ObjectMetadata<'a> {
    name: &'a str,
    content_type: &'a str,
    cache_control: &'a str,
}

/// The subset of the GCS `Object` resource returned by an insert.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectResource {
    name: String,
    #[serde(default)]
    bucket: Option<String>,
    generation: String,
    #[serde(default)]
    crc32c: Option<String>,
    #[serde(default)]
    md5_hash: Option<String>,
    #[serde(default)]
    size: Option<String>,
}

pub struct GcsClient {
    http: reqwest::Client,
    endpoint: Url,
    credentials: Box<dyn CredentialProvider>,
}

/// Builds the client for one `out` request: HTTP client, credentials, endpoint.
pub fn connect(source: &Source, config: &ResourceConfig) -> Result<GcsClient, UploadError> {
    let http = reqwest::Client::builder()
        .user_agent(concat!("gcs-resource/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| {
            tracing::error!(error = ?e, "Failed to build HTTP client");
            e
        })?;
    let credentials = resolve_credentials(source, http.clone())?;
    GcsClient::new(http, config.endpoint_for(source), credentials)
}

impl GcsClient {
    pub fn new(
        http: reqwest::Client,
        endpoint: &str,
        credentials: Box<dyn CredentialProvider>,
    ) -> Result<Self, UploadError> {
        let endpoint = Url::parse(endpoint).map_err(|e| -> UploadError {
            format!("invalid storage endpoint `{endpoint}`: {e}").into()
        })?;
        if endpoint.cannot_be_a_base() {
            return Err(format!("invalid storage endpoint `{endpoint}`").into());
        }
        tracing::info!(endpoint = %endpoint, "Initialized storage client");
        Ok(Self {
            http,
            endpoint,
            credentials,
        })
    }

    fn upload_url(&self, bucket: &str) -> Result<Url, UploadError> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| -> UploadError { "storage endpoint cannot be a base URL".into() })?
            .pop_if_empty()
            .extend(["upload", "storage", "v1", "b", bucket, "o"]);
        url.query_pairs_mut().append_pair("uploadType", "multipart");
        Ok(url)
    }
}

#[async_trait]
impl ObjectUploader for GcsClient {
    async fn upload_object(&self, req: ObjectUpload) -> Result<UploadedObject, UploadError> {
        let path = req.local_path.display().to_string();
        tracing::info!(bucket = %req.bucket, key = %req.key, path = %path, "Uploading object");

        let file = tokio::fs::File::open(&req.local_path)
            .await
            .map_err(|e| -> UploadError {
                tracing::error!(error = ?e, path = %path, "Failed to open file for upload");
                format!("cannot open {path}: {e}").into()
            })?;
        let size = file.metadata().await?.len();

        let boundary = format!("gcs-resource-{}", Uuid::new_v4().simple());
        let metadata = serde_json::to_string(&ObjectMetadata {
            name: &req.key,
            content_type: req.content_type,
            cache_control: req.cache_control,
        })?;
        let head = format!(
            "--{boundary}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{metadata}\r\n--{boundary}\r\nContent-Type: {}\r\n\r\n",
            req.content_type
        );
        let tail = format!("\r\n--{boundary}--\r\n");
        let content_length = head.len() as u64 + size + tail.len() as u64;

        let digest = Arc::new(Mutex::new(md5::Context::new()));
        let tap = digest.clone();
        let file_stream = ReaderStream::new(file).map(move |chunk| {
            if let Ok(bytes) = &chunk {
                if let Ok(mut ctx) = tap.lock() {
                    ctx.consume(bytes);
                }
            }
            chunk
        });
        let body = stream::once(future::ready(Ok::<Bytes, io::Error>(Bytes::from(head))))
            .chain(file_stream)
            .chain(stream::once(future::ready(Ok(Bytes::from(tail)))));

        let token = self.credentials.access_token().await.map_err(|e| -> UploadError {
            tracing::error!(error = %e, "Failed to obtain access token");
            format!("cannot obtain access token: {e}").into()
        })?;

        let resp = self
            .http
            .post(self.upload_url(&req.bucket)?)
            .bearer_auth(token)
            .header(CONTENT_TYPE, format!("multipart/related; boundary={boundary}"))
            .header(CONTENT_LENGTH, content_length)
            .body(Body::wrap_stream(body))
            .send()
            .await
            .map_err(|e| -> UploadError {
                tracing::error!(error = ?e, key = %req.key, "Transfer failed");
                format!("transfer of {path} failed: {e}").into()
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            tracing::error!(status = %status, key = %req.key, body = %body, "Storage API rejected upload");
            return Err(format!("storage API returned {status} for {}: {body}", req.key).into());
        }
        let object: ObjectResource = resp.json().await?;

        let local_md5 = {
            let mut ctx = digest
                .lock()
                .map_err(|_| -> UploadError { "checksum state poisoned".into() })?;
            std::mem::replace(&mut *ctx, md5::Context::new()).compute()
        };
        if let Some(remote) = object.md5_hash.as_deref() {
            let remote_bytes = general_purpose::STANDARD.decode(remote)?;
            if remote_bytes.as_slice() != &local_md5.0[..] {
                let local = general_purpose::STANDARD.encode(local_md5.0);
                tracing::error!(key = %req.key, local = %local, remote = %remote, "MD5 mismatch after upload");
                return Err(format!(
                    "checksum mismatch for {}: sent md5 {local}, stored md5 {remote}",
                    req.key
                )
                .into());
            }
        }

        tracing::info!(
            key = %object.name,
            generation = %object.generation,
            "Successfully uploaded object"
        );
        Ok(UploadedObject {
            bucket: object.bucket.unwrap_or(req.bucket),
            key: object.name,
            generation: object.generation,
            crc32c: object.crc32c,
            md5_hash: object.md5_hash,
            size: object.size.and_then(|s| s.parse().ok()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::StaticToken;

    fn client(endpoint: &str) -> GcsClient {
        GcsClient::new(
            reqwest::Client::new(),
            endpoint,
            Box::new(StaticToken::new("t")),
        )
        .unwrap()
    }

    #[test]
    fn upload_url_escapes_bucket_and_keeps_endpoint_path() {
        let url = client("https://storage.googleapis.com").upload_url("my-bucket").unwrap();
        assert_eq!(
            url.as_str(),
            "https://storage.googleapis.com/upload/storage/v1/b/my-bucket/o?uploadType=multipart"
        );

        let url = client("http://127.0.0.1:4443/gcs/").upload_url("odd bucket").unwrap();
        assert_eq!(
            url.as_str(),
            "http://127.0.0.1:4443/gcs/upload/storage/v1/b/odd%20bucket/o?uploadType=multipart"
        );
    }

    #[test]
    fn rejects_endpoints_that_are_not_urls() {
        let err = GcsClient::new(
            reqwest::Client::new(),
            "storage.googleapis.com",
            Box::new(StaticToken::new("t")),
        )
        .err()
        .expect("relative endpoint must be rejected");
        assert!(err.to_string().contains("storage.googleapis.com"));
    }
}
