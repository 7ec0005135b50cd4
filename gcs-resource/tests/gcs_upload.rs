//! End-to-end `out` runs against an in-process fake of the storage JSON API.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use base64::{engine::general_purpose, Engine as _};
use gcs_resource::cli::{run, Invocation, Verb};
use serde_json::{json, Value};
use tempfile::TempDir;

#[derive(Debug, Clone)]
struct Received {
    bucket: String,
    upload_type: Option<String>,
    authorization: Option<String>,
    metadata: Value,
    media_content_type: String,
    data: Vec<u8>,
}

#[derive(Clone, Default)]
struct FakeGcs {
    received: Arc<Mutex<Vec<Received>>>,
    fail_on: Option<String>,
    corrupt_md5: bool,
}

/// Splits a `multipart/related` body into `(part headers, part content)` pairs.
fn split_parts(body: &[u8], boundary: &str) -> Vec<(String, Vec<u8>)> {
    let text = String::from_utf8_lossy(body).into_owned();
    let delimiter = format!("--{boundary}");
    text.split(delimiter.as_str())
        .skip(1)
        .filter(|part| !part.starts_with("--"))
        .map(|part| {
            let part = part.strip_prefix("\r\n").unwrap_or(part);
            let (headers, content) = part.split_once("\r\n\r\n").expect("part has headers");
            let content = content.strip_suffix("\r\n").unwrap_or(content);
            (headers.to_string(), content.as_bytes().to_vec())
        })
        .collect()
}

async fn insert(
    State(fake): State<FakeGcs>,
    Path(bucket): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let content_type = headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let boundary = content_type
        .split_once("boundary=")
        .map(|(_, b)| b.to_string())
        .expect("multipart boundary");
    let parts = split_parts(&body, &boundary);
    assert_eq!(parts.len(), 2, "metadata part and media part");

    let metadata: Value = serde_json::from_slice(&parts[0].1).expect("metadata part is JSON");
    let name = metadata["name"].as_str().unwrap_or_default().to_string();
    let media_content_type = parts[1]
        .0
        .strip_prefix("Content-Type: ")
        .unwrap_or_default()
        .to_string();
    let data = parts[1].1.clone();

    let generation = {
        let mut received = fake.received.lock().unwrap();
        received.push(Received {
            bucket: bucket.clone(),
            upload_type: query.get("uploadType").cloned(),
            authorization: headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
            metadata,
            media_content_type,
            data: data.clone(),
        });
        1_700_000_000_000_000u64 + received.len() as u64
    };

    if fake.fail_on.as_deref() == Some(name.as_str()) {
        return (StatusCode::INTERNAL_SERVER_ERROR, "backend exploded").into_response();
    }

    let md5 = if fake.corrupt_md5 {
        md5::compute(b"something else")
    } else {
        md5::compute(&data)
    };
    Json(json!({
        "kind": "storage#object",
        "name": name,
        "bucket": bucket,
        "generation": generation.to_string(),
        "size": data.len().to_string(),
        "md5Hash": general_purpose::STANDARD.encode(md5.0),
        "crc32c": "AAAAAA==",
    }))
    .into_response()
}

async fn spawn_fake(fake: FakeGcs) -> String {
    let app = Router::new()
        .route("/upload/storage/v1/b/{bucket}/o", post(insert))
        .with_state(fake);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn build_tree() -> TempDir {
    let root = TempDir::new().unwrap();
    let dist = root.path().join("dist");
    std::fs::create_dir_all(dist.join("assets/css")).unwrap();
    std::fs::write(dist.join("index.html"), "<html>hello</html>").unwrap();
    std::fs::write(dist.join("assets/app.js"), "console.log('hi');").unwrap();
    std::fs::write(dist.join("assets/css/site.css"), "body{}").unwrap();
    root
}

fn out_request(endpoint: &str, prefix: &str) -> String {
    json!({
        "source": {"url": endpoint, "credentials": {"access_token": "test-token"}},
        "params": {"source": "dist", "bucket": "site-bucket", "prefix": prefix}
    })
    .to_string()
}

async fn run_out(root: &TempDir, request: &str) -> (anyhow::Result<()>, Vec<u8>) {
    let invocation = Invocation {
        verb: Verb::Out,
        args: vec![root.path().display().to_string()],
    };
    let mut stdout = Vec::new();
    let result = run(invocation, request.as_bytes(), &mut stdout).await;
    (result, stdout)
}

#[tokio::test]
async fn out_uploads_every_file_with_fixed_headers() {
    let fake = FakeGcs::default();
    let endpoint = spawn_fake(fake.clone()).await;
    let root = build_tree();

    let (result, stdout) = run_out(&root, &out_request(&endpoint, "releases/1.2")).await;
    result.expect("out should succeed");

    let received = fake.received.lock().unwrap().clone();
    let mut names: Vec<_> = received
        .iter()
        .map(|r| r.metadata["name"].as_str().unwrap().to_string())
        .collect();
    names.sort();
    assert_eq!(
        names,
        vec![
            "releases/1.2/assets/app.js",
            "releases/1.2/assets/css/site.css",
            "releases/1.2/index.html",
        ]
    );

    for r in &received {
        assert_eq!(r.bucket, "site-bucket");
        assert_eq!(r.upload_type.as_deref(), Some("multipart"));
        assert_eq!(r.authorization.as_deref(), Some("Bearer test-token"));
        assert_eq!(r.metadata["contentType"], "application/octet-stream");
        assert_eq!(r.metadata["cacheControl"], "private, max-age=0, no-transform");
        assert_eq!(r.media_content_type, "application/octet-stream");
    }
    let index = received
        .iter()
        .find(|r| r.metadata["name"] == "releases/1.2/index.html")
        .unwrap();
    assert_eq!(index.data, b"<html>hello</html>");

    let response: Value = serde_json::from_slice(&stdout).unwrap();
    let metadata = response["metadata"].as_array().unwrap();
    assert_eq!(metadata.len(), 3);
    for entry in metadata {
        let name = entry["name"].as_str().unwrap();
        let value = entry["value"].as_str().unwrap();
        assert!(value.starts_with(&format!("gs://site-bucket/{name}#")), "{value}");
    }
    assert!(response["version"]["timestamp"].as_str().unwrap().parse::<u64>().is_ok());
    assert!(stdout.ends_with(b"\n"));
}

#[tokio::test]
async fn empty_prefix_puts_objects_at_bucket_root() {
    let fake = FakeGcs::default();
    let endpoint = spawn_fake(fake.clone()).await;
    let root = build_tree();

    let (result, _) = run_out(&root, &out_request(&endpoint, "")).await;
    result.unwrap();

    let received = fake.received.lock().unwrap();
    assert!(received
        .iter()
        .any(|r| r.metadata["name"] == "index.html"));
    assert!(received
        .iter()
        .all(|r| !r.metadata["name"].as_str().unwrap().starts_with('/')));
}

#[tokio::test]
async fn backend_error_fails_the_run_and_writes_nothing() {
    let fake = FakeGcs {
        fail_on: Some("p/index.html".into()),
        ..FakeGcs::default()
    };
    let endpoint = spawn_fake(fake.clone()).await;
    let root = TempDir::new().unwrap();
    std::fs::create_dir(root.path().join("dist")).unwrap();
    std::fs::write(root.path().join("dist/index.html"), "x").unwrap();

    let (result, stdout) = run_out(&root, &out_request(&endpoint, "p")).await;
    let err = result.expect_err("a 500 must fail the run");
    assert!(format!("{err:#}").contains("500"), "{err:#}");
    assert!(stdout.is_empty());
}

#[tokio::test]
async fn checksum_mismatch_is_reported_as_failure() {
    let fake = FakeGcs {
        corrupt_md5: true,
        ..FakeGcs::default()
    };
    let endpoint = spawn_fake(fake.clone()).await;
    let root = TempDir::new().unwrap();
    std::fs::create_dir(root.path().join("dist")).unwrap();
    std::fs::write(root.path().join("dist/data.bin"), "payload").unwrap();

    let (result, stdout) = run_out(&root, &out_request(&endpoint, "p")).await;
    let err = result.expect_err("md5 mismatch must fail the run");
    assert!(format!("{err:#}").contains("checksum mismatch"), "{err:#}");
    assert!(stdout.is_empty());
    assert_eq!(fake.received.lock().unwrap().len(), 1);
}
