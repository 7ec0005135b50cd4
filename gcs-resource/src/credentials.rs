//! # Credential resolution for the storage client
//!
//! Bearer tokens are obtained through the [`CredentialProvider`] trait so that the
//! storage client never cares where they come from.
//!
//! - Inline material from `source.credentials` is first written to a scratch file that is
//!   unique to this invocation, then loaded from there like any key file. The file is
//!   removed as soon as it has been read.
//! - Without inline material the ambient chain is used: `GOOGLE_OAUTH_ACCESS_TOKEN`, then
//!   the key file named by `GOOGLE_APPLICATION_CREDENTIALS`, then the GCE metadata server
//!   (host overridable through `GCE_METADATA_HOST`).
//!
//! Supported key files: `service_account` (signed JWT grant), `authorized_user`
//! (refresh-token grant) and a bare `{"access_token": "..."}` object.

use std::io::Write;
use std::path::Path;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use gcs_resource_core::contract::{CredentialError, CredentialProvider};
use gcs_resource_core::protocol::Source;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, error, info};
use uuid::Uuid;

pub const ACCESS_TOKEN_ENV: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";
pub const KEY_FILE_ENV: &str = "GOOGLE_APPLICATION_CREDENTIALS";
pub const METADATA_HOST_ENV: &str = "GCE_METADATA_HOST";

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const DEFAULT_METADATA_HOST: &str = "metadata.google.internal";
const STORAGE_SCOPE: &str = "https://www.googleapis.com/auth/devstorage.read_write";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const JWT_LIFETIME_SECS: u64 = 3600;
/// Tokens closer than this to expiry are refreshed before use.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Inline credential material persisted for the lifetime of this value.
///
/// The path is unique per invocation, so concurrent runs on one host never read each
/// other's keys. Dropping the value deletes the file.
pub struct CredentialScratch {
    file: tempfile::NamedTempFile,
}

impl CredentialScratch {
    /// Writes `payload` (a JSON object, or a string holding the raw key file) to a new
    /// scratch file.
    pub fn write(payload: &Value) -> Result<Self, CredentialError> {
        let bytes = match payload {
            Value::String(raw) => raw.clone().into_bytes(),
            other => serde_json::to_vec(other)?,
        };

        let mut file = tempfile::Builder::new()
            .prefix(&format!("gcs-resource-{}-", Uuid::new_v4()))
            .suffix(".json")
            .tempfile()
            .map_err(|e| -> CredentialError {
                error!(error = ?e, "Failed to create credentials scratch file");
                format!("cannot persist inline credentials: {e}").into()
            })?;
        let written = file.write_all(&bytes).and_then(|()| file.flush());
        if let Err(e) = written {
            error!(error = ?e, path = %file.path().display(), "Failed to write credentials scratch file");
            return Err(format!(
                "cannot persist inline credentials to {}: {e}",
                file.path().display()
            )
            .into());
        }

        debug!(path = %file.path().display(), "Wrote inline credentials to scratch file");
        Ok(Self { file })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

/// Picks the provider for a request: inline material if present, otherwise the ambient chain.
pub fn resolve_credentials(
    source: &Source,
    http: reqwest::Client,
) -> Result<Box<dyn CredentialProvider>, CredentialError> {
    match &source.credentials {
        Some(payload) if !is_blank(payload) => {
            info!("Using inline credentials from request");
            let scratch = CredentialScratch::write(payload)?;
            load_credentials_file(scratch.path(), http)
        }
        _ => ambient_credentials(http),
    }
}

/// Ambient chain: access token env var, key file env var, metadata server.
pub fn ambient_credentials(http: reqwest::Client) -> Result<Box<dyn CredentialProvider>, CredentialError> {
    if let Ok(token) = std::env::var(ACCESS_TOKEN_ENV) {
        if !token.trim().is_empty() {
            info!(source = ACCESS_TOKEN_ENV, "Using ambient access token");
            return Ok(Box::new(StaticToken::new(token.trim())));
        }
    }
    if let Ok(path) = std::env::var(KEY_FILE_ENV) {
        if !path.trim().is_empty() {
            info!(source = KEY_FILE_ENV, path = %path, "Using ambient key file");
            return load_credentials_file(Path::new(path.trim()), http);
        }
    }
    let host = std::env::var(METADATA_HOST_ENV)
        .ok()
        .filter(|h| !h.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_METADATA_HOST.to_string());
    info!(host = %host, "Using metadata server credentials");
    Ok(Box::new(OAuthProvider::new(
        http,
        Grant::MetadataServer {
            url: format!(
                "http://{}/computeMetadata/v1/instance/service-accounts/default/token",
                host.trim()
            ),
        },
    )))
}

/// Reads and parses a key file.
pub fn load_credentials_file(
    path: &Path,
    http: reqwest::Client,
) -> Result<Box<dyn CredentialProvider>, CredentialError> {
    let raw = std::fs::read_to_string(path).map_err(|e| -> CredentialError {
        error!(error = ?e, path = %path.display(), "Failed to read credentials file");
        format!("cannot read credentials file {}: {e}", path.display()).into()
    })?;
    let value: Value = serde_json::from_str(&raw).map_err(|e| -> CredentialError {
        error!(error = ?e, path = %path.display(), "Credentials file is not JSON");
        format!("credentials file {} is not valid JSON: {e}", path.display()).into()
    })?;
    provider_from_json(value, http)
}

/// Builds a provider from a parsed key file.
pub fn provider_from_json(
    value: Value,
    http: reqwest::Client,
) -> Result<Box<dyn CredentialProvider>, CredentialError> {
    let kind = value.get("type").and_then(Value::as_str).unwrap_or_default().to_string();
    match kind.as_str() {
        "service_account" => {
            let key: ServiceAccountKey = serde_json::from_value(value)?;
            let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes()).map_err(
                |e| -> CredentialError {
                    format!("service account {} has an unusable private key: {e}", key.client_email).into()
                },
            )?;
            info!(client_email = %key.client_email, "Loaded service account credentials");
            Ok(Box::new(OAuthProvider::new(
                http,
                Grant::ServiceAccount {
                    client_email: key.client_email,
                    key_id: key.private_key_id,
                    token_uri: key.token_uri,
                    signing_key,
                },
            )))
        }
        "authorized_user" => {
            let user: AuthorizedUser = serde_json::from_value(value)?;
            info!(client_id = %user.client_id, "Loaded authorized user credentials");
            Ok(Box::new(OAuthProvider::new(http, Grant::AuthorizedUser(user))))
        }
        _ => match value.get("access_token").and_then(Value::as_str) {
            Some(token) if !token.trim().is_empty() => Ok(Box::new(StaticToken::new(token.trim()))),
            _ => Err(format!("unsupported credentials type `{kind}`").into()),
        },
    }
}

fn is_blank(payload: &Value) -> bool {
    match payload {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// A fixed token, used as-is for every request.
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl CredentialProvider for StaticToken {
    async fn access_token(&self) -> Result<String, CredentialError> {
        Ok(self.0.clone())
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ServiceAccountKey {
    client_email: String,
    private_key: String,
    #[serde(default)]
    private_key_id: Option<String>,
    #[serde(default = "default_token_uri")]
    token_uri: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthorizedUser {
    client_id: String,
    client_secret: String,
    refresh_token: String,
    #[serde(default = "default_token_uri")]
    token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

enum Grant {
    ServiceAccount {
        client_email: String,
        key_id: Option<String>,
        token_uri: String,
        signing_key: EncodingKey,
    },
    AuthorizedUser(AuthorizedUser),
    MetadataServer {
        url: String,
    },
}

#[derive(Serialize)]
struct JwtClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: u64,
    exp: u64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// Provider that exchanges a grant for short-lived tokens and caches them.
pub struct OAuthProvider {
    http: reqwest::Client,
    grant: Grant,
    cache: Mutex<Option<CachedToken>>,
}

impl OAuthProvider {
    fn new(http: reqwest::Client, grant: Grant) -> Self {
        Self {
            http,
            grant,
            cache: Mutex::new(None),
        }
    }

    async fn fetch(&self) -> Result<TokenResponse, CredentialError> {
        let request = match &self.grant {
            Grant::ServiceAccount {
                client_email,
                key_id,
                token_uri,
                signing_key,
            } => {
                let iat = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
                let claims = JwtClaims {
                    iss: client_email.as_str(),
                    scope: STORAGE_SCOPE,
                    aud: token_uri.as_str(),
                    iat,
                    exp: iat + JWT_LIFETIME_SECS,
                };
                let mut header = Header::new(Algorithm::RS256);
                header.kid = key_id.clone();
                let assertion = jsonwebtoken::encode(&header, &claims, signing_key)?;
                self.http
                    .post(token_uri.as_str())
                    .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            }
            Grant::AuthorizedUser(user) => self.http.post(user.token_uri.as_str()).form(&[
                ("grant_type", "refresh_token"),
                ("client_id", user.client_id.as_str()),
                ("client_secret", user.client_secret.as_str()),
                ("refresh_token", user.refresh_token.as_str()),
            ]),
            Grant::MetadataServer { url } => self
                .http
                .get(url.as_str())
                .header("Metadata-Flavor", "Google"),
        };

        let resp = request.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            error!(status = %status, body = %body, "Token endpoint returned error");
            return Err(format!("token request failed with {status}: {body}").into());
        }
        Ok(resp.json::<TokenResponse>().await?)
    }
}

#[async_trait]
impl CredentialProvider for OAuthProvider {
    async fn access_token(&self) -> Result<String, CredentialError> {
        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.as_ref() {
            if cached.expires_at > Instant::now() + EXPIRY_MARGIN {
                return Ok(cached.value.clone());
            }
        }

        let token = self.fetch().await?;
        let lifetime = Duration::from_secs(token.expires_in.unwrap_or(JWT_LIFETIME_SECS));
        debug!(expires_in_secs = lifetime.as_secs(), "Obtained access token");
        *cache = Some(CachedToken {
            value: token.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });
        Ok(token.access_token)
    }
}
