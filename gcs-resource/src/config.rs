/// `config` module: process-level settings read from the environment.
///
/// Request-level settings (bucket, prefix, credentials) come from the JSON request; this
/// module only covers what the operator tunes for the whole installation.
///
/// # Variables
/// - `GCS_RESOURCE_UPLOAD_TIMEOUT_SECS`: per-file upload deadline (default 300)
/// - `GCS_RESOURCE_ENDPOINT`: storage API endpoint used when `source.url` is empty
/// - `GCS_RESOURCE_LOG`: tracing filter, read by `main`
///
/// # Errors
/// Malformed values are reported through `anyhow` with the variable name and value.
use std::env::VarError;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use gcs_resource_core::protocol::Source;
use gcs_resource_core::publish::{PublishConfig, DEFAULT_UPLOAD_TIMEOUT};
use tracing::{error, info};

pub const DEFAULT_ENDPOINT: &str = "https://storage.googleapis.com";
pub const UPLOAD_TIMEOUT_ENV: &str = "GCS_RESOURCE_UPLOAD_TIMEOUT_SECS";
pub const ENDPOINT_ENV: &str = "GCS_RESOURCE_ENDPOINT";
pub const LOG_ENV: &str = "GCS_RESOURCE_LOG";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceConfig {
    pub endpoint: String,
    pub upload_timeout: Duration,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            upload_timeout: DEFAULT_UPLOAD_TIMEOUT,
        }
    }
}

impl ResourceConfig {
    /// The endpoint for this request: `source.url` wins when set.
    pub fn endpoint_for<'a>(&'a self, source: &'a Source) -> &'a str {
        let url = source.url.trim();
        if url.is_empty() {
            &self.endpoint
        } else {
            url
        }
    }

    pub fn publish_config(&self) -> PublishConfig {
        PublishConfig {
            upload_timeout: self.upload_timeout,
        }
    }
}

/// Loads the configuration from the process environment.
pub fn load_config() -> Result<ResourceConfig> {
    load_config_from(|key| std::env::var(key))
}

/// Loads the configuration through `lookup`, which behaves like [`std::env::var`].
pub fn load_config_from<F>(lookup: F) -> Result<ResourceConfig>
where
    F: Fn(&str) -> Result<String, VarError>,
{
    let mut config = ResourceConfig::default();

    match lookup(UPLOAD_TIMEOUT_ENV) {
        Ok(raw) => {
            let seconds = raw.trim().parse::<u64>().with_context(|| {
                error!(var = UPLOAD_TIMEOUT_ENV, value = %raw, "Upload timeout is not an integer");
                format!("parsing {UPLOAD_TIMEOUT_ENV} value `{raw}`")
            })?;
            if seconds == 0 {
                error!(var = UPLOAD_TIMEOUT_ENV, "Upload timeout must be positive");
                bail!("{UPLOAD_TIMEOUT_ENV} must be a positive number of seconds");
            }
            config.upload_timeout = Duration::from_secs(seconds);
        }
        Err(VarError::NotPresent) => {}
        Err(e) => return Err(e).context(format!("reading {UPLOAD_TIMEOUT_ENV}")),
    }

    match lookup(ENDPOINT_ENV) {
        Ok(raw) if !raw.trim().is_empty() => {
            config.endpoint = raw.trim().trim_end_matches('/').to_string();
        }
        Ok(_) | Err(VarError::NotPresent) => {}
        Err(e) => return Err(e).context(format!("reading {ENDPOINT_ENV}")),
    }

    info!(
        endpoint = %config.endpoint,
        upload_timeout_secs = config.upload_timeout.as_secs(),
        "Resource configuration loaded"
    );
    Ok(config)
}
