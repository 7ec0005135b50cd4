//! Resource protocol: the JSON documents exchanged with the orchestrator over the
//! standard streams, plus helpers to read exactly one request and write exactly one
//! response.
//!
//! Stdout carries nothing but the response document. Diagnostics belong on stderr.

use std::fmt;
use std::io::{Read, Write};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ProtocolError;

/// Placeholder reported when no version is known.
pub const NO_VERSION: &str = "none";

/// Resource configuration shared by every verb.
#[derive(Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Source {
    /// Storage API endpoint. Empty means the configured default.
    #[serde(default)]
    pub url: String,
    /// Inline credential material: a JSON object, or a string holding one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<serde_json::Value>,
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Source")
            .field("url", &self.url)
            .field(
                "credentials",
                &self.credentials.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

/// A version as sent by the orchestrator. Either field may be empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Version {
    #[serde(default, rename = "ref", skip_serializing_if = "String::is_empty")]
    pub reference: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub timestamp: String,
}

impl Version {
    /// The token to echo back: the timestamp if set, else the ref, else nothing.
    pub fn token(&self) -> Option<&str> {
        [self.timestamp.as_str(), self.reference.as_str()]
            .into_iter()
            .find(|t| !t.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct OutParams {
    /// Directory to publish, relative to the source root argument.
    #[serde(default)]
    pub source: String,
    pub bucket: String,
    #[serde(default)]
    pub prefix: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct OutRequest {
    #[serde(default, deserialize_with = "null_as_default")]
    pub source: Source,
    #[serde(default, deserialize_with = "null_as_default")]
    pub version: Version,
    pub params: OutParams,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct InRequest {
    #[serde(default, deserialize_with = "null_as_default")]
    pub source: Source,
    #[serde(default, deserialize_with = "null_as_default")]
    pub version: Version,
    #[serde(default)]
    pub params: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TimestampVersion {
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct MetadataField {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct OutResponse {
    pub version: TimestampVersion,
    pub metadata: Vec<MetadataField>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct InResponse {
    pub version: TimestampVersion,
}

impl InResponse {
    /// Echoes the requested version, or [`NO_VERSION`] when the request carried none.
    pub fn echo(requested: &Version) -> Self {
        Self {
            version: TimestampVersion {
                timestamp: requested.token().unwrap_or(NO_VERSION).to_string(),
            },
        }
    }
}

/// `check` never enumerates versions.
pub type CheckResponse = Vec<TimestampVersion>;

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Decodes exactly one JSON document from `reader`. Trailing non-whitespace is an error.
pub fn read_request<T, R>(reader: R) -> Result<T, ProtocolError>
where
    T: DeserializeOwned,
    R: Read,
{
    Ok(serde_json::from_reader(reader)?)
}

/// Like [`read_request`], but an empty (or all-whitespace) stream yields `T::default()`.
pub fn read_optional_request<T, R>(mut reader: R) -> Result<T, ProtocolError>
where
    T: DeserializeOwned + Default,
    R: Read,
{
    let mut raw = String::new();
    reader
        .read_to_string(&mut raw)
        .map_err(ProtocolError::Read)?;
    if raw.trim().is_empty() {
        return Ok(T::default());
    }
    Ok(serde_json::from_str(&raw)?)
}

/// Encodes `response` as one line of JSON and flushes.
pub fn write_response<T, W>(mut writer: W, response: &T) -> Result<(), ProtocolError>
where
    T: Serialize,
    W: Write,
{
    serde_json::to_writer(&mut writer, response).map_err(ProtocolError::Encode)?;
    writeln!(writer).map_err(ProtocolError::Write)?;
    writer.flush().map_err(ProtocolError::Write)
}
