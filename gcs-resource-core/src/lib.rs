#![doc = "gcs-resource-core: core logic library for gcs-resource."]

//! Everything that does not talk to the network lives here: the resource protocol
//! types, the directory scanner, the version clock and the sequential publish
//! pipeline that drives an [`contract::ObjectUploader`].
//!
//! # Usage
//! The `gcs-resource` binary crate wires a real Google Cloud Storage client into
//! [`publish::publish`]; tests wire in the mocks exported from [`contract`].

pub mod contract;
pub mod error;
pub mod protocol;
pub mod publish;
pub mod scan;
pub mod version;
