pub mod cli;
pub mod config;
pub mod credentials;
pub mod gcs;

pub use cli::{run, Cli, Invocation, Verb};
