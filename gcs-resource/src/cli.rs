/// # gcs-resource CLI Interface
///
/// The binary is installed once and invoked under three names (`check`, `in`, `out`),
/// usually as links in the image. The verb is taken from `--cmd` when given, otherwise
/// from the file name the process was started as.
///
/// Each verb reads at most one JSON request from stdin and writes exactly one JSON
/// response to stdout, or nothing at all when it fails. Diagnostics go to stderr through
/// `tracing`; the exit status is the only other signal the orchestrator sees.
///
/// Business logic (scan, publish, protocol types) lives in [`gcs-resource-core`]; this
/// module is glue between the process, the configuration and the storage client.
///
/// [`gcs-resource-core`]: ../../gcs-resource-core/
use std::io::{Read, Write};
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, ValueEnum};
use gcs_resource_core::protocol::{
    read_optional_request, read_request, write_response, CheckResponse, InRequest, InResponse,
    OutRequest,
};
use gcs_resource_core::publish::publish;
use gcs_resource_core::version::SystemClock;

use crate::config::load_config;
use crate::gcs;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Verb {
    Check,
    In,
    Out,
}

/// Publish a directory tree to a Google Cloud Storage bucket.
#[derive(Debug, Parser)]
#[clap(
    name = "gcs-resource",
    version,
    about = "Pipeline resource that publishes a directory tree to a GCS bucket"
)]
pub struct Cli {
    /// Verb to run; defaults to the name the binary was invoked as
    #[clap(long, value_enum)]
    pub cmd: Option<Verb>,

    /// Positional arguments of the verb (`in <destination>`, `out <source>`)
    pub args: Vec<String>,
}

/// A fully resolved invocation: which verb, with which arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub verb: Verb,
    pub args: Vec<String>,
}

impl Cli {
    /// Resolves the verb from `--cmd`, else from the basename of `argv0`.
    pub fn resolve(self, argv0: Option<&str>) -> Result<Invocation> {
        let verb = match self.cmd {
            Some(verb) => verb,
            None => {
                let name = argv0
                    .map(Path::new)
                    .and_then(Path::file_name)
                    .and_then(|n| n.to_str())
                    .ok_or_else(|| anyhow!("cannot determine verb: no --cmd and no program name"))?;
                Verb::from_str(name, true)
                    .map_err(|_| anyhow!("unknown verb `{name}`: expected check, in or out"))?
            }
        };
        Ok(Invocation {
            verb,
            args: self.args,
        })
    }
}

/// Async entrypoint shared by `main` and the integration tests.
pub async fn run<R, W>(invocation: Invocation, stdin: R, stdout: W) -> Result<()>
where
    R: Read,
    W: Write,
{
    tracing::info!("trace_initialised");
    tracing::info!(verb = ?invocation.verb, args = ?invocation.args, "Dispatching verb");

    match invocation.verb {
        Verb::Check => {
            let versions: CheckResponse = Vec::new();
            write_response(stdout, &versions).context("writing check response")?;
        }
        Verb::In => {
            single_arg(&invocation.args, "in <destination>")?;
            let request: InRequest =
                read_optional_request(stdin).context("decoding in request")?;
            let response = InResponse::echo(&request.version);
            tracing::info!(version = %response.version.timestamp, "[IN] Echoing version");
            write_response(stdout, &response).context("writing in response")?;
        }
        Verb::Out => {
            let source_root = single_arg(&invocation.args, "out <source>")?;
            let request: OutRequest = read_request(stdin).context("decoding out request")?;
            tracing::debug!(?request, "[OUT] Decoded request");

            let config = load_config()?;
            let publish_config = config.publish_config();
            let result = publish(
                &request,
                Path::new(source_root),
                &SystemClock,
                &publish_config,
                || std::future::ready(gcs::connect(&request.source, &config)),
            )
            .await;

            match result {
                Ok(response) => {
                    tracing::info!(
                        version = %response.version.timestamp,
                        objects = response.metadata.len(),
                        "[OUT] Publish succeeded"
                    );
                    write_response(stdout, &response).context("writing out response")?;
                }
                Err(e) => {
                    tracing::error!(error = %e, "[OUT] Publish failed");
                    return Err(e.into());
                }
            }
        }
    }
    Ok(())
}

fn single_arg<'a>(args: &'a [String], usage: &str) -> Result<&'a str> {
    match args {
        [only] => Ok(only.as_str()),
        _ => bail!("usage: {usage}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verb_comes_from_program_name_when_cmd_is_absent() {
        let cli = Cli::parse_from(["/opt/resource/out", "/tmp/build"]);
        let invocation = cli.resolve(Some("/opt/resource/out")).unwrap();
        assert_eq!(invocation.verb, Verb::Out);
        assert_eq!(invocation.args, vec!["/tmp/build".to_string()]);
    }

    #[test]
    fn cmd_flag_wins_over_program_name() {
        let cli = Cli::parse_from(["gcs-resource", "--cmd", "in", "/tmp/dest"]);
        let invocation = cli.resolve(Some("/usr/bin/gcs-resource")).unwrap();
        assert_eq!(invocation.verb, Verb::In);
    }

    #[test]
    fn unknown_program_name_is_an_error() {
        let cli = Cli::parse_from(["gcs-resource"]);
        let err = cli.resolve(Some("/usr/bin/gcs-resource")).unwrap_err();
        assert!(err.to_string().contains("gcs-resource"));
    }

    #[test]
    fn positional_count_is_enforced() {
        assert!(single_arg(&[], "out <source>").is_err());
        assert!(single_arg(&["a".into(), "b".into()], "out <source>").is_err());
        assert_eq!(single_arg(&["a".into()], "out <source>").unwrap(), "a");
    }
}
