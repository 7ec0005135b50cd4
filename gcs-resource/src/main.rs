use clap::Parser;
use gcs_resource::cli::{run, Cli};
use gcs_resource::config::LOG_ENV;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Load environment
    dotenvy::dotenv().ok();

    // Stdout is reserved for the response document, so all logging goes to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let argv0 = std::env::args().next();
    let result = match Cli::parse().resolve(argv0.as_deref()) {
        Ok(invocation) => run(invocation, std::io::stdin().lock(), std::io::stdout().lock()).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => tracing::info!("Resource completed successfully"),
        Err(e) => {
            tracing::error!(error = %e, "Resource exited with error");
            eprintln!("error: {e:#}");
            std::process::exit(1);
        }
    }
}
