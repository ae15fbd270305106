//! `asc-web`: runs the service-center site.
//!
//! Configuration is read from `appsettings.json` and
//! `appsettings.{ASC_ENVIRONMENT}.json` in the content root (`ASC_CONTENT_ROOT`,
//! default: the working directory), then from environment variables such as
//! `ConnectionStrings__DefaultConnection`.

use std::path::PathBuf;
use std::process::ExitCode;

use asc_web::{Bootstrap, ConfigSource};
use tracing::error;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("asc_web=info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    let content_root = std::env::var_os("ASC_CONTENT_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));

    match Bootstrap::new(ConfigSource::from_env(content_root)).run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "asc-web terminated");
            ExitCode::FAILURE
        }
    }
}
