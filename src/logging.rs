//! Tracing setup shared by the binaries.

use anyhow::{Context, Result, anyhow};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::LogFormat;

/// Builds the filter: `RUST_LOG` when set, otherwise `default_directives`.
pub fn build_env_filter(default_directives: &str) -> Result<EnvFilter> {
    let from_env = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    resolve_env_filter(from_env.as_deref(), default_directives)
}

/// Valid `env_directives` win; anything else falls back to the default,
/// which must parse.
fn resolve_env_filter(env_directives: Option<&str>, default_directives: &str) -> Result<EnvFilter> {
    if let Some(filter) = env_directives
        .filter(|directives| !directives.trim().is_empty())
        .and_then(|directives| EnvFilter::try_new(directives).ok())
    {
        return Ok(filter);
    }
    EnvFilter::try_new(default_directives)
        .with_context(|| format!("invalid log filter {default_directives:?}"))
}

/// Installs the global subscriber writing to stderr, which keeps stdout free
/// for command output. Fails if a subscriber is already installed.
pub fn init_tracing(default_directives: &str, format: LogFormat) -> Result<()> {
    let filter = build_env_filter(default_directives)?;
    let registry = tracing_subscriber::registry().with(filter);
    let installed = match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Text => registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
    };
    installed.map_err(|err| anyhow!("installing tracing subscriber: {err}"))
}
