use anyhow::{Context, Result};
use tracing_subscriber::filter::{EnvFilter, LevelFilter};

/// Installs the global subscriber.
///
/// `RUST_LOG` takes precedence; `level` is the fallback directive. Logs go
/// to stderr so stdout carries nothing but colour messages.
pub fn init(level: &str) -> Result<()> {
    let default_level: LevelFilter = level
        .parse()
        .with_context(|| format!("Invalid log level: {level}"))?;

    let filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
    Ok(())
}
