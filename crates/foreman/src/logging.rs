//! Logging setup shared by the master and slave binaries.
//!
//! Structured logging with the `tracing` crate: compact format, no module
//! targets, `RUST_LOG` controls the filter. `--quiet` raises the floor to
//! warnings; `--log_dir` writes to a file instead of stderr.

use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

pub fn setup_tracing(program: &str, quiet: bool, log_dir: Option<&Path>) -> anyhow::Result<()> {
    let default_filter = if quiet { "warn" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact();
    match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let file = std::fs::File::create(dir.join(format!("{program}.log")))?;
            builder.with_writer(Arc::new(file)).with_ansi(false).init();
        }
        None => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}
