//! Diagnostic logging bootstrap.
//!
//! Diagnostics always go to stderr so they never interleave with a
//! credential log written to stdout.

use tracing_subscriber::EnvFilter;

use crate::cli::DiagFormat;

/// Builds the filter: `RUST_LOG` when set, otherwise the given level with
/// russh's own chatter capped below trace.
pub fn filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives(level)))
}

fn default_directives(level: &str) -> String {
    if level == "trace" {
        level.to_string()
    } else {
        format!("{level},russh=warn,russh_keys=warn")
    }
}

/// Installs the global subscriber.
///
/// # Errors
///
/// Returns an error if a global subscriber is already set.
pub fn init(level: &str, format: DiagFormat) -> anyhow::Result<()> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter(level))
        .with_writer(std::io::stderr)
        .with_target(false);

    match format {
        DiagFormat::Pretty => builder
            .try_init()
            .map_err(|e| anyhow::anyhow!("cannot install diagnostics: {e}"))?,
        DiagFormat::Json => builder
            .json()
            .try_init()
            .map_err(|e| anyhow::anyhow!("cannot install diagnostics: {e}"))?,
    }

    Ok(())
}
