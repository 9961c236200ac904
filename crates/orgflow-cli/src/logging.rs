use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber for the CLI.
///
/// A `RUST_LOG` directive in the environment takes precedence over the
/// `--log-level` flag. Targets are suppressed to keep console output
/// readable.
pub fn init(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::fmt()
        .compact()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
