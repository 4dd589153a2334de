use tracing::warn;
use tracing_subscriber::{EnvFilter, fmt};

/// Installs the global `tracing` subscriber. `RUST_LOG` controls verbosity
/// (default `info`). Output goes to stderr so stdout stays machine-readable.
pub fn init(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt().with_env_filter(filter).with_writer(std::io::stderr);
    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if let Err(e) = result {
        warn!(error = %e, "tracing init failed");
    }
}
