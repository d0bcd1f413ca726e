//! Tracing subscriber setup for console diagnostics.
//!
//! All pipeline diagnostics go through `tracing`; the subscriber writes
//! compact lines to stderr so task output on stdout stays clean. `RUST_LOG`
//! overrides the level derived from the verbosity flags.

use tracing_subscriber::EnvFilter;

/// Install the global subscriber. Verbosity maps to the `stave` target
/// level: warnings by default, info with `--verbose`, debug with `--debug`.
///
/// Safe to call more than once; later calls are ignored.
pub fn init_subscriber(verbose: bool, debug: bool) {
    let level = if debug {
        "debug"
    } else if verbose {
        "info"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("stave={level}")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .try_init()
        .ok();
}
