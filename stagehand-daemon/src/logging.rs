//! Subscriber setup shared by the CLI and the daemon.

use tracing_subscriber::{fmt, EnvFilter};

/// `json` switches the output to one JSON object per event.
pub const ENV_LOG_FORMAT: &str = "STAGEHAND_LOG_FORMAT";

/// Install the global subscriber. `RUST_LOG` overrides `default_level`.
///
/// Calling this more than once is harmless; later calls are ignored.
pub fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let json = std::env::var(ENV_LOG_FORMAT)
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let builder = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}
