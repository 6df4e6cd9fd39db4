// Tracing subscriber setup shared by front ends
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str = "info,instalicious_core=info";

/// Install a global fmt subscriber.
///
/// `RUST_LOG` wins over `default_filter`. With `json` the output is one JSON
/// object per line. Calling this twice is harmless; the second call is ignored.
pub fn init_tracing(default_filter: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    let installed = if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .json()
            .try_init()
            .is_ok()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init()
            .is_ok()
    };

    if installed {
        info!(target = "telemetry", json, "Tracing initialized");
    }
}
