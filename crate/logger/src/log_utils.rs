use std::sync::Once;

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

static LOG_INIT: Once = Once::new();

/// Fallback directive used when neither `RUST_LOG` nor a default is supplied
const DEFAULT_DIRECTIVE: &str = "info";

/// Install the global tracing subscriber.
///
/// The filter is read from `RUST_LOG`, else `default_value`, else `info`.
/// Only the first call installs the subscriber.
pub fn log_init(default_value: Option<&str>) {
    LOG_INIT.call_once(|| {
        let directive = std::env::var("RUST_LOG")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .or_else(|| default_value.map(ToOwned::to_owned))
            .unwrap_or_else(|| DEFAULT_DIRECTIVE.to_owned());
        tracing_setup(&directive);
    });
}

fn tracing_setup(directive: &str) {
    let format = tracing_subscriber::fmt::layer()
        .with_level(true)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(true)
        .compact();

    let filter = EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE));

    // a subscriber may already be installed by the embedding application
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(format)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::log_init;

    #[test]
    fn test_log_init_is_idempotent() {
        log_init(Some("debug"));
        log_init(None);
        tracing::info!("logger initialised twice without panicking");
    }
}
