use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Install the global subscriber.
///
/// Levels come from `RUST_LOG` (`info` when unset). `debug` switches from
/// JSON lines to coloured human-readable output.
pub fn init_tracing(debug: bool) {
    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let base_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_level(true);

    let log_layer = if debug {
        base_layer.with_ansi(true).with_filter(filter()).boxed()
    } else {
        base_layer.json().with_filter(filter()).boxed()
    };

    tracing_subscriber::registry().with(log_layer).init();
}
