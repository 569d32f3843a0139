//! Tracing subscriber setup.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize logging to stderr.
///
/// `RUST_LOG` overrides the default level; `--debug` raises the default
/// from `info` to `debug` for all tabsync crates.
pub fn init(debug: bool) {
    let default = if debug {
        "info,tabsync=debug,tabsync_cli=debug,tabsync_engine=debug,tabsync_directory=debug,tabsync_tableau=debug"
    } else {
        "info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(filter)
        .init();
}
