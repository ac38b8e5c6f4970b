//! Tracing subscriber setup.
//!
//! Library code only emits `tracing` events; binaries and tests that want to
//! see them call one of the initializers here. The filter comes from
//! `RUST_LOG` and defaults to `info`.

use std::sync::Once;
use tracing::info;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

static INIT: Once = Once::new();

fn env_filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Initialize the global tracing subscriber with human-readable output.
///
/// Only the first initializer called in a process takes effect.
pub fn init_tracing() {
    init_tracing_with_default("info");
}

/// Like [`init_tracing`], with a fallback filter used when `RUST_LOG` is unset.
pub fn init_tracing_with_default(default_filter: &str) {
    INIT.call_once(|| {
        let fmt_layer = fmt::layer()
            .with_span_events(FmtSpan::CLOSE)
            .with_target(true)
            .with_thread_ids(true)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true);

        // A subscriber installed elsewhere (e.g. by a test harness) wins.
        let installed = tracing_subscriber::registry()
            .with(env_filter(default_filter))
            .with(fmt_layer)
            .try_init()
            .is_ok();

        if installed {
            info!("perfcap tracing initialized");
        }
    });
}

/// Initialize tracing with JSON output for structured logging.
pub fn init_tracing_json() {
    INIT.call_once(|| {
        let fmt_layer = fmt::layer()
            .json()
            .with_span_events(FmtSpan::CLOSE)
            .with_target(true)
            .with_thread_ids(true)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true)
            .with_current_span(true);

        let installed = tracing_subscriber::registry()
            .with(env_filter("info"))
            .with(fmt_layer)
            .try_init()
            .is_ok();

        if installed {
            info!("perfcap tracing initialized (JSON mode)");
        }
    });
}
