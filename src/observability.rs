use std::sync::OnceLock;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

static INIT: OnceLock<()> = OnceLock::new();

fn resolve_env_filter() -> tracing_subscriber::EnvFilter {
    if let Ok(level) = std::env::var("LEDGER_LOG_LEVEL") {
        if let Ok(filter) = tracing_subscriber::EnvFilter::try_new(level) {
            return filter;
        }
    }
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
}

/// Initialize logging once per process.
///
/// Environment variables:
/// - `LEDGER_LOG_LEVEL`: level/filter override (`info`, `cashbook=debug`, ...).
/// - `RUST_LOG`: used when `LEDGER_LOG_LEVEL` is unset.
/// - `LEDGER_LOG_FORMAT=json`: JSON lines instead of the compact console format.
///
/// Logs go to stderr so CLI output on stdout stays clean.
pub fn init_logging() {
    INIT.get_or_init(|| {
        let env_filter = resolve_env_filter();
        let json = std::env::var("LEDGER_LOG_FORMAT")
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        if json {
            let json_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_target(false)
                .with_writer(std::io::stderr);
            let _ = tracing_subscriber::registry()
                .with(env_filter)
                .with(json_layer)
                .try_init();
        } else {
            let console_layer = tracing_subscriber::fmt::layer()
                .compact()
                .with_target(false)
                .with_writer(std::io::stderr);
            let _ = tracing_subscriber::registry()
                .with(env_filter)
                .with(console_layer)
                .try_init();
        }
    });
}
