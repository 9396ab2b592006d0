pub mod mcp_client;
pub mod runner;

/// Initialize the tracing subscriber with structured logs on stderr.
///
/// `RUST_LOG` takes precedence. Otherwise the crate logs at `info` (or
/// `debug` when `debug` is set) and dependencies at `warn`. Stdout stays free
/// for the run's own output.
pub fn init_tracing(debug: bool, json: bool) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let default_directives = if debug {
        "mcp_scenario_runner=debug,warn"
    } else {
        "mcp_scenario_runner=info,warn"
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives));

    let builder = fmt::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false);

    // A second call (e.g. from tests) keeps the first subscriber.
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    tracing::debug!(
        version = env!("CARGO_PKG_VERSION"),
        pid = std::process::id(),
        "=== mcp-scenario-runner starting ==="
    );
}
