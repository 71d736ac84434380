/// Install the global tracing subscriber. Output goes to stderr so command
/// output on stdout stays machine-readable. `RUST_LOG` overrides the default
/// `info` filter; `QUESTLINE_LOG_JSON=1` switches to JSON lines.
pub fn init_logging() {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("QUESTLINE_LOG_JSON").is_ok_and(|v| v == "1" || v.eq_ignore_ascii_case("true"));

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if json {
        registry
            .with(fmt::layer().with_writer(std::io::stderr).with_target(true).json())
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
            .try_init()
    };

    if installed.is_ok() {
        tracing::debug!(json, "logging initialized");
    }
}
