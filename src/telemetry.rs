use std::io::{self, IsTerminal};
use std::sync::OnceLock;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::error::TelemetryError;

static TRACING_INITIALISED: OnceLock<Result<(), TelemetryError>> = OnceLock::new();

/// Initialises structured logging once per process.
///
/// `level_override` takes precedence over `RUST_LOG`; without either, the
/// filter defaults to `warn`. Interactive stderr gets human-readable output,
/// everything else gets JSON lines.
pub(crate) fn initialise_tracing(
    level_override: Option<&str>,
    interactive_terminal: bool,
) -> Result<(), &'static TelemetryError> {
    TRACING_INITIALISED
        .get_or_init(|| initialise_tracing_once(level_override, interactive_terminal))
        .as_ref()
        .copied()
}

fn initialise_tracing_once(
    level_override: Option<&str>,
    interactive_terminal: bool,
) -> Result<(), TelemetryError> {
    let log_filter = match level_override {
        Some(directive) => EnvFilter::new(directive),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    };
    let is_interactive = interactive_terminal && io::stderr().is_terminal();

    if is_interactive {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .pretty()
                    .with_target(false)
                    .with_writer(io::stderr)
                    .with_filter(log_filter),
            )
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .json()
                    .with_target(false)
                    .with_writer(io::stderr)
                    .with_filter(log_filter),
            )
            .try_init()?;
    }

    Ok(())
}
