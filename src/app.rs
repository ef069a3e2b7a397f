use std::io;

use anyhow::Result;
use tracing::instrument;

use crate::cli::{Command, LogLevel, OutputFormat};
use crate::error::InteractionError;
use crate::hw::{
    FakeBackendConfig, HardwareBackend, HardwareClient, hardware_client_from_backend,
};
use crate::telemetry;

/// Creates a hardware client backed by the real BLE transport.
///
/// # Errors
///
/// Returns an error when the BLE manager cannot be initialised.
pub async fn real_hardware_client() -> Result<Box<dyn HardwareClient>, InteractionError> {
    hardware_client_from_backend(HardwareBackend::Real).await
}

/// Creates a hardware client backed by fake BLE fixtures.
///
/// ```
/// # async fn demo() -> anyhow::Result<()> {
/// use weartest::{FakeBackendConfig, ScanFixture};
///
/// let fixture: ScanFixture = "hci0|AA:BB:CC:DD:EE:FF|Lapita_001|-43".parse()?;
/// let config = FakeBackendConfig::builder().scan_fixture(fixture).build();
/// let client = weartest::fake_hardware_client(config).await?;
/// let _ = client;
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Infallible for the fake backend today; the signature matches the real
/// constructor so callers can switch backends uniformly.
pub async fn fake_hardware_client(
    config: FakeBackendConfig,
) -> Result<Box<dyn HardwareClient>, InteractionError> {
    hardware_client_from_backend(HardwareBackend::Fake(config)).await
}

/// Runs the CLI command with an injected hardware client.
///
/// ```
/// # async fn run() -> anyhow::Result<()> {
/// use clap::Parser;
///
/// let args = weartest::Args::try_parse_from([
///     "weartest",
///     "--fake",
///     "--fake-scan",
///     "hci0|AA:BB:CC:DD:EE:FF|Lapita_001|-43",
///     "run",
///     "--motion-window",
///     "50ms",
/// ])?;
/// let (command, _fake_args) = args.into_command_and_fake_args()?;
/// # let _ = command;
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, connecting to a device
/// fails, or output writing fails. Step failures are reported, not errors.
pub async fn run<W>(
    command: Command,
    out: &mut W,
    hardware_client: Box<dyn HardwareClient>,
) -> Result<()>
where
    W: io::Write,
{
    run_with_options(command, out, hardware_client, None, OutputFormat::Pretty).await
}

/// Runs the CLI command with explicit telemetry and output settings.
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, connecting to a device
/// fails, or output writing fails. Step failures are reported, not errors.
#[instrument(
    skip(out, hardware_client),
    level = "info",
    fields(command = %command_name(&command), ?log_level, ?output_format)
)]
pub async fn run_with_options<W>(
    command: Command,
    out: &mut W,
    hardware_client: Box<dyn HardwareClient>,
    log_level: Option<LogLevel>,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    telemetry::initialise_tracing(log_level.map(LogLevel::as_directive), true)?;

    match command {
        Command::Run(args) => {
            crate::cli::run::run(hardware_client, &args, out, output_format).await
        }
    }
}

fn command_name(command: &Command) -> &'static str {
    match command {
        Command::Run(_args) => "run",
    }
}
