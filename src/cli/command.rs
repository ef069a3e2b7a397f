use std::path::PathBuf;
use std::time::Duration;

use bon::Builder;
use clap::{Parser, Subcommand, ValueEnum};

use crate::error::{CliConfigError, FixtureError};
use crate::hw::{
    EndpointNotifyFixture, EndpointReadFixture, FakeBackendConfig, FakeDeviceScript, FakeJournal,
    ScanFixture,
};
use crate::protocol::EndpointId;

/// Command-line options for the acceptance station.
#[derive(Debug, Parser)]
#[command(name = "weartest", about = "End-of-line acceptance station for Lapita wearables.")]
pub struct Args {
    /// Logging verbosity override; without it, `RUST_LOG` or `warn` applies.
    #[arg(long, global = true, value_enum)]
    log_level: Option<LogLevel>,
    /// Report output format; defaults to pretty on a terminal, JSON otherwise.
    #[arg(long, global = true, value_enum)]
    format: Option<OutputFormat>,
    /// Uses the fake BLE backend with fixture-driven discovery and payloads.
    #[arg(long, global = true)]
    fake: bool,
    /// Fake scan fixtures in the form `adapter|device_id|local_name|rssi;...`.
    #[arg(long, global = true, requires = "fake", required_if_eq("fake", "true"))]
    fake_scan: Option<ScanFixture>,
    /// Scripted read payloads in the form `endpoint=hexpayload` (repeatable).
    #[arg(long = "fake-read", global = true, requires = "fake")]
    fake_reads: Vec<EndpointReadFixture>,
    /// Scripted notifications in the form `endpoint=hex,hex,...` (repeatable).
    #[arg(long = "fake-notify", global = true, requires = "fake")]
    fake_notifications: Vec<EndpointNotifyFixture>,
    /// Artificial fake scan delay (e.g. `250ms`, `2s`).
    #[arg(long, global = true, requires = "fake", value_parser = parse_duration)]
    fake_discovery_delay: Option<Duration>,
    #[command(subcommand)]
    command: Command,
}

impl Args {
    /// Returns the requested logging verbosity override.
    #[must_use]
    pub fn log_level(&self) -> Option<LogLevel> {
        self.log_level
    }

    /// Returns the requested report output format.
    #[must_use]
    pub fn output_format(&self) -> Option<OutputFormat> {
        self.format
    }

    /// Splits parsed CLI arguments into command and optional fake-client settings.
    ///
    /// # Errors
    ///
    /// Returns an error if CLI backend configuration is invalid.
    pub fn into_command_and_fake_args(self) -> anyhow::Result<(Command, Option<FakeArgs>)> {
        let Args {
            log_level: _,
            format: _,
            fake,
            fake_scan,
            fake_reads,
            fake_notifications,
            fake_discovery_delay,
            command,
        } = self;

        let fake_args = if fake {
            let Some(scan_fixture) = fake_scan else {
                return Err(CliConfigError::MissingFakeScanFixture.into());
            };
            Some(FakeArgs {
                scan_fixture,
                reads: fake_reads.into_iter().map(Into::into).collect(),
                notifications: fake_notifications.into_iter().map(Into::into).collect(),
                discovery_delay: fake_discovery_delay.unwrap_or(Duration::ZERO),
            })
        } else {
            None
        };

        Ok((command, fake_args))
    }
}

/// Fake backend arguments for programmatic runs.
#[derive(Debug, Builder)]
pub struct FakeArgs {
    #[builder(with = |value: &str| -> std::result::Result<_, FixtureError> { value.parse() })]
    scan_fixture: ScanFixture,
    #[builder(default)]
    reads: Vec<(EndpointId, Vec<u8>)>,
    #[builder(default)]
    notifications: Vec<(EndpointId, Vec<Vec<u8>>)>,
    #[builder(default)]
    discovery_delay: Duration,
}

impl FakeArgs {
    /// Converts CLI fake settings into a backend configuration sharing
    /// `journal` with the caller.
    #[must_use]
    pub fn into_backend_config(self, journal: FakeJournal) -> FakeBackendConfig {
        let Self {
            scan_fixture,
            reads,
            notifications,
            discovery_delay,
        } = self;

        let script = FakeDeviceScript::builder()
            .reads(reads)
            .notifications(notifications)
            .build();

        FakeBackendConfig::builder()
            .scan_fixture(scan_fixture)
            .script(script)
            .journal(journal)
            .discovery_delay(discovery_delay)
            .build()
    }
}

/// Supported CLI commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Scan for the first fixture device, run the acceptance sequence, and
    /// print the run report.
    Run(RunArgs),
}

/// Options of the `run` subcommand.
#[derive(Debug, clap::Args)]
pub struct RunArgs {
    /// BLE local-name prefix identifying fixture devices.
    #[arg(long, default_value = "Lapita_")]
    name_prefix: String,
    /// Ledger file path; defaults to the platform data directory.
    #[arg(long)]
    ledger: Option<PathBuf>,
    /// Pause on each LED colour during the LED exercise.
    #[arg(long, default_value = "1s", value_parser = parse_duration)]
    led_dwell: Duration,
    /// Monitor poll interval; bounds cancellation latency.
    #[arg(long, default_value = "100ms", value_parser = parse_duration)]
    poll_interval: Duration,
    /// Button presses required before the gate step passes.
    #[arg(long, default_value_t = 2)]
    button_target: u32,
    /// How long the motion monitor observes the telemetry stream.
    #[arg(long, default_value = "5s", value_parser = parse_duration)]
    motion_window: Duration,
    /// Upper bound on discovery plus link establishment.
    #[arg(long, default_value = "30s", value_parser = parse_duration)]
    connect_timeout: Duration,
    /// Upper bound on each GATT operation.
    #[arg(long, default_value = "5s", value_parser = parse_duration)]
    op_timeout: Duration,
}

impl RunArgs {
    pub(crate) fn name_prefix(&self) -> &str {
        &self.name_prefix
    }

    pub(crate) fn ledger(&self) -> Option<&PathBuf> {
        self.ledger.as_ref()
    }

    pub(crate) fn led_dwell(&self) -> Duration {
        self.led_dwell
    }

    pub(crate) fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub(crate) fn button_target(&self) -> u32 {
        self.button_target
    }

    pub(crate) fn motion_window(&self) -> Duration {
        self.motion_window
    }

    pub(crate) fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub(crate) fn op_timeout(&self) -> Duration {
        self.op_timeout
    }
}

/// Logging verbosity levels selectable from the CLI.
#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub(crate) fn as_directive(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

/// Report rendering formats.
#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
pub enum OutputFormat {
    Pretty,
    Json,
}

fn parse_duration(value: &str) -> Result<Duration, String> {
    humantime::parse_duration(value).map_err(|error| error.to_string())
}
