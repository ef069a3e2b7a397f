use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use directories::ProjectDirs;
use owo_colors::OwoColorize;
use tabled::Table;
use tabled::settings::Style;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::cli::command::{OutputFormat, RunArgs};
use crate::hw::{DeviceSession, HardwareClient, SessionConfig};
use crate::ledger::DeviceLedger;
use crate::sequence::{LedgerOutcome, RunReport, SequenceConfig, SequenceRunner};

const LEDGER_FILE_NAME: &str = "tested-devices.log";

/// Runs the acceptance sequence and renders the run report.
#[instrument(skip(hardware_client, args, out), level = "info")]
pub(crate) async fn run<W>(
    hardware_client: Box<dyn HardwareClient>,
    args: &RunArgs,
    out: &mut W,
    format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    let session_config = SessionConfig::builder()
        .connect_timeout(args.connect_timeout())
        .op_timeout(args.op_timeout())
        .build();
    let session = DeviceSession::new(hardware_client, session_config);

    let ledger_path = match args.ledger() {
        Some(path) => path.clone(),
        None => default_ledger_path()?,
    };
    debug!(path = %ledger_path.display(), "using ledger file");
    let ledger = DeviceLedger::open(ledger_path);

    let sequence_config = SequenceConfig::builder()
        .name_prefix(args.name_prefix().to_string())
        .led_dwell(args.led_dwell())
        .poll_interval(args.poll_interval())
        .button_target(args.button_target())
        .motion_window(args.motion_window())
        .build();

    let cancel = CancellationToken::new();
    let interrupt_guard = spawn_interrupt_handler(cancel.clone());

    let report = SequenceRunner::new(session, ledger, sequence_config)
        .run(&cancel)
        .await?;
    interrupt_guard.abort();

    match format {
        OutputFormat::Pretty => render_pretty(out, &report)?,
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut *out, &report)
                .context("failed to serialise run report")?;
            writeln!(out)?;
        }
    }

    Ok(())
}

fn spawn_interrupt_handler(cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    })
}

fn default_ledger_path() -> Result<PathBuf> {
    let dirs = ProjectDirs::from("", "", "weartest")
        .ok_or_else(|| anyhow!("could not resolve a data directory for the device ledger"))?;
    Ok(dirs.data_dir().join(LEDGER_FILE_NAME))
}

#[derive(tabled::Tabled)]
struct StepRow {
    #[tabled(rename = "step")]
    step: String,
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "detail")]
    detail: String,
}

fn render_pretty<W>(out: &mut W, report: &RunReport) -> Result<()>
where
    W: io::Write,
{
    writeln!(
        out,
        "device: {} ({})",
        report.device_id(),
        report.local_name().unwrap_or("unnamed")
    )?;

    let rows: Vec<StepRow> = report
        .steps()
        .iter()
        .map(|outcome| StepRow {
            step: outcome.step().to_string(),
            status: outcome.status().to_string(),
            detail: outcome.detail().to_string(),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::sharp());
    writeln!(out, "{table}")?;

    let ledger_line = match report.ledger() {
        LedgerOutcome::Recorded => "ledger: identity recorded".to_string(),
        LedgerOutcome::AlreadyPresent => "ledger: identity already present".to_string(),
        LedgerOutcome::Failed(detail) => format!("ledger: submission failed ({detail})"),
    };
    writeln!(out, "{ledger_line}")?;

    let passed = report.passed_count();
    let total = report.steps().len();
    let mark = if report.all_passed() {
        "✓".green().to_string()
    } else {
        "✗".red().to_string()
    };
    writeln!(out, "{mark} {passed}/{total} steps passed")?;

    Ok(())
}
