use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};

use clap::Parser;
use pretty_assertions::assert_eq;

use weartest::{Args, FakeJournal, OutputFormat, fake_hardware_client, run_with_options};

static LEDGER_COUNTER: AtomicU32 = AtomicU32::new(0);

struct TempLedgerFile {
    path: PathBuf,
}

impl TempLedgerFile {
    fn new() -> Self {
        let unique = LEDGER_COUNTER.fetch_add(1, Ordering::SeqCst);
        let path = std::env::temp_dir().join(format!(
            "weartest-cli-{}-{unique}.log",
            std::process::id()
        ));
        let _ = fs::remove_file(&path);
        Self { path }
    }
}

impl Drop for TempLedgerFile {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

fn fixture_argv(ledger_path: &std::path::Path, extra: &[&str]) -> Vec<String> {
    let mut argv: Vec<String> = [
        "weartest",
        "--fake",
        "--fake-scan",
        "fake0|AA:BB:CC:DD:EE:FF|Lapita_001|-40",
        "--fake-read",
        "manufacturer_name=4c6170697461",
        "--fake-read",
        "model_number=4c502d31",
        "--fake-read",
        "firmware_revision=312e322e33",
        "--fake-read",
        "hardware_revision=7265762d62",
        "--fake-read",
        "battery_level=55",
        "--fake-read",
        "tx_power=fc",
        "--fake-notify",
        "button_event=01,10",
        "--fake-notify",
        "motion_data=0c00fdffe803000005 00fbff",
        "run",
        "--led-dwell",
        "10ms",
        "--poll-interval",
        "10ms",
        "--motion-window",
        "80ms",
        "--ledger",
    ]
    .iter()
    .map(ToString::to_string)
    .collect();
    argv.push(ledger_path.display().to_string());
    argv.extend(extra.iter().map(ToString::to_string));
    argv
}

async fn run_station(argv: Vec<String>, format: OutputFormat) -> String {
    let args = Args::try_parse_from(argv).expect("fixture arguments should parse");
    let (command, fake_args) = args
        .into_command_and_fake_args()
        .expect("fake settings should resolve");
    let fake_args = fake_args.expect("fake mode should be enabled");
    let client = fake_hardware_client(fake_args.into_backend_config(FakeJournal::new()))
        .await
        .expect("fake client should build");

    let mut out = Vec::new();
    run_with_options(command, &mut out, client, None, format)
        .await
        .expect("the acceptance run should complete");
    String::from_utf8(out).expect("report output should be UTF-8")
}

#[tokio::test]
async fn pretty_run_reports_full_pass_and_appends_ledger_once() {
    let ledger_file = TempLedgerFile::new();

    let rendered = run_station(fixture_argv(&ledger_file.path, &[]), OutputFormat::Pretty).await;

    assert!(rendered.contains("device: AA:BB:CC:DD:EE:FF (Lapita_001)"));
    assert!(rendered.contains("ledger: identity recorded"));
    assert!(rendered.contains("7/7 steps passed"));

    let contents = fs::read_to_string(&ledger_file.path).expect("ledger file should exist");
    assert_eq!("AA:BB:CC:DD:EE:FF\n", contents);
}

#[tokio::test]
async fn json_run_emits_structured_report() {
    let ledger_file = TempLedgerFile::new();

    let rendered = run_station(fixture_argv(&ledger_file.path, &[]), OutputFormat::Json).await;
    let report: serde_json::Value =
        serde_json::from_str(&rendered).expect("JSON output should parse");

    assert_eq!("AA:BB:CC:DD:EE:FF", report["device_id"]);
    assert_eq!("Lapita_001", report["local_name"]);
    assert_eq!(7, report["steps"].as_array().expect("steps array").len());
    assert!(
        report["steps"]
            .as_array()
            .expect("steps array")
            .iter()
            .all(|step| step["status"] == "passed")
    );
    assert_eq!("recorded", report["ledger"]["outcome"]);
}

#[tokio::test]
async fn custom_button_target_of_one_passes_with_a_single_press() {
    let ledger_file = TempLedgerFile::new();
    let mut argv = fixture_argv(&ledger_file.path, &["--button-target", "1"]);
    // Replace the two-press fixture with a single press.
    let notify_index = argv
        .iter()
        .position(|value| value == "button_event=01,10")
        .expect("fixture argv should contain the button script");
    argv[notify_index] = "button_event=01".to_string();

    let rendered = run_station(argv, OutputFormat::Pretty).await;
    assert!(rendered.contains("7/7 steps passed"));
    assert!(rendered.contains("1 presses (target 1)"));
}
