use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

use weartest::{
    DeviceLedger, DeviceSession, EndpointId, FakeBackendConfig, FakeDeviceScript, FakeJournal,
    InteractionError, JournalEvent, LedgerOutcome, MotionSample, ScanFixture, SequenceConfig,
    SequenceRunner, SessionConfig, SessionState, StepId, StepStatus, encode_motion,
    fake_hardware_client,
};

static LEDGER_COUNTER: AtomicU32 = AtomicU32::new(0);

struct TempLedgerFile {
    path: PathBuf,
}

impl TempLedgerFile {
    fn new() -> Self {
        let unique = LEDGER_COUNTER.fetch_add(1, Ordering::SeqCst);
        let path = std::env::temp_dir().join(format!(
            "weartest-sequence-{}-{unique}.log",
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

fn scan_fixture() -> ScanFixture {
    "fake0|AA:BB:CC:DD:EE:FF|Lapita_001|-40"
        .parse()
        .expect("scan fixture should parse")
}

fn stubbed_reads() -> Vec<(EndpointId, Vec<u8>)> {
    vec![
        (EndpointId::ManufacturerName, b"Lapita Labs".to_vec()),
        (EndpointId::ModelNumber, b"LP-1".to_vec()),
        (EndpointId::FirmwareRevision, b"1.2.3".to_vec()),
        (EndpointId::HardwareRevision, b"rev-b".to_vec()),
        (EndpointId::BatteryLevel, vec![0x55]),
        (EndpointId::TxPower, vec![0xFC]),
    ]
}

fn motion_payloads() -> Vec<Vec<u8>> {
    [
        MotionSample {
            accel_x: 12,
            accel_y: -3,
            accel_z: 1000,
            gyro_x: 0,
            gyro_y: 5,
            gyro_z: -5,
        },
        MotionSample::default(),
    ]
    .iter()
    .map(|sample| encode_motion(sample).to_vec())
    .collect()
}

fn full_script() -> FakeDeviceScript {
    FakeDeviceScript::builder()
        .reads(stubbed_reads())
        .notifications(vec![
            (EndpointId::ButtonEvent, vec![vec![0x01], vec![0x10]]),
            (EndpointId::MotionData, motion_payloads()),
        ])
        .build()
}

fn fast_config() -> SequenceConfig {
    SequenceConfig::builder()
        .led_dwell(Duration::from_millis(10))
        .poll_interval(Duration::from_millis(10))
        .motion_window(Duration::from_millis(80))
        .build()
}

async fn session_for(config: FakeBackendConfig) -> DeviceSession {
    let client = fake_hardware_client(config)
        .await
        .expect("fake client should build");
    DeviceSession::new(client, SessionConfig::default())
}

fn outcome_status(report: &weartest::RunReport, step: StepId) -> StepStatus {
    report
        .steps()
        .iter()
        .find(|outcome| outcome.step() == step)
        .unwrap_or_else(|| panic!("report should contain step {step}"))
        .status()
}

#[tokio::test]
async fn full_run_passes_all_steps_and_records_identity_once() {
    let ledger_file = TempLedgerFile::new();
    let config = FakeBackendConfig::builder()
        .scan_fixture(scan_fixture())
        .script(full_script())
        .build();
    let runner = SequenceRunner::new(
        session_for(config).await,
        DeviceLedger::open(&ledger_file.path),
        fast_config(),
    );

    let report = runner
        .run(&CancellationToken::new())
        .await
        .expect("run should complete");

    assert_eq!("AA:BB:CC:DD:EE:FF", report.device_id());
    assert_eq!(7, report.steps().len());
    assert_eq!(7, report.passed_count());
    assert!(report.all_passed());
    assert_eq!(&LedgerOutcome::Recorded, report.ledger());

    let contents = fs::read_to_string(&ledger_file.path).expect("ledger file should exist");
    assert_eq!("AA:BB:CC:DD:EE:FF\n", contents);
}

#[tokio::test]
async fn battery_read_failure_does_not_stop_later_steps() {
    let ledger_file = TempLedgerFile::new();
    let script = FakeDeviceScript::builder()
        .reads(stubbed_reads())
        .failing_reads(vec![EndpointId::BatteryLevel])
        .notifications(vec![
            (EndpointId::ButtonEvent, vec![vec![0x01], vec![0x10]]),
            (EndpointId::MotionData, motion_payloads()),
        ])
        .build();
    let config = FakeBackendConfig::builder()
        .scan_fixture(scan_fixture())
        .script(script)
        .build();
    let runner = SequenceRunner::new(
        session_for(config).await,
        DeviceLedger::open(&ledger_file.path),
        fast_config(),
    );

    let report = runner
        .run(&CancellationToken::new())
        .await
        .expect("run should complete despite the failing read");

    assert_eq!(StepStatus::Failed, outcome_status(&report, StepId::BatteryLevel));
    assert_eq!(StepStatus::Passed, outcome_status(&report, StepId::TxPower));
    assert_eq!(StepStatus::Passed, outcome_status(&report, StepId::LedExercise));
    assert_eq!(StepStatus::Passed, outcome_status(&report, StepId::ButtonGate));
    assert_eq!(StepStatus::Passed, outcome_status(&report, StepId::MotionMonitor));
    assert_eq!(&LedgerOutcome::Recorded, report.ledger());
}

#[tokio::test]
async fn button_gate_exits_on_reaching_target_without_a_window() {
    let ledger_file = TempLedgerFile::new();
    let config = FakeBackendConfig::builder()
        .scan_fixture(scan_fixture())
        .script(full_script())
        .build();
    let runner = SequenceRunner::new(
        session_for(config).await,
        DeviceLedger::open(&ledger_file.path),
        fast_config(),
    );

    let report = runner
        .run(&CancellationToken::new())
        .await
        .expect("run should complete");

    let button = report
        .steps()
        .iter()
        .find(|outcome| outcome.step() == StepId::ButtonGate)
        .expect("report should contain the button gate step");
    assert_eq!(StepStatus::Passed, button.status());
    assert!(button.detail().contains("2 presses"));
}

#[tokio::test]
async fn missing_imu_enable_endpoint_does_not_fail_motion_step() {
    let ledger_file = TempLedgerFile::new();
    let script = FakeDeviceScript::builder()
        .reads(stubbed_reads())
        .missing_endpoints(vec![EndpointId::ImuEnable])
        .notifications(vec![
            (EndpointId::ButtonEvent, vec![vec![0x01], vec![0x10]]),
            (EndpointId::MotionData, motion_payloads()),
        ])
        .build();
    let config = FakeBackendConfig::builder()
        .scan_fixture(scan_fixture())
        .script(script)
        .build();
    let runner = SequenceRunner::new(
        session_for(config).await,
        DeviceLedger::open(&ledger_file.path),
        fast_config(),
    );

    let report = runner
        .run(&CancellationToken::new())
        .await
        .expect("run should complete");

    assert_eq!(
        StepStatus::Passed,
        outcome_status(&report, StepId::MotionMonitor)
    );
}

#[tokio::test]
async fn repeat_run_reports_identity_already_present() {
    let ledger_file = TempLedgerFile::new();
    let ledger = DeviceLedger::open(&ledger_file.path);
    ledger
        .record_if_new("AA:BB:CC:DD:EE:FF")
        .expect("seeding the ledger should succeed");

    let config = FakeBackendConfig::builder()
        .scan_fixture(scan_fixture())
        .script(full_script())
        .build();
    let runner = SequenceRunner::new(session_for(config).await, ledger, fast_config());

    let report = runner
        .run(&CancellationToken::new())
        .await
        .expect("run should complete");

    assert_eq!(&LedgerOutcome::AlreadyPresent, report.ledger());
    let contents = fs::read_to_string(&ledger_file.path).expect("ledger file should exist");
    assert_eq!(1, contents.lines().count());
}

#[tokio::test]
async fn cancelled_token_skips_every_step_but_still_submits_ledger() {
    let ledger_file = TempLedgerFile::new();
    let config = FakeBackendConfig::builder()
        .scan_fixture(scan_fixture())
        .script(full_script())
        .build();
    let runner = SequenceRunner::new(
        session_for(config).await,
        DeviceLedger::open(&ledger_file.path),
        fast_config(),
    );

    let cancel = CancellationToken::new();
    cancel.cancel();
    let report = runner.run(&cancel).await.expect("run should complete");

    assert_eq!(7, report.steps().len());
    assert!(
        report
            .steps()
            .iter()
            .all(|outcome| outcome.status() == StepStatus::Skipped)
    );
    assert_eq!(&LedgerOutcome::Recorded, report.ledger());
}

#[tokio::test]
async fn operations_outside_connected_state_report_not_connected() {
    let config = FakeBackendConfig::builder()
        .scan_fixture(scan_fixture())
        .build();
    let mut session = session_for(config).await;

    assert_eq!(SessionState::Disconnected, session.state());
    let result = session.read(EndpointId::BatteryLevel).await;
    assert_matches!(
        result,
        Err(InteractionError::NotConnected {
            state: SessionState::Disconnected
        })
    );
}

#[tokio::test]
async fn disconnect_releases_subscriptions_in_reverse_order() {
    let journal = FakeJournal::new();
    let config = FakeBackendConfig::builder()
        .scan_fixture(scan_fixture())
        .script(full_script())
        .journal(journal.clone())
        .build();
    let mut session = session_for(config).await;

    session
        .connect("Lapita_")
        .await
        .expect("fake connect should succeed");
    session
        .subscribe(EndpointId::ButtonEvent, Box::new(|_payload| {}))
        .await
        .expect("button subscription should succeed");
    session
        .subscribe(EndpointId::MotionData, Box::new(|_payload| {}))
        .await
        .expect("motion subscription should succeed");

    session.disconnect().await.expect("teardown should succeed");
    assert_eq!(SessionState::Disconnected, session.state());

    let teardown: Vec<JournalEvent> = journal
        .events()
        .into_iter()
        .filter(|event| {
            matches!(
                event,
                JournalEvent::Unsubscribe { .. } | JournalEvent::Closed
            )
        })
        .collect();
    assert_eq!(
        vec![
            JournalEvent::Unsubscribe {
                endpoint: EndpointId::MotionData
            },
            JournalEvent::Unsubscribe {
                endpoint: EndpointId::ButtonEvent
            },
            JournalEvent::Closed,
        ],
        teardown
    );
}

#[tokio::test]
async fn slow_discovery_times_out_and_leaves_the_session_disconnected() {
    let config = FakeBackendConfig::builder()
        .scan_fixture(scan_fixture())
        .discovery_delay(Duration::from_millis(200))
        .build();
    let client = fake_hardware_client(config)
        .await
        .expect("fake client should build");
    let session_config = SessionConfig::builder()
        .connect_timeout(Duration::from_millis(20))
        .build();
    let mut session = DeviceSession::new(client, session_config);

    let result = session.connect("Lapita_").await;

    assert_matches!(result, Err(InteractionError::ConnectTimeout));
    assert_eq!(SessionState::Disconnected, session.state());
}

#[tokio::test]
async fn slow_read_times_out_without_wedging_the_session() {
    let script = FakeDeviceScript::builder()
        .reads(stubbed_reads())
        .read_delay(Duration::from_millis(200))
        .build();
    let config = FakeBackendConfig::builder()
        .scan_fixture(scan_fixture())
        .script(script)
        .build();
    let client = fake_hardware_client(config)
        .await
        .expect("fake client should build");
    let session_config = SessionConfig::builder()
        .op_timeout(Duration::from_millis(20))
        .build();
    let mut session = DeviceSession::new(client, session_config);
    session
        .connect("Lapita_")
        .await
        .expect("fake connect should succeed");

    let result = session.read(EndpointId::BatteryLevel).await;
    assert_matches!(
        result,
        Err(InteractionError::Timeout {
            endpoint: EndpointId::BatteryLevel,
            operation: "read"
        })
    );

    // The timed-out operation is an ordinary failure; the link stays usable.
    assert_eq!(SessionState::Connected, session.state());
    session
        .write(EndpointId::LedMode, &[0x01])
        .await
        .expect("writes should still succeed after a read timeout");
    session.disconnect().await.expect("teardown should succeed");
}

#[tokio::test]
async fn malformed_motion_payload_is_skipped_without_ending_the_stream() {
    let ledger_file = TempLedgerFile::new();
    let mut motion = vec![vec![0x01]];
    motion.extend(motion_payloads());
    let script = FakeDeviceScript::builder()
        .reads(stubbed_reads())
        .notifications(vec![
            (EndpointId::ButtonEvent, vec![vec![0x01], vec![0x10]]),
            (EndpointId::MotionData, motion),
        ])
        .build();
    let config = FakeBackendConfig::builder()
        .scan_fixture(scan_fixture())
        .script(script)
        .build();
    let runner = SequenceRunner::new(
        session_for(config).await,
        DeviceLedger::open(&ledger_file.path),
        fast_config(),
    );

    let report = runner
        .run(&CancellationToken::new())
        .await
        .expect("run should complete");

    let motion_outcome = report
        .steps()
        .iter()
        .find(|outcome| outcome.step() == StepId::MotionMonitor)
        .expect("report should contain the motion step");
    assert_eq!(StepStatus::Passed, motion_outcome.status());
    assert!(motion_outcome.detail().contains("2 samples"));
}

#[tokio::test]
async fn session_cannot_connect_a_second_time() {
    let config = FakeBackendConfig::builder()
        .scan_fixture(scan_fixture())
        .build();
    let mut session = session_for(config).await;

    session
        .connect("Lapita_")
        .await
        .expect("fake connect should succeed");
    session
        .disconnect()
        .await
        .expect("first disconnect should succeed");

    let result = session.connect("Lapita_").await;
    assert_matches!(result, Err(InteractionError::SessionExhausted));
}

#[tokio::test]
async fn disconnect_is_idempotent() {
    let config = FakeBackendConfig::builder()
        .scan_fixture(scan_fixture())
        .build();
    let mut session = session_for(config).await;

    session
        .connect("Lapita_")
        .await
        .expect("fake connect should succeed");
    session
        .disconnect()
        .await
        .expect("first disconnect should succeed");
    session
        .disconnect()
        .await
        .expect("repeat disconnect should be a no-op");
    assert_eq!(SessionState::Disconnected, session.state());
}
