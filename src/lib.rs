mod app;
mod cli;
mod codec;
mod error;
mod hw;
mod ledger;
mod pipeline;
mod protocol;
mod sequence;
mod telemetry;

pub use app::{fake_hardware_client, real_hardware_client, run, run_with_options};
pub use cli::{Args, Command, FakeArgs, LogLevel, OutputFormat, RunArgs};
pub use codec::{ButtonPress, CodecError, MOTION_PAYLOAD_LEN, MotionSample, decode_motion, encode_motion};
pub use error::{FixtureError, InteractionError};
pub use hw::{
    ConnectedTransport, DeviceSession, EndpointNotifyFixture, EndpointReadFixture,
    FakeBackendConfig, FakeDeviceScript, FakeJournal, FoundDevice, HardwareClient, JournalEvent,
    NotificationSink, ScanFixture, SessionConfig, SessionState,
};
pub use ledger::{DeviceLedger, LedgerError};
pub use pipeline::{
    Capture, DEFAULT_PIPELINE_CAPACITY, MonitorHandle, NotificationPipeline, arm,
};
pub use protocol::{
    EndpointId, IMU_DISABLE, IMU_ENABLE, LedMode, LedSetting, clock_sync_payload,
};
pub use sequence::{
    LedgerOutcome, RunReport, SequenceConfig, SequenceRunner, StepId, StepOutcome, StepStatus,
};
