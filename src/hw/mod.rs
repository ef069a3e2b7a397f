mod btleplug_backend;
mod fake_backend;
mod hardware;
mod model;

pub use self::fake_backend::{
    EndpointNotifyFixture, EndpointReadFixture, FakeBackendConfig, FakeDeviceScript, FakeJournal,
    JournalEvent, ScanFixture,
};
pub use self::hardware::{
    ConnectedTransport, DeviceSession, HardwareClient, NotificationSink, SessionConfig,
};
pub(crate) use self::hardware::{HardwareBackend, hardware_client_from_backend};
pub use self::model::{FoundDevice, SessionState};
