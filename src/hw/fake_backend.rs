use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bon::Builder;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use super::hardware::{ConnectedTransport, NotificationSink};
use super::model::FoundDevice;
use crate::error::{FixtureError, InteractionError};
use crate::protocol::EndpointId;

/// Parsed fake scan fixture records.
#[derive(Debug, Clone, derive_more::Into)]
pub struct ScanFixture {
    devices: Vec<FoundDevice>,
}

impl FromStr for ScanFixture {
    type Err = FixtureError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let devices = parse_scan_fixture(value)?;
        Ok(Self { devices })
    }
}

/// One scripted read fixture in the form `endpoint=hexpayload`.
#[derive(Debug, Clone, derive_more::Into)]
pub struct EndpointReadFixture {
    entry: (EndpointId, Vec<u8>),
}

impl FromStr for EndpointReadFixture {
    type Err = FixtureError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (endpoint, payload) = split_assignment(value)?;
        Ok(Self {
            entry: (endpoint, parse_hex(payload)?),
        })
    }
}

/// One scripted notification fixture in the form
/// `endpoint=hexpayload,hexpayload,...`.
#[derive(Debug, Clone, derive_more::Into)]
pub struct EndpointNotifyFixture {
    entry: (EndpointId, Vec<Vec<u8>>),
}

impl FromStr for EndpointNotifyFixture {
    type Err = FixtureError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (endpoint, payloads) = split_assignment(value)?;
        let payloads = payloads
            .split(',')
            .map(parse_hex)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            entry: (endpoint, payloads),
        })
    }
}

fn split_assignment(value: &str) -> Result<(EndpointId, &str), FixtureError> {
    let Some((name, rest)) = value.split_once('=') else {
        return Err(FixtureError::InvalidAssignment);
    };
    let endpoint = name
        .trim()
        .parse::<EndpointId>()
        .map_err(|_| FixtureError::UnknownEndpoint {
            value: name.trim().to_string(),
        })?;
    Ok((endpoint, rest))
}

/// One operation observed by the fake transport.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum JournalEvent {
    Read { endpoint: EndpointId },
    Write { endpoint: EndpointId, payload: Vec<u8> },
    Subscribe { endpoint: EndpointId },
    Unsubscribe { endpoint: EndpointId },
    Closed,
}

/// Shared record of every operation the fake transport performed, in order.
///
/// Clone it before handing the config to the backend; all clones observe
/// the same log.
#[derive(Debug, Clone, Default)]
pub struct FakeJournal {
    events: Arc<Mutex<Vec<JournalEvent>>>,
}

impl FakeJournal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of recorded events in occurrence order.
    #[must_use]
    pub fn events(&self) -> Vec<JournalEvent> {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    fn record(&self, event: JournalEvent) {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(event);
    }
}

/// Scripted peripheral behaviour for the fake backend.
#[derive(Debug, Clone, Default, Builder)]
pub struct FakeDeviceScript {
    /// Payload returned for each scripted read endpoint.
    #[builder(default)]
    reads: Vec<(EndpointId, Vec<u8>)>,
    /// Endpoints whose reads fail with a backend error.
    #[builder(default)]
    failing_reads: Vec<EndpointId>,
    /// Artificial latency applied before every scripted read resolves.
    #[builder(default)]
    read_delay: Duration,
    /// Endpoints absent from the fake device entirely.
    #[builder(default)]
    missing_endpoints: Vec<EndpointId>,
    /// Notification payload sequences emitted after subscribing.
    #[builder(default)]
    notifications: Vec<(EndpointId, Vec<Vec<u8>>)>,
}

/// Settings for constructing a fake hardware backend.
#[derive(Debug, Builder)]
pub struct FakeBackendConfig {
    scan_fixture: ScanFixture,
    #[builder(default)]
    script: FakeDeviceScript,
    #[builder(default)]
    journal: FakeJournal,
    #[builder(default)]
    discovery_delay: Duration,
    /// Pause between scripted notification payloads on one endpoint.
    #[builder(default = Duration::from_millis(10))]
    notification_interval: Duration,
}

/// Fake backend used in tests and non-hardware environments.
#[derive(Debug)]
pub(crate) struct FakeBackend {
    devices: Vec<FoundDevice>,
    script: FakeDeviceScript,
    journal: FakeJournal,
    discovery_delay: Duration,
    notification_interval: Duration,
}

impl FakeBackend {
    /// Creates a fake backend from explicit settings.
    pub(crate) fn new(config: FakeBackendConfig) -> Self {
        Self {
            devices: config.scan_fixture.into(),
            script: config.script,
            journal: config.journal,
            discovery_delay: config.discovery_delay,
            notification_interval: config.notification_interval,
        }
    }

    /// Connects to the first matching fake peripheral.
    pub(crate) async fn connect_first_matching_device(
        self,
        name_prefix: &str,
    ) -> Result<FakeTransport, InteractionError> {
        if !self.discovery_delay.is_zero() {
            sleep(self.discovery_delay).await;
        }

        let device = self
            .devices
            .into_iter()
            .find(|device| device.local_name_starts_with(name_prefix))
            .ok_or_else(|| InteractionError::NoMatchingFixtureDevice {
                prefix: name_prefix.to_string(),
            })?;

        Ok(FakeTransport {
            device,
            reads: self.script.reads.into_iter().collect(),
            failing_reads: self.script.failing_reads.into_iter().collect(),
            read_delay: self.script.read_delay,
            missing_endpoints: self.script.missing_endpoints.into_iter().collect(),
            notifications: self.script.notifications.into_iter().collect(),
            notification_interval: self.notification_interval,
            journal: self.journal,
            feeders: HashMap::new(),
        })
    }
}

/// Fake transport serving scripted responses and notification streams.
#[derive(Debug)]
pub(crate) struct FakeTransport {
    device: FoundDevice,
    reads: HashMap<EndpointId, Vec<u8>>,
    failing_reads: HashSet<EndpointId>,
    read_delay: Duration,
    missing_endpoints: HashSet<EndpointId>,
    notifications: HashMap<EndpointId, Vec<Vec<u8>>>,
    notification_interval: Duration,
    journal: FakeJournal,
    feeders: HashMap<EndpointId, JoinHandle<()>>,
}

impl FakeTransport {
    fn ensure_present(&self, endpoint: EndpointId) -> Result<(), InteractionError> {
        if self.missing_endpoints.contains(&endpoint) {
            return Err(InteractionError::MissingEndpoint { endpoint });
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ConnectedTransport for FakeTransport {
    fn device(&self) -> &FoundDevice {
        &self.device
    }

    async fn read_endpoint(&mut self, endpoint: EndpointId) -> Result<Vec<u8>, InteractionError> {
        self.ensure_present(endpoint)?;
        self.journal.record(JournalEvent::Read { endpoint });

        if !self.read_delay.is_zero() {
            sleep(self.read_delay).await;
        }
        if self.failing_reads.contains(&endpoint) {
            return Err(InteractionError::Ble(btleplug::Error::RuntimeError(
                format!("scripted read failure on {endpoint}"),
            )));
        }

        self.reads
            .get(&endpoint)
            .cloned()
            .ok_or(InteractionError::MissingEndpoint { endpoint })
    }

    async fn write_endpoint(
        &mut self,
        endpoint: EndpointId,
        payload: &[u8],
    ) -> Result<(), InteractionError> {
        self.ensure_present(endpoint)?;
        self.journal.record(JournalEvent::Write {
            endpoint,
            payload: payload.to_vec(),
        });
        Ok(())
    }

    async fn subscribe_endpoint(
        &mut self,
        endpoint: EndpointId,
        mut sink: NotificationSink,
    ) -> Result<(), InteractionError> {
        self.ensure_present(endpoint)?;
        self.journal.record(JournalEvent::Subscribe { endpoint });

        let payloads = self.notifications.get(&endpoint).cloned().unwrap_or_default();
        let interval = self.notification_interval;
        let feeder = tokio::spawn(async move {
            for payload in payloads {
                sleep(interval).await;
                sink(payload);
            }
        });

        if let Some(previous) = self.feeders.insert(endpoint, feeder) {
            previous.abort();
        }
        Ok(())
    }

    async fn unsubscribe_endpoint(
        &mut self,
        endpoint: EndpointId,
    ) -> Result<(), InteractionError> {
        self.ensure_present(endpoint)?;
        self.journal.record(JournalEvent::Unsubscribe { endpoint });
        if let Some(feeder) = self.feeders.remove(&endpoint) {
            feeder.abort();
        }
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<(), InteractionError> {
        self.journal.record(JournalEvent::Closed);
        for feeder in self.feeders.values() {
            feeder.abort();
        }
        Ok(())
    }
}

fn parse_scan_fixture(raw_fixture: &str) -> Result<Vec<FoundDevice>, FixtureError> {
    if raw_fixture.trim().is_empty() {
        return Err(FixtureError::EmptyFixture);
    }

    raw_fixture
        .split(';')
        .map(parse_scan_record)
        .collect::<Result<Vec<_>, _>>()
}

fn parse_scan_record(raw_record: &str) -> Result<FoundDevice, FixtureError> {
    let fields: Vec<&str> = raw_record.split('|').map(str::trim).collect();
    if fields.len() != 4 {
        return Err(FixtureError::InvalidRecordFieldCount);
    }
    if fields[0].is_empty() || fields[1].is_empty() || fields[2].is_empty() || fields[3].is_empty()
    {
        return Err(FixtureError::EmptyRecordField);
    }

    let local_name = if fields[2] == "-" {
        None
    } else {
        Some(fields[2].to_string())
    };
    let rssi = if fields[3] == "-" {
        None
    } else {
        Some(fields[3].parse::<i16>()?)
    };

    Ok(FoundDevice::new(
        fields[0].to_string(),
        fields[1].to_string(),
        local_name,
        rssi,
    ))
}

fn parse_hex(raw_value: &str) -> Result<Vec<u8>, FixtureError> {
    let cleaned: String = raw_value.chars().filter(|c| !c.is_whitespace()).collect();
    if !cleaned.len().is_multiple_of(2) {
        return Err(FixtureError::InvalidHexLength);
    }

    hex::decode(&cleaned).map_err(|_| FixtureError::InvalidHexByte { value: cleaned })
}
