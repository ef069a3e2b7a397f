use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_stream::StreamExt;

use tracing::{debug, info, instrument, trace};

use super::hardware::{ConnectedTransport, NotificationSink};
use super::model::FoundDevice;
use crate::error::InteractionError;
use crate::protocol::{self, EndpointId};

const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(250);

type SinkMap = Arc<Mutex<HashMap<EndpointId, NotificationSink>>>;

/// Hardware backend backed by `btleplug`.
#[derive(Debug)]
pub(crate) struct BtleplugBackend {
    manager: Manager,
}

impl BtleplugBackend {
    /// Creates the real BLE backend.
    pub(crate) async fn new() -> Result<Self, InteractionError> {
        let manager = Manager::new().await?;
        Ok(Self { manager })
    }

    #[instrument(skip(self), level = "trace")]
    async fn adapters(&self) -> Result<Vec<AdapterHandle>, InteractionError> {
        let adapters = self.manager.adapters().await?;
        if adapters.is_empty() {
            return Err(InteractionError::NoAdapters);
        }

        let mut handles = Vec::with_capacity(adapters.len());
        for adapter in adapters {
            let name = adapter.adapter_info().await?;
            handles.push(AdapterHandle { adapter, name });
        }
        Ok(handles)
    }

    /// Scans until the first matching peripheral appears, then connects.
    ///
    /// The scan itself has no deadline; the session layer bounds the whole
    /// connect attempt.
    #[instrument(skip(self), level = "debug", fields(prefix = name_prefix))]
    pub(crate) async fn connect_first_matching_device(
        self,
        name_prefix: &str,
    ) -> Result<RealTransport, InteractionError> {
        let adapters = self.adapters().await?;
        info!(
            adapter_count = adapters.len(),
            "starting BLE scan for fixture device"
        );

        for adapter in &adapters {
            adapter.adapter.start_scan(ScanFilter::default()).await?;
        }
        let mut scan_guard = ScanGuard::new(&adapters);

        let (peripheral, device) = loop {
            let mut found = None;
            'adapters: for adapter in &adapters {
                let peripherals = adapter.adapter.peripherals().await?;
                for peripheral in peripherals {
                    let Some(properties) = peripheral.properties().await? else {
                        continue;
                    };
                    let local_name = properties.local_name;
                    if !matches_name_prefix(local_name.as_deref(), name_prefix) {
                        continue;
                    }

                    let device = FoundDevice::new(
                        adapter.name.clone(),
                        peripheral.id().to_string(),
                        local_name,
                        properties.rssi,
                    );
                    found = Some((peripheral, device));
                    break 'adapters;
                }
            }

            if let Some((peripheral, device)) = found {
                scan_guard.stop().await;

                if !peripheral.is_connected().await? {
                    peripheral.connect().await?;
                }
                peripheral.discover_services().await?;
                info!(device_id = device.device_id(), "connected to fixture device");
                break (peripheral, device);
            }

            sleep(SCAN_POLL_INTERVAL).await;
        };

        let characteristics_by_endpoint = collect_endpoint_characteristics(&peripheral);
        let sinks: SinkMap = Arc::new(Mutex::new(HashMap::new()));
        let dispatch = spawn_notification_dispatch(&peripheral, Arc::clone(&sinks)).await?;

        Ok(RealTransport {
            device,
            peripheral,
            characteristics_by_endpoint,
            sinks,
            dispatch,
        })
    }
}

/// Stops adapter scans even when the connect future is dropped mid-scan,
/// which happens when the session-level connect timeout fires.
struct ScanGuard {
    adapters: Vec<Adapter>,
}

impl ScanGuard {
    fn new(handles: &[AdapterHandle]) -> Self {
        Self {
            adapters: handles.iter().map(|handle| handle.adapter.clone()).collect(),
        }
    }

    async fn stop(&mut self) {
        for adapter in self.adapters.drain(..) {
            if let Err(error) = adapter.stop_scan().await {
                debug!(?error, "failed to stop adapter scan cleanly");
            }
        }
    }
}

impl Drop for ScanGuard {
    fn drop(&mut self) {
        // Drop cannot await, so leftover scans stop from a task.
        for adapter in self.adapters.drain(..) {
            tokio::spawn(async move {
                let _ = adapter.stop_scan().await;
            });
        }
    }
}

/// Routes every incoming notification to the sink registered for its
/// endpoint. Payloads for endpoints without a registered sink are dropped.
async fn spawn_notification_dispatch(
    peripheral: &Peripheral,
    sinks: SinkMap,
) -> Result<JoinHandle<()>, InteractionError> {
    let mut notifications = peripheral.notifications().await?;
    Ok(tokio::spawn(async move {
        while let Some(notification) = notifications.next().await {
            let uuid = notification.uuid.to_string();
            let Some(endpoint) = protocol::endpoint_for_characteristic_uuid(&uuid) else {
                trace!(%uuid, "dropping notification from unmapped characteristic");
                continue;
            };

            let mut sinks = sinks
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if let Some(sink) = sinks.get_mut(&endpoint) {
                sink(notification.value);
            }
        }
        debug!("notification stream closed");
    }))
}

fn matches_name_prefix(local_name: Option<&str>, name_prefix: &str) -> bool {
    if name_prefix.is_empty() {
        return true;
    }

    local_name.is_some_and(|value| value.starts_with(name_prefix))
}

fn collect_endpoint_characteristics(
    peripheral: &Peripheral,
) -> HashMap<EndpointId, Characteristic> {
    let mut by_endpoint = HashMap::new();
    for service in peripheral.services() {
        for characteristic in &service.characteristics {
            let uuid = characteristic.uuid.to_string();
            if let Some(endpoint) = protocol::endpoint_for_characteristic_uuid(&uuid) {
                by_endpoint
                    .entry(endpoint)
                    .or_insert_with(|| characteristic.clone());
            }
        }
    }
    by_endpoint
}

/// Active transport bound to a real peripheral.
pub(crate) struct RealTransport {
    device: FoundDevice,
    peripheral: Peripheral,
    characteristics_by_endpoint: HashMap<EndpointId, Characteristic>,
    sinks: SinkMap,
    dispatch: JoinHandle<()>,
}

impl RealTransport {
    fn characteristic_for(
        &self,
        endpoint: EndpointId,
    ) -> Result<&Characteristic, InteractionError> {
        self.characteristics_by_endpoint
            .get(&endpoint)
            .ok_or(InteractionError::MissingEndpoint { endpoint })
    }
}

#[async_trait]
impl ConnectedTransport for RealTransport {
    fn device(&self) -> &FoundDevice {
        &self.device
    }

    #[instrument(skip(self), level = "trace", fields(%endpoint))]
    async fn read_endpoint(&mut self, endpoint: EndpointId) -> Result<Vec<u8>, InteractionError> {
        let characteristic = self.characteristic_for(endpoint)?;
        let payload = self.peripheral.read(characteristic).await?;
        Ok(payload)
    }

    #[instrument(skip(self, payload), level = "trace", fields(%endpoint, payload_len = payload.len()))]
    async fn write_endpoint(
        &mut self,
        endpoint: EndpointId,
        payload: &[u8],
    ) -> Result<(), InteractionError> {
        let characteristic = self.characteristic_for(endpoint)?;
        self.peripheral
            .write(characteristic, payload, WriteType::WithResponse)
            .await?;
        Ok(())
    }

    #[instrument(skip(self, sink), level = "trace", fields(%endpoint))]
    async fn subscribe_endpoint(
        &mut self,
        endpoint: EndpointId,
        sink: NotificationSink,
    ) -> Result<(), InteractionError> {
        let characteristic = self.characteristic_for(endpoint)?;
        self.peripheral.subscribe(characteristic).await?;
        self.sinks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(endpoint, sink);
        Ok(())
    }

    #[instrument(skip(self), level = "trace", fields(%endpoint))]
    async fn unsubscribe_endpoint(
        &mut self,
        endpoint: EndpointId,
    ) -> Result<(), InteractionError> {
        let characteristic = self.characteristic_for(endpoint)?;
        self.peripheral.unsubscribe(characteristic).await?;
        self.sinks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(&endpoint);
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn close(self: Box<Self>) -> Result<(), InteractionError> {
        self.dispatch.abort();
        if self.peripheral.is_connected().await? {
            self.peripheral.disconnect().await?;
        }
        Ok(())
    }
}

impl Drop for RealTransport {
    fn drop(&mut self) {
        self.dispatch.abort();
    }
}

#[derive(Debug)]
struct AdapterHandle {
    adapter: Adapter,
    name: String,
}
