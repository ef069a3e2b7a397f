use std::time::Duration;

use async_trait::async_trait;
use bon::Builder;
use tracing::{debug, info, instrument, warn};

use super::btleplug_backend::BtleplugBackend;
use super::fake_backend::{FakeBackend, FakeBackendConfig};
use super::model::{FoundDevice, SessionState};
use crate::error::InteractionError;
use crate::protocol::EndpointId;

/// Callback invoked for every notification payload delivered on a
/// subscribed endpoint. Runs inside the backend dispatch context and must
/// not block.
pub type NotificationSink = Box<dyn FnMut(Vec<u8>) + Send>;

/// Runtime BLE backend selection.
#[derive(Debug)]
pub(crate) enum HardwareBackend {
    Real,
    Fake(FakeBackendConfig),
}

/// Builds an injected hardware client for the selected runtime backend.
pub(crate) async fn hardware_client_from_backend(
    backend: HardwareBackend,
) -> Result<Box<dyn HardwareClient>, InteractionError> {
    let client: Box<dyn HardwareClient> = match backend {
        HardwareBackend::Real => Box::new(RealHardwareClient::new().await?),
        HardwareBackend::Fake(config) => {
            info!("using fake BLE backend");
            Box::new(FakeHardwareClient::new(config))
        }
    };

    Ok(client)
}

#[async_trait]
pub trait HardwareClient: Send + Sync {
    /// Discovers and connects to the first peripheral whose advertised name
    /// starts with `name_prefix`.
    async fn connect_first_device(
        self: Box<Self>,
        name_prefix: &str,
    ) -> Result<Box<dyn ConnectedTransport>, InteractionError>;
}

/// Backend-agnostic operations available on a connected peripheral.
#[async_trait]
pub trait ConnectedTransport: Send {
    /// Details of the connected device.
    fn device(&self) -> &FoundDevice;

    /// Reads the current value of an endpoint.
    async fn read_endpoint(&mut self, endpoint: EndpointId) -> Result<Vec<u8>, InteractionError>;

    /// Writes a payload to an endpoint, with response.
    async fn write_endpoint(
        &mut self,
        endpoint: EndpointId,
        payload: &[u8],
    ) -> Result<(), InteractionError>;

    /// Subscribes to endpoint notifications, routing payloads to `sink`.
    async fn subscribe_endpoint(
        &mut self,
        endpoint: EndpointId,
        sink: NotificationSink,
    ) -> Result<(), InteractionError>;

    /// Cancels an endpoint subscription.
    async fn unsubscribe_endpoint(&mut self, endpoint: EndpointId)
    -> Result<(), InteractionError>;

    /// Releases the link and backend resources.
    async fn close(self: Box<Self>) -> Result<(), InteractionError>;
}

#[derive(Debug)]
struct RealHardwareClient {
    backend: BtleplugBackend,
}

impl RealHardwareClient {
    async fn new() -> Result<Self, InteractionError> {
        Ok(Self {
            backend: BtleplugBackend::new().await?,
        })
    }
}

#[async_trait]
impl HardwareClient for RealHardwareClient {
    async fn connect_first_device(
        self: Box<Self>,
        name_prefix: &str,
    ) -> Result<Box<dyn ConnectedTransport>, InteractionError> {
        let transport = self.backend.connect_first_matching_device(name_prefix).await?;
        Ok(Box::new(transport))
    }
}

#[derive(Debug)]
struct FakeHardwareClient {
    backend: FakeBackend,
}

impl FakeHardwareClient {
    fn new(config: FakeBackendConfig) -> Self {
        Self {
            backend: FakeBackend::new(config),
        }
    }
}

#[async_trait]
impl HardwareClient for FakeHardwareClient {
    async fn connect_first_device(
        self: Box<Self>,
        name_prefix: &str,
    ) -> Result<Box<dyn ConnectedTransport>, InteractionError> {
        let Self { backend } = *self;
        let transport = backend.connect_first_matching_device(name_prefix).await?;
        Ok(Box::new(transport))
    }
}

/// Per-session timing limits.
#[derive(Debug, Clone, Copy, Builder)]
pub struct SessionConfig {
    /// Upper bound on discovery plus link establishment.
    #[builder(default = Duration::from_secs(30))]
    pub connect_timeout: Duration,
    /// Upper bound on each individual read, write, subscribe, or
    /// unsubscribe operation.
    #[builder(default = Duration::from_secs(5))]
    pub op_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// One lifecycle of a connection to a fixture device.
///
/// Owns the state machine guarding every operation: interactions are only
/// legal while `Connected`, and teardown releases subscriptions in reverse
/// acquisition order before dropping the link. Each hardware operation is
/// bounded by the configured per-operation timeout.
///
/// A session is single-shot: it consumes its hardware client on the first
/// `connect`, so a new session is needed for every device under test.
pub struct DeviceSession {
    client: Option<Box<dyn HardwareClient>>,
    transport: Option<Box<dyn ConnectedTransport>>,
    state: SessionState,
    subscriptions: Vec<EndpointId>,
    config: SessionConfig,
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("state", &self.state)
            .field("subscriptions", &self.subscriptions)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl DeviceSession {
    /// Creates a session in the `Disconnected` state.
    #[must_use]
    pub fn new(client: Box<dyn HardwareClient>, config: SessionConfig) -> Self {
        Self {
            client: Some(client),
            transport: None,
            state: SessionState::Disconnected,
            subscriptions: Vec::new(),
            config,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Details of the connected device, while connected.
    #[must_use]
    pub fn device(&self) -> Option<&FoundDevice> {
        self.transport.as_deref().map(ConnectedTransport::device)
    }

    /// Endpoints with an active subscription, in acquisition order.
    #[must_use]
    pub fn subscriptions(&self) -> &[EndpointId] {
        &self.subscriptions
    }

    /// Discovers and connects to the first device advertising a name that
    /// starts with `name_prefix`.
    ///
    /// # Errors
    ///
    /// Returns `NotConnected` when called outside the `Disconnected` state,
    /// `SessionExhausted` when the session already went through its
    /// connect/disconnect lifecycle, `ConnectTimeout` when discovery and
    /// link establishment exceed the configured bound, or the backend's
    /// error otherwise. A failed attempt leaves the session `Disconnected`.
    #[instrument(skip(self), level = "info", fields(prefix = name_prefix))]
    pub async fn connect(&mut self, name_prefix: &str) -> Result<(), InteractionError> {
        if self.state != SessionState::Disconnected {
            return Err(InteractionError::NotConnected { state: self.state });
        }
        let Some(client) = self.client.take() else {
            return Err(InteractionError::SessionExhausted);
        };

        self.state = SessionState::Connecting;
        let connected = tokio::time::timeout(
            self.config.connect_timeout,
            client.connect_first_device(name_prefix),
        )
        .await;

        match connected {
            Ok(Ok(transport)) => {
                info!(device_id = transport.device().device_id(), "session connected");
                self.transport = Some(transport);
                self.state = SessionState::Connected;
                Ok(())
            }
            Ok(Err(error)) => {
                self.state = SessionState::Disconnected;
                Err(error)
            }
            Err(_elapsed) => {
                self.state = SessionState::Disconnected;
                Err(InteractionError::ConnectTimeout)
            }
        }
    }

    /// Reads the current value of an endpoint.
    ///
    /// # Errors
    ///
    /// Returns `NotConnected` outside the `Connected` state, `Timeout` when
    /// the operation exceeds the per-operation bound, or the backend error.
    #[instrument(skip(self), level = "debug", fields(%endpoint))]
    pub async fn read(&mut self, endpoint: EndpointId) -> Result<Vec<u8>, InteractionError> {
        let timeout = self.config.op_timeout;
        let transport = self.transport_mut()?;
        bounded(timeout, endpoint, "read", transport.read_endpoint(endpoint)).await
    }

    /// Writes a payload to an endpoint.
    ///
    /// # Errors
    ///
    /// Returns `NotConnected` outside the `Connected` state, `Timeout` when
    /// the operation exceeds the per-operation bound, or the backend error.
    #[instrument(skip(self, payload), level = "debug", fields(%endpoint, payload_len = payload.len()))]
    pub async fn write(
        &mut self,
        endpoint: EndpointId,
        payload: &[u8],
    ) -> Result<(), InteractionError> {
        let timeout = self.config.op_timeout;
        let transport = self.transport_mut()?;
        bounded(
            timeout,
            endpoint,
            "write",
            transport.write_endpoint(endpoint, payload),
        )
        .await
    }

    /// Subscribes to endpoint notifications, routing each payload to `sink`.
    ///
    /// The subscription is recorded so that `disconnect` can release it; a
    /// second subscription on the same endpoint replaces the sink without
    /// recording a duplicate.
    ///
    /// # Errors
    ///
    /// Returns `NotConnected` outside the `Connected` state, `Timeout` when
    /// the operation exceeds the per-operation bound, or the backend error.
    #[instrument(skip(self, sink), level = "debug", fields(%endpoint))]
    pub async fn subscribe(
        &mut self,
        endpoint: EndpointId,
        sink: NotificationSink,
    ) -> Result<(), InteractionError> {
        let timeout = self.config.op_timeout;
        let transport = self.transport_mut()?;
        bounded(
            timeout,
            endpoint,
            "subscribe",
            transport.subscribe_endpoint(endpoint, sink),
        )
        .await?;

        if !self.subscriptions.contains(&endpoint) {
            self.subscriptions.push(endpoint);
        }
        Ok(())
    }

    /// Cancels a notification subscription.
    ///
    /// # Errors
    ///
    /// Returns `NotConnected` outside the `Connected` state, `Timeout` when
    /// the operation exceeds the per-operation bound, or the backend error.
    #[instrument(skip(self), level = "debug", fields(%endpoint))]
    pub async fn unsubscribe(&mut self, endpoint: EndpointId) -> Result<(), InteractionError> {
        let timeout = self.config.op_timeout;
        let transport = self.transport_mut()?;
        bounded(
            timeout,
            endpoint,
            "unsubscribe",
            transport.unsubscribe_endpoint(endpoint),
        )
        .await?;

        self.subscriptions.retain(|subscribed| *subscribed != endpoint);
        Ok(())
    }

    /// Tears the session down: releases subscriptions in reverse acquisition
    /// order, then drops the link.
    ///
    /// Unsubscribe failures during teardown are logged and skipped so a
    /// wedged endpoint cannot leave the link half-open. Calling this in the
    /// `Disconnected` state is a no-op.
    ///
    /// # Errors
    ///
    /// Returns the backend error when releasing the link itself fails; the
    /// session still ends `Disconnected`.
    #[instrument(skip(self), level = "info")]
    pub async fn disconnect(&mut self) -> Result<(), InteractionError> {
        if self.state == SessionState::Disconnected {
            return Ok(());
        }
        let Some(mut transport) = self.transport.take() else {
            self.state = SessionState::Disconnected;
            return Ok(());
        };

        self.state = SessionState::Disconnecting;
        while let Some(endpoint) = self.subscriptions.pop() {
            let released = bounded(
                self.config.op_timeout,
                endpoint,
                "unsubscribe",
                transport.unsubscribe_endpoint(endpoint),
            )
            .await;
            if let Err(error) = released {
                warn!(%endpoint, %error, "failed to release subscription during teardown");
            } else {
                debug!(%endpoint, "released subscription");
            }
        }

        let closed = transport.close().await;
        self.state = SessionState::Disconnected;
        closed
    }

    fn transport_mut(&mut self) -> Result<&mut (dyn ConnectedTransport + 'static), InteractionError> {
        if self.state != SessionState::Connected {
            return Err(InteractionError::NotConnected { state: self.state });
        }
        self.transport
            .as_deref_mut()
            .ok_or(InteractionError::NotConnected { state: self.state })
    }
}

async fn bounded<T>(
    limit: Duration,
    endpoint: EndpointId,
    operation: &'static str,
    future: impl Future<Output = Result<T, InteractionError>>,
) -> Result<T, InteractionError> {
    match tokio::time::timeout(limit, future).await {
        Ok(result) => result,
        Err(_elapsed) => Err(InteractionError::Timeout {
            endpoint,
            operation,
        }),
    }
}
