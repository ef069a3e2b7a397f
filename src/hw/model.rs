use strum_macros::Display;

/// A discovered BLE peripheral that matched a scan predicate.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct FoundDevice {
    adapter_name: String,
    device_id: String,
    local_name: Option<String>,
    rssi: Option<i16>,
}

impl FoundDevice {
    /// Creates a new discovered-device record.
    pub(crate) fn new(
        adapter_name: String,
        device_id: String,
        local_name: Option<String>,
        rssi: Option<i16>,
    ) -> Self {
        Self {
            adapter_name,
            device_id,
            local_name,
            rssi,
        }
    }

    /// Returns the adapter name used to discover this device.
    #[must_use]
    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    /// Returns the backend-specific device identifier.
    ///
    /// On platforms exposing the peripheral address this is the MAC; it is
    /// the identity recorded in the device ledger.
    #[must_use]
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Returns the advertised local name, if present.
    #[must_use]
    pub fn local_name(&self) -> Option<&str> {
        self.local_name.as_deref()
    }

    /// Returns the latest observed RSSI value, if present.
    #[must_use]
    pub fn rssi(&self) -> Option<i16> {
        self.rssi
    }

    /// Returns whether the local name starts with a prefix.
    pub(crate) fn local_name_starts_with(&self, prefix: &str) -> bool {
        self.local_name
            .as_deref()
            .is_some_and(|name| name.starts_with(prefix))
    }
}

/// Lifecycle state of a peripheral session.
///
/// Transitions run one way: `Disconnected` → `Connecting` → `Connected` →
/// `Disconnecting` → `Disconnected`. A failed connect attempt returns to
/// `Disconnected`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Display)]
pub enum SessionState {
    #[strum(to_string = "disconnected")]
    Disconnected,
    #[strum(to_string = "connecting")]
    Connecting,
    #[strum(to_string = "connected")]
    Connected,
    #[strum(to_string = "disconnecting")]
    Disconnecting,
}
