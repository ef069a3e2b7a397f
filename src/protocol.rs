use std::collections::HashMap;
use std::sync::LazyLock;

use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString};
use time::OffsetDateTime;

/// Characteristic endpoints exercised by the acceptance sequence.
///
/// Endpoints are static: the station never discovers arbitrary GATT layout,
/// it addresses these UUID pairs directly.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, EnumIter, Display, EnumString)]
pub enum EndpointId {
    /// Battery level percentage (byte 0).
    #[strum(to_string = "battery_level")]
    BatteryLevel,
    /// Manufacturer name string.
    #[strum(to_string = "manufacturer_name")]
    ManufacturerName,
    /// Model number string.
    #[strum(to_string = "model_number")]
    ModelNumber,
    /// Firmware revision string.
    #[strum(to_string = "firmware_revision")]
    FirmwareRevision,
    /// Hardware revision string.
    #[strum(to_string = "hardware_revision")]
    HardwareRevision,
    /// TX power level in dBm (byte 0, signed).
    #[strum(to_string = "tx_power")]
    TxPower,
    /// Current-time characteristic; the station only writes it.
    #[strum(to_string = "current_time")]
    CurrentTime,
    /// LED mode switch (on/off).
    #[strum(to_string = "led_mode")]
    LedMode,
    /// LED colour/blink setting command.
    #[strum(to_string = "led_setting")]
    LedSetting,
    /// Button-press notification source.
    #[strum(to_string = "button_event")]
    ButtonEvent,
    /// Motion telemetry notification source.
    #[strum(to_string = "motion_data")]
    MotionData,
    /// IMU enable/disable switch; absent on older firmware.
    #[strum(to_string = "imu_enable")]
    ImuEnable,
}

/// Descriptive metadata for one endpoint: its service/characteristic UUID pair.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) struct EndpointMetadata {
    name: &'static str,
    service_uuid: &'static str,
    characteristic_uuid: &'static str,
}

impl EndpointMetadata {
    /// Human-readable endpoint name.
    pub(crate) fn name(self) -> &'static str {
        self.name
    }

    /// Owning service UUID.
    pub(crate) fn service_uuid(self) -> &'static str {
        self.service_uuid
    }

    /// Characteristic UUID.
    pub(crate) fn characteristic_uuid(self) -> &'static str {
        self.characteristic_uuid
    }
}

const DEVICE_INFORMATION_SERVICE: &str = "0000180a-0000-1000-8000-00805f9b34fb";
const BATTERY_SERVICE: &str = "0000180f-0000-1000-8000-00805f9b34fb";
const TX_POWER_SERVICE: &str = "00001804-0000-1000-8000-00805f9b34fb";
const CURRENT_TIME_SERVICE: &str = "00001805-0000-1000-8000-00805f9b34fb";
const VENDOR_SERVICE: &str = "0000ffc0-0000-1000-8000-00805f9b34fb";

/// Endpoint metadata keyed by typed endpoint IDs.
pub(crate) static ENDPOINTS_BY_ID: LazyLock<HashMap<EndpointId, EndpointMetadata>> =
    LazyLock::new(|| {
        EndpointId::iter()
            .map(|endpoint| (endpoint, metadata_for(endpoint)))
            .collect()
    });

/// Returns metadata for one endpoint.
pub(crate) fn endpoint_metadata(endpoint: EndpointId) -> EndpointMetadata {
    *ENDPOINTS_BY_ID
        .get(&endpoint)
        .unwrap_or(&metadata_for(endpoint))
}

/// Resolves a characteristic UUID back to its typed endpoint, if known.
pub(crate) fn endpoint_for_characteristic_uuid(uuid: &str) -> Option<EndpointId> {
    EndpointId::iter()
        .find(|endpoint| metadata_for(*endpoint).characteristic_uuid.eq_ignore_ascii_case(uuid))
}

fn metadata_for(endpoint: EndpointId) -> EndpointMetadata {
    match endpoint {
        EndpointId::BatteryLevel => EndpointMetadata {
            name: "battery level",
            service_uuid: BATTERY_SERVICE,
            characteristic_uuid: "00002a19-0000-1000-8000-00805f9b34fb",
        },
        EndpointId::ManufacturerName => EndpointMetadata {
            name: "manufacturer name",
            service_uuid: DEVICE_INFORMATION_SERVICE,
            characteristic_uuid: "00002a29-0000-1000-8000-00805f9b34fb",
        },
        EndpointId::ModelNumber => EndpointMetadata {
            name: "model number",
            service_uuid: DEVICE_INFORMATION_SERVICE,
            characteristic_uuid: "00002a24-0000-1000-8000-00805f9b34fb",
        },
        EndpointId::FirmwareRevision => EndpointMetadata {
            name: "firmware revision",
            service_uuid: DEVICE_INFORMATION_SERVICE,
            characteristic_uuid: "00002a26-0000-1000-8000-00805f9b34fb",
        },
        EndpointId::HardwareRevision => EndpointMetadata {
            name: "hardware revision",
            service_uuid: DEVICE_INFORMATION_SERVICE,
            characteristic_uuid: "00002a27-0000-1000-8000-00805f9b34fb",
        },
        EndpointId::TxPower => EndpointMetadata {
            name: "tx power",
            service_uuid: TX_POWER_SERVICE,
            characteristic_uuid: "00002a07-0000-1000-8000-00805f9b34fb",
        },
        EndpointId::CurrentTime => EndpointMetadata {
            name: "current time",
            service_uuid: CURRENT_TIME_SERVICE,
            characteristic_uuid: "00002a2b-0000-1000-8000-00805f9b34fb",
        },
        EndpointId::LedMode => EndpointMetadata {
            name: "LED mode",
            service_uuid: VENDOR_SERVICE,
            characteristic_uuid: "0000ffc1-0000-1000-8000-00805f9b34fb",
        },
        EndpointId::LedSetting => EndpointMetadata {
            name: "LED setting",
            service_uuid: VENDOR_SERVICE,
            characteristic_uuid: "0000ffc2-0000-1000-8000-00805f9b34fb",
        },
        EndpointId::ButtonEvent => EndpointMetadata {
            name: "button event",
            service_uuid: VENDOR_SERVICE,
            characteristic_uuid: "0000ffc3-0000-1000-8000-00805f9b34fb",
        },
        EndpointId::MotionData => EndpointMetadata {
            name: "motion data",
            service_uuid: VENDOR_SERVICE,
            characteristic_uuid: "0000ffc4-0000-1000-8000-00805f9b34fb",
        },
        EndpointId::ImuEnable => EndpointMetadata {
            name: "IMU enable",
            service_uuid: VENDOR_SERVICE,
            characteristic_uuid: "0000ffc5-0000-1000-8000-00805f9b34fb",
        },
    }
}

/// LED mode switch values.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Display)]
pub enum LedMode {
    /// Enable the LED driver.
    #[strum(to_string = "on")]
    On,
    /// Disable the LED driver.
    #[strum(to_string = "off")]
    Off,
}

impl LedMode {
    /// Single-byte wire value for this mode.
    #[must_use]
    pub fn to_byte(self) -> u8 {
        match self {
            Self::On => 0x01,
            Self::Off => 0x00,
        }
    }
}

/// A 5-byte LED setting command: colour plus blink behaviour.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct LedSetting {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
    pub blink_mode: u8,
    pub blink_period: u8,
}

impl LedSetting {
    /// Creates a solid-colour setting with the station's default blink mode.
    #[must_use]
    pub fn solid(red: u8, green: u8, blue: u8) -> Self {
        Self {
            red,
            green,
            blue,
            blink_mode: 0x02,
            blink_period: 0x00,
        }
    }

    /// Wire payload: `[red, green, blue, blink_mode, blink_period]`.
    #[must_use]
    pub fn to_bytes(self) -> [u8; 5] {
        [
            self.red,
            self.green,
            self.blue,
            self.blink_mode,
            self.blink_period,
        ]
    }
}

/// IMU enable wire value.
pub const IMU_ENABLE: u8 = 0xFE;
/// IMU disable wire value.
pub const IMU_DISABLE: u8 = 0xFF;

/// Builds the 7-byte current-time payload:
/// `[yearLow, yearHigh, month, day, hour, minute, second]`, year little-endian.
#[must_use]
pub fn clock_sync_payload(timestamp: OffsetDateTime) -> [u8; 7] {
    let year = u16::try_from(timestamp.year().clamp(0, i32::from(u16::MAX)))
        .expect("clamped year should always fit in u16");
    let [year_low, year_high] = year.to_le_bytes();

    [
        year_low,
        year_high,
        timestamp.month() as u8,
        timestamp.day(),
        timestamp.hour(),
        timestamp.minute(),
        timestamp.second(),
    ]
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use time::{Date, Month, PrimitiveDateTime, Time, UtcOffset};

    use super::*;

    #[test]
    fn endpoint_metadata_contains_expected_uuids() {
        let battery = endpoint_metadata(EndpointId::BatteryLevel);
        assert_eq!(
            "00002a19-0000-1000-8000-00805f9b34fb",
            battery.characteristic_uuid()
        );
        assert_eq!(BATTERY_SERVICE, battery.service_uuid());

        let button = endpoint_metadata(EndpointId::ButtonEvent);
        assert_eq!(VENDOR_SERVICE, button.service_uuid());
        assert_eq!("button event", button.name());
    }

    #[test]
    fn endpoint_lookup_by_uuid_is_case_insensitive() {
        let endpoint =
            endpoint_for_characteristic_uuid("00002A19-0000-1000-8000-00805F9B34FB");
        assert_eq!(Some(EndpointId::BatteryLevel), endpoint);
        assert_eq!(None, endpoint_for_characteristic_uuid("not-a-uuid"));
    }

    #[test]
    fn led_setting_encodes_five_byte_command() {
        let setting = LedSetting::solid(0xFF, 0x00, 0x7F);
        assert_eq!([0xFF, 0x00, 0x7F, 0x02, 0x00], setting.to_bytes());
    }

    #[test]
    fn led_mode_bytes_match_wire_values() {
        assert_eq!(0x01, LedMode::On.to_byte());
        assert_eq!(0x00, LedMode::Off.to_byte());
    }

    #[test]
    fn clock_sync_payload_encodes_year_little_endian() {
        let date = Date::from_calendar_date(2026, Month::August, 29)
            .expect("test calendar date should be valid");
        let time = Time::from_hms(14, 5, 59).expect("test wall-clock time should be valid");
        let timestamp = PrimitiveDateTime::new(date, time).assume_offset(UtcOffset::UTC);

        let payload = clock_sync_payload(timestamp);
        assert_eq!([0xEA, 0x07, 0x08, 0x1D, 0x0E, 0x05, 0x3B], payload);
    }
}
