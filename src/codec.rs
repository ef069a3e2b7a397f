use thiserror::Error;
use tracing::instrument;

/// Length of one motion telemetry payload.
pub const MOTION_PAYLOAD_LEN: usize = 12;

/// One decoded inertial sample: accelerometer and gyroscope axes.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct MotionSample {
    pub accel_x: i16,
    pub accel_y: i16,
    pub accel_z: i16,
    pub gyro_x: i16,
    pub gyro_y: i16,
    pub gyro_z: i16,
}

/// Errors returned while decoding notification payloads.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum CodecError {
    #[error("payload of {actual} bytes is shorter than the required {expected}")]
    MalformedPayload { expected: usize, actual: usize },
}

/// Decodes a motion telemetry payload.
///
/// The payload carries six little-endian signed 16-bit fields at offsets
/// 0, 2, 4, 6, 8, 10 in the order ax, ay, az, gx, gy, gz. Trailing bytes
/// beyond the twelfth are ignored so newer firmware can extend the frame.
///
/// # Errors
///
/// Returns `MalformedPayload` when fewer than 12 bytes are supplied.
#[instrument(level = "trace", fields(payload_len = payload.len()))]
pub fn decode_motion(payload: &[u8]) -> Result<MotionSample, CodecError> {
    if payload.len() < MOTION_PAYLOAD_LEN {
        return Err(CodecError::MalformedPayload {
            expected: MOTION_PAYLOAD_LEN,
            actual: payload.len(),
        });
    }

    let field = |offset: usize| i16::from_le_bytes([payload[offset], payload[offset + 1]]);

    Ok(MotionSample {
        accel_x: field(0),
        accel_y: field(2),
        accel_z: field(4),
        gyro_x: field(6),
        gyro_y: field(8),
        gyro_z: field(10),
    })
}

/// Encodes a motion sample into its 12-byte wire payload.
#[must_use]
pub fn encode_motion(sample: &MotionSample) -> [u8; MOTION_PAYLOAD_LEN] {
    let mut payload = [0u8; MOTION_PAYLOAD_LEN];
    let fields = [
        sample.accel_x,
        sample.accel_y,
        sample.accel_z,
        sample.gyro_x,
        sample.gyro_y,
        sample.gyro_z,
    ];
    for (index, value) in fields.into_iter().enumerate() {
        payload[index * 2..index * 2 + 2].copy_from_slice(&value.to_le_bytes());
    }
    payload
}

/// A recognised button press.
#[derive(Debug, Clone, Copy, Eq, PartialEq, strum_macros::Display)]
pub enum ButtonPress {
    /// Button A (wire value `0x01`).
    #[strum(to_string = "button A")]
    A,
    /// Button B (wire value `0x10`).
    #[strum(to_string = "button B")]
    B,
    /// Both buttons pressed together (wire value `0x11`).
    #[strum(to_string = "both buttons")]
    Both,
}

impl ButtonPress {
    /// Decodes one button notification payload.
    ///
    /// Byte 0 selects the press; unrecognised values are not an error and
    /// decode to `None` so firmware can add event codes without breaking the
    /// station.
    ///
    /// # Errors
    ///
    /// Returns `MalformedPayload` when the payload is empty.
    pub fn from_payload(payload: &[u8]) -> Result<Option<Self>, CodecError> {
        let Some(&value) = payload.first() else {
            return Err(CodecError::MalformedPayload {
                expected: 1,
                actual: 0,
            });
        };

        Ok(match value {
            0x01 => Some(Self::A),
            0x10 => Some(Self::B),
            0x11 => Some(Self::Both),
            _ => None,
        })
    }
}
