//! OnePutt characteristic decoding
//! Pure functions turning notification and read payloads into typed values.
//!
//! # Measurement layout (22 bytes, little-endian)
//!
//! ```text
//! [0-1]   : Shot sequence number (u16)
//! [2-5]   : Speed (f32, device units)
//! [6-9]   : Vertical launch angle (f32, degrees)
//! [10-13] : Horizontal launch angle (f32, degrees)
//! [14-17] : Max launch angle (f32)
//! [18-21] : Min launch angle (f32)
//! ```

use crate::core::bluetooth::constants::MEASUREMENT_PACKET_SIZE;
use crate::core::bluetooth::error::{BleError, BleResult};
use crate::core::bluetooth::types::{CharacteristicKind, ReadyState};

/// One decoded measurement notification
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShotRecord {
    pub sequence: u16,
    pub speed: f32,
    pub vla: f32,
    pub hla: f32,
    pub max_launch_angle: f32,
    pub min_launch_angle: f32,
}

/// A decoded characteristic value
#[derive(Debug, Clone, PartialEq)]
pub enum Reading {
    Battery(u16),
    Ready(ReadyState),
    Shot(ShotRecord),
    SerialNumber(String),
    FirmwareVersion(String),
    Model(String),
}

/// Decodes `data` according to `kind`
pub fn decode(kind: CharacteristicKind, data: &[u8]) -> BleResult<Reading> {
    match kind {
        CharacteristicKind::BatteryLevel => decode_battery(data).map(Reading::Battery),
        CharacteristicKind::ReadyStatus => decode_ready_status(data).map(Reading::Ready),
        CharacteristicKind::Measurement => decode_measurement(data).map(Reading::Shot),
        CharacteristicKind::SerialNumber => decode_text(kind, data).map(Reading::SerialNumber),
        CharacteristicKind::FirmwareVersion => {
            decode_text(kind, data).map(Reading::FirmwareVersion)
        }
        CharacteristicKind::Model => decode_text(kind, data).map(Reading::Model),
    }
}

/// Battery level in raw units; values above 100 mean "unknown"
pub fn decode_battery(data: &[u8]) -> BleResult<u16> {
    let bytes = fixed::<2>(CharacteristicKind::BatteryLevel, data, 0)?;
    Ok(u16::from_le_bytes(bytes))
}

/// Zero means the sensor is waiting for a putt, anything else is "not ready"
pub fn decode_ready_status(data: &[u8]) -> BleResult<ReadyState> {
    let [flag] = fixed::<1>(CharacteristicKind::ReadyStatus, data, 0)?;
    Ok(if flag == 0 {
        ReadyState::Waiting
    } else {
        ReadyState::NotReady
    })
}

pub fn decode_measurement(data: &[u8]) -> BleResult<ShotRecord> {
    let kind = CharacteristicKind::Measurement;
    if data.len() < kind.min_len() {
        return Err(too_short(kind, data.len()));
    }
    let float_at = |offset| fixed::<4>(kind, data, offset).map(f32::from_le_bytes);

    Ok(ShotRecord {
        sequence: u16::from_le_bytes(fixed::<2>(kind, data, 0)?),
        speed: float_at(2)?,
        vla: float_at(6)?,
        hla: float_at(10)?,
        max_launch_angle: float_at(14)?,
        min_launch_angle: float_at(18)?,
    })
}

fn decode_text(kind: CharacteristicKind, data: &[u8]) -> BleResult<String> {
    String::from_utf8(data.to_vec())
        .map_err(|e| BleError::malformed(kind, format!("invalid UTF-8: {}", e)))
}

fn fixed<const N: usize>(kind: CharacteristicKind, data: &[u8], offset: usize) -> BleResult<[u8; N]> {
    data.get(offset..offset + N)
        .and_then(|slice| <[u8; N]>::try_from(slice).ok())
        .ok_or_else(|| too_short(kind, data.len()))
}

fn too_short(kind: CharacteristicKind, actual: usize) -> BleError {
    BleError::malformed(
        kind,
        format!("expected at least {} bytes, got {}", kind.min_len(), actual),
    )
}

/// Renders a payload as space separated hex for debug logs
pub fn hex_string(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Lays a shot out the way the sensor sends it
pub fn encode_measurement(shot: &ShotRecord) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(MEASUREMENT_PACKET_SIZE);
    bytes.extend_from_slice(&shot.sequence.to_le_bytes());
    for value in [
        shot.speed,
        shot.vla,
        shot.hla,
        shot.max_launch_angle,
        shot.min_launch_angle,
    ] {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shot(sequence: u16, speed: f32) -> ShotRecord {
        ShotRecord {
            sequence,
            speed,
            vla: 2.5,
            hla: -1.0,
            max_launch_angle: 5.0,
            min_launch_angle: 1.0,
        }
    }

    #[test]
    fn test_decode_battery() {
        assert_eq!(decode_battery(&[0x55, 0x00]).unwrap(), 85);
        assert_eq!(decode_battery(&[0xFF, 0xFF, 0x01]).unwrap(), 0xFFFF);
    }

    #[test]
    fn test_ready_status_polarity_zero_means_waiting() {
        // Zero is "Waiting" and non-zero "Not Ready", which reads inverted.
        // Kept exactly as the device behaves.
        assert_eq!(decode_ready_status(&[0x00]).unwrap(), ReadyState::Waiting);
        assert_eq!(decode_ready_status(&[0x01]).unwrap(), ReadyState::NotReady);
        assert_eq!(decode_ready_status(&[0x7F]).unwrap(), ReadyState::NotReady);
    }

    #[test]
    fn test_decode_measurement_layout() {
        let bytes = encode_measurement(&shot(1, 3000.0));
        assert_eq!(bytes.len(), 22);
        // vla sits before hla on the wire
        assert_eq!(&bytes[6..10], &2.5f32.to_le_bytes());
        assert_eq!(&bytes[10..14], &(-1.0f32).to_le_bytes());

        let decoded = decode_measurement(&bytes).unwrap();
        assert_eq!(decoded, shot(1, 3000.0));
    }

    #[test]
    fn test_trailing_bytes_are_ignored() {
        let mut bytes = encode_measurement(&shot(9, 1234.5));
        bytes.extend_from_slice(&[0xAA, 0xBB]);
        assert_eq!(decode_measurement(&bytes).unwrap().sequence, 9);
    }

    #[test]
    fn test_short_buffers_are_malformed() {
        let full = encode_measurement(&shot(3, 900.0));
        for kind in [
            CharacteristicKind::BatteryLevel,
            CharacteristicKind::ReadyStatus,
            CharacteristicKind::Measurement,
        ] {
            for len in 0..kind.min_len() {
                let err = decode(kind, &full[..len]).unwrap_err();
                assert!(
                    matches!(err, BleError::MalformedPayload { kind: k, .. } if k == kind),
                    "{kind} with {len} bytes gave {err:?}"
                );
            }
        }
    }

    #[test]
    fn test_decode_text() {
        assert_eq!(
            decode(CharacteristicKind::SerialNumber, b"OP-123456").unwrap(),
            Reading::SerialNumber("OP-123456".into())
        );
        assert_eq!(
            decode(CharacteristicKind::Model, b"").unwrap(),
            Reading::Model(String::new())
        );
        let err = decode(CharacteristicKind::FirmwareVersion, &[0xC3, 0x28]).unwrap_err();
        assert!(matches!(err, BleError::MalformedPayload { .. }));
    }

    #[test]
    fn test_hex_string() {
        assert_eq!(hex_string(&[0x01, 0xAB, 0x00]), "01 AB 00");
        assert_eq!(hex_string(&[]), "");
    }
}
