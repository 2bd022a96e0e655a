//! Device settings encode/decode (`GetSettings` / `SetSettings`).

use crate::constants::{
    SETTINGS_AUTO_PLAY_OFFSET, SETTINGS_AUTO_RECORD_OFFSET, SETTINGS_BLUETOOTH_TONE_OFFSET,
    SETTINGS_MIN_RESPONSE_LEN, SETTINGS_NOTIFICATION_OFFSET,
};
use crate::error::JensenError;
use serde::{Deserialize, Serialize};

/// The four boolean flags exposed by the device. `bluetooth_tone` is stored
/// in its logical (non-inverted) sense; the wire inversion at offset 15 is
/// handled entirely inside encode/decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Settings {
    pub auto_record: bool,
    pub auto_play: bool,
    pub bluetooth_tone: bool,
    pub notification: bool,
}

const ENABLED: u8 = 1;
const DISABLED: u8 = 2;
const BT_ENABLED_WIRE: u8 = 2;
const BT_DISABLED_WIRE: u8 = 1;

impl Settings {
    /// Decodes a `GetSettings` response body (must be at least 16 bytes).
    pub fn decode(body: &[u8]) -> Result<Self, JensenError> {
        if body.len() < SETTINGS_MIN_RESPONSE_LEN {
            return Err(JensenError::Protocol(format!(
                "GetSettings response too short: {} bytes",
                body.len()
            )));
        }
        Ok(Self {
            auto_record: body[SETTINGS_AUTO_RECORD_OFFSET] == ENABLED,
            auto_play: body[SETTINGS_AUTO_PLAY_OFFSET] == ENABLED,
            notification: body[SETTINGS_NOTIFICATION_OFFSET] == ENABLED,
            bluetooth_tone: body[SETTINGS_BLUETOOTH_TONE_OFFSET] == BT_ENABLED_WIRE,
        })
    }

    /// Builds a `SetSettings` body that changes exactly one flag, zero-padded
    /// up to the offset of the target byte.
    pub fn encode_single_change(field: SettingsField, enabled: bool) -> Vec<u8> {
        let (offset, on, off) = match field {
            SettingsField::AutoRecord => (SETTINGS_AUTO_RECORD_OFFSET, ENABLED, DISABLED),
            SettingsField::AutoPlay => (SETTINGS_AUTO_PLAY_OFFSET, ENABLED, DISABLED),
            SettingsField::Notification => (SETTINGS_NOTIFICATION_OFFSET, ENABLED, DISABLED),
            SettingsField::BluetoothTone => (SETTINGS_BLUETOOTH_TONE_OFFSET, BT_ENABLED_WIRE, BT_DISABLED_WIRE),
        };
        let mut body = vec![0u8; offset + 1];
        body[offset] = if enabled { on } else { off };
        body
    }
}

/// Which settings flag a `SetSettings` call is targeting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsField {
    AutoRecord,
    AutoPlay,
    Notification,
    BluetoothTone,
}
