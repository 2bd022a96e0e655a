//! Device info and storage info parsing.

use crate::constants::{MIB, PRODUCT_ID_H1, PRODUCT_ID_H1E, PRODUCT_ID_P1};
use crate::error::JensenError;
use serde::{Deserialize, Serialize};

/// Model name derived from the USB product id when the device's own
/// product-name string is empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Model {
    H1,
    H1E,
    P1,
    Unknown,
}

impl Model {
    pub fn from_product_id(product_id: u16) -> Self {
        match product_id {
            PRODUCT_ID_H1 => Model::H1,
            PRODUCT_ID_H1E => Model::H1E,
            PRODUCT_ID_P1 => Model::P1,
            _ => Model::Unknown,
        }
    }

    /// Prefers the device's own product-name string when it's non-empty,
    /// matching known model substrings; falls back to the product id only
    /// when the name is empty or matches none of them.
    pub fn resolve(product_id: u16, product_name: Option<&str>) -> Self {
        match product_name.map(str::trim) {
            Some(name) if !name.is_empty() => {
                let upper = name.to_ascii_uppercase();
                if upper.contains("H1E") {
                    Model::H1E
                } else if upper.contains("H1") {
                    Model::H1
                } else if upper.contains("P1") {
                    Model::P1
                } else {
                    Self::from_product_id(product_id)
                }
            }
            _ => Self::from_product_id(product_id),
        }
    }
}

/// Parsed `GetDeviceInfo` response: 4-byte version code + 16-byte serial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub firmware_version: String,
    pub serial_number: String,
    pub model: Model,
}

impl DeviceInfo {
    /// Decodes a `GetDeviceInfo` response body. The firmware version string
    /// is derived from three of the four version bytes; the serial is an
    /// ASCII slice terminated by a null byte, falling back to the hex of
    /// the raw bytes if non-printable. `product_name` is the USB device
    /// descriptor's product-name string, if the caller has one available;
    /// it takes precedence over `product_id` when resolving the model.
    pub fn decode(body: &[u8], product_id: u16, product_name: Option<&str>) -> Result<Self, JensenError> {
        if body.len() < 20 {
            return Err(JensenError::Protocol(format!(
                "GetDeviceInfo response too short: {} bytes",
                body.len()
            )));
        }
        let firmware_version = format!("{}.{}.{}", body[1], body[2], body[3]);
        let serial_bytes = &body[4..20];
        let serial_number = decode_serial(serial_bytes);
        Ok(Self {
            firmware_version,
            serial_number,
            model: Model::resolve(product_id, product_name),
        })
    }
}

fn decode_serial(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    let slice = &bytes[..end];
    if !slice.is_empty() && slice.iter().all(|&b| b.is_ascii_graphic() || b == b' ') {
        String::from_utf8_lossy(slice).into_owned()
    } else {
        hex::encode(bytes)
    }
}

/// Parsed `GetCardInfo` response plus a separately fetched file count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageInfo {
    pub total_bytes: u64,
    pub free_bytes: u64,
    pub used_bytes: u64,
    pub file_count: u32,
}

impl StorageInfo {
    /// Decodes a 12-byte `GetCardInfo` response (`free_MiB | total_MiB |
    /// status`) plus the file count from a separate `GetFileCount` call.
    /// Capacity and free space are reported in MiB and converted to bytes.
    pub fn decode(card_info_body: &[u8], file_count: u32) -> Result<Self, JensenError> {
        if card_info_body.len() < 12 {
            return Err(JensenError::Protocol(format!(
                "GetCardInfo response too short: {} bytes",
                card_info_body.len()
            )));
        }
        let free_mib = u32::from_be_bytes(card_info_body[0..4].try_into().unwrap());
        let total_mib = u32::from_be_bytes(card_info_body[4..8].try_into().unwrap());
        let status = card_info_body[11];
        if status != 0 {
            return Err(JensenError::Protocol(format!("GetCardInfo returned status {status}")));
        }

        let total_bytes = total_mib as u64 * MIB;
        let free_bytes = free_mib as u64 * MIB;
        let used_bytes = total_bytes.saturating_sub(free_bytes);

        Ok(Self {
            total_bytes,
            free_bytes,
            used_bytes,
            file_count,
        })
    }
}
