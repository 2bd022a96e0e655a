//! Wire-protocol constants for the Jensen device family.

use std::time::Duration;

/// USB vendor ids known to enumerate a Jensen device.
///
/// `0x1A86` appears on units built around a bridge IC rather than the
/// vendor's own silicon; both are accepted.
pub const VENDOR_IDS: [u16; 2] = [0x10D6, 0x1A86];

/// Product ids per model. An unrecognized product id still connects; the
/// model name falls back to the device's own product-name string or to
/// "Unknown" (see [`crate::recording::Model`]).
pub const PRODUCT_ID_H1: u16 = 0xAF01;
pub const PRODUCT_ID_H1E: u16 = 0xAF02;
pub const PRODUCT_ID_P1: u16 = 0xAF03;

pub const USB_INTERFACE: u8 = 0;
pub const USB_CONFIGURATION: u8 = 1;
pub const ENDPOINT_OUT: u8 = 0x01;
pub const ENDPOINT_IN: u8 = 0x02;

/// Bulk-IN read buffer size.
pub const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Outbound/inbound frame header size: sync(2) + cmd(2) + seq(4) + length(4).
pub const FRAME_HEADER_SIZE: usize = 12;
pub const SYNC_BYTES: [u8; 2] = [0x12, 0x34];

// --- Command ids (wire protocol) ---
pub const CMD_GET_DEVICE_INFO: u16 = 0x01;
pub const CMD_GET_DEVICE_TIME: u16 = 0x02;
pub const CMD_SET_DEVICE_TIME: u16 = 0x03;
pub const CMD_GET_FILE_LIST: u16 = 0x04;
pub const CMD_TRANSFER_FILE: u16 = 0x05;
pub const CMD_GET_FILE_COUNT: u16 = 0x06;
pub const CMD_DELETE_FILE: u16 = 0x07;
pub const CMD_REQUEST_FIRMWARE_UPGRADE: u16 = 0x08;
pub const CMD_FIRMWARE_UPLOAD: u16 = 0x09;
pub const CMD_GET_SETTINGS: u16 = 0x0B;
pub const CMD_SET_SETTINGS: u16 = 0x0C;
pub const CMD_GET_FILE_BLOCK: u16 = 0x0D;
pub const CMD_GET_CARD_INFO: u16 = 0x10;
pub const CMD_FORMAT_CARD: u16 = 0x11;
pub const CMD_GET_RECORDING_FILE: u16 = 0x12;
pub const CMD_RESTORE_FACTORY_SETTINGS: u16 = 0x13;
pub const CMD_SEND_SCHEDULE_INFO: u16 = 0x14;

/// Magic bytes required to authorize a destructive format/factory-reset.
pub const DESTRUCTIVE_MAGIC: [u8; 4] = [0x01, 0x02, 0x03, 0x04];

pub const MIB: u64 = 1_048_576;

/// File-list stream header marker (`0xFF 0xFF` + 32-bit total count).
pub const FILE_LIST_HEADER_MARKER: [u8; 2] = [0xFF, 0xFF];
pub const FILE_LIST_HEADER_SIZE: usize = 6;
pub const FILE_LIST_RESERVED_SIZE: usize = 6;
pub const FILE_LIST_SIGNATURE_SIZE: usize = 16;
pub const FILE_LIST_BATCH_SIZE: usize = 10;
pub const FILE_LIST_BATCH_DELAY: Duration = Duration::from_millis(200);

// --- Settings bit offsets ---
pub const SETTINGS_AUTO_RECORD_OFFSET: usize = 3;
pub const SETTINGS_AUTO_PLAY_OFFSET: usize = 7;
pub const SETTINGS_NOTIFICATION_OFFSET: usize = 11;
pub const SETTINGS_BLUETOOTH_TONE_OFFSET: usize = 15;
pub const SETTINGS_MIN_RESPONSE_LEN: usize = 16;

pub const SCHEDULE_ENTRY_SIZE: usize = 52;

// --- Timeouts ---
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);
pub const FILE_LIST_STREAM_TIMEOUT: Duration = Duration::from_secs(10);
pub const FILE_LIST_QUIET_PERIOD: Duration = Duration::from_secs(3);
pub const FILE_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);
pub const FILE_DOWNLOAD_CHUNK_TIMEOUT: Duration = Duration::from_secs(15);
pub const FILE_DOWNLOAD_EMPTY_PACKET_WAIT: Duration = Duration::from_millis(100);
pub const FORMAT_TIMEOUT: Duration = Duration::from_secs(60);
pub const DISPATCH_POLL_INTERVAL: Duration = Duration::from_millis(10);

// --- Retry policy ---
pub const DEFAULT_MAX_RETRY_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_ERROR_THRESHOLD: u32 = 5;
