//! Explicit client configuration.
//!
//! Replaces a module-level singleton configured via global mutable state:
//! callers build one `ClientConfig` and pass it to [`crate::client::Client::connect`]
//! explicitly, so two clients in the same process never fight over shared
//! defaults.

use std::time::Duration;

use crate::constants::{
    DEFAULT_COMMAND_TIMEOUT, DEFAULT_MAX_ERROR_THRESHOLD, DEFAULT_MAX_RETRY_ATTEMPTS, DEFAULT_RETRY_DELAY,
    ENDPOINT_IN, ENDPOINT_OUT, FILE_DOWNLOAD_TIMEOUT, FILE_LIST_QUIET_PERIOD, FILE_LIST_STREAM_TIMEOUT,
    FORMAT_TIMEOUT, PRODUCT_ID_H1, PRODUCT_ID_H1E, PRODUCT_ID_P1, READ_BUFFER_SIZE, USB_INTERFACE, VENDOR_IDS,
};
use crate::transport::UsbFilter;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub max_error_threshold: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RETRY_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
            max_error_threshold: DEFAULT_MAX_ERROR_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub usb_filters: Vec<UsbFilter>,
    pub interface_number: u8,
    pub endpoint_out: u8,
    pub endpoint_in: u8,
    pub read_buffer_size: usize,
    pub command_timeout: Duration,
    pub file_list_stream_timeout: Duration,
    pub file_list_quiet_period: Duration,
    pub file_download_timeout: Duration,
    pub format_timeout: Duration,
    pub retry_policy: RetryPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            usb_filters: VENDOR_IDS
                .iter()
                .flat_map(|&vendor_id| {
                    [PRODUCT_ID_H1, PRODUCT_ID_H1E, PRODUCT_ID_P1]
                        .into_iter()
                        .map(move |product_id| UsbFilter { vendor_id, product_id })
                })
                .collect(),
            interface_number: USB_INTERFACE,
            endpoint_out: ENDPOINT_OUT,
            endpoint_in: ENDPOINT_IN,
            read_buffer_size: READ_BUFFER_SIZE,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            file_list_stream_timeout: FILE_LIST_STREAM_TIMEOUT,
            file_list_quiet_period: FILE_LIST_QUIET_PERIOD,
            file_download_timeout: FILE_DOWNLOAD_TIMEOUT,
            format_timeout: FORMAT_TIMEOUT,
            retry_policy: RetryPolicy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filters_cover_every_known_vendor_and_product_pair() {
        let config = ClientConfig::default();
        assert_eq!(config.usb_filters.len(), VENDOR_IDS.len() * 3);
    }

    #[test]
    fn default_retry_policy_matches_documented_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.max_error_threshold, 5);
    }
}
