//! Command surface: one method per wire-protocol operation, built on top of
//! the dispatcher, cache, and lifecycle state.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::bcd;
use crate::cache::{CacheEntry, KeyValueStore, RecordingsCache};
use crate::cancel::CancelToken;
use crate::config::ClientConfig;
use crate::constants::{
    CMD_DELETE_FILE, CMD_FIRMWARE_UPLOAD, CMD_FORMAT_CARD, CMD_GET_CARD_INFO, CMD_GET_DEVICE_INFO,
    CMD_GET_DEVICE_TIME, CMD_GET_FILE_COUNT, CMD_GET_FILE_LIST, CMD_GET_RECORDING_FILE, CMD_GET_SETTINGS,
    CMD_REQUEST_FIRMWARE_UPGRADE, CMD_RESTORE_FACTORY_SETTINGS, CMD_SEND_SCHEDULE_INFO, CMD_SET_DEVICE_TIME,
    CMD_SET_SETTINGS, DESTRUCTIVE_MAGIC,
};
use crate::counters::Counters;
use crate::device_info::{DeviceInfo, StorageInfo};
use crate::dispatcher::Dispatcher;
use crate::download;
use crate::error::JensenError;
use crate::filelist;
use crate::lifecycle::{ConnectionState, LifecycleState, SubStatus};
use crate::recording::Recording;
use crate::schedule::ScheduleEntry;
use crate::settings::{Settings, SettingsField};
use crate::status::{OperationStatus, StatusSink};
use crate::transport::{NusbBackend, UsbBackend};

/// Ties the device transport, recordings cache, error counters, and
/// lifecycle state machine together under one typed handle.
pub struct Client<B: UsbBackend, S: KeyValueStore> {
    dispatcher: Dispatcher<B>,
    cache: RecordingsCache<S>,
    counters: Counters,
    lifecycle: LifecycleState,
    config: ClientConfig,
    device_serial: std::sync::Mutex<Option<String>>,
}

fn status_byte(frame_body: &Bytes, command: &str) -> Result<(), JensenError> {
    match frame_body.first() {
        Some(0) | None => Ok(()),
        Some(&code) => Err(JensenError::Protocol(format!("{command} returned status {code}"))),
    }
}

impl<B: UsbBackend, S: KeyValueStore> Client<B, S> {
    /// Builds a client directly from a transport and a persistence backend,
    /// bypassing USB device enumeration. Intended for tests driving the
    /// command surface against fakes; real callers use [`Client::connect`].
    pub fn from_parts(backend: B, store: S, config: ClientConfig) -> Self {
        let counters = Counters::new();
        Self {
            dispatcher: Dispatcher::new(backend, counters.clone()),
            cache: RecordingsCache::new(store),
            counters,
            lifecycle: LifecycleState::new(),
            config,
            device_serial: std::sync::Mutex::new(None),
        }
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.lifecycle.current()
    }

    /// Runs the multi-step connect sequence (open → device info → storage
    /// → settings → time sync), publishing a [`crate::status::StatusEvent`]
    /// per sub-step.
    pub async fn initialize(&self, sink: &StatusSink) -> Result<(), JensenError> {
        self.lifecycle.begin_connecting(sink);

        self.lifecycle.advance(SubStatus::Opening, sink);

        self.lifecycle.advance(SubStatus::GettingInfo, sink);
        let info = match self.get_device_info().await {
            Ok(info) => info,
            Err(e) => {
                self.lifecycle.failed(e.to_string(), sink);
                return Err(e);
            }
        };
        *self.device_serial.lock().unwrap() = Some(info.serial_number.clone());

        self.lifecycle.advance(SubStatus::GettingStorage, sink);
        if let Err(e) = self.get_card_info().await {
            warn!("initialize: get_card_info failed, continuing: {e}");
        }

        self.lifecycle.advance(SubStatus::GettingSettings, sink);
        if let Err(e) = self.get_settings().await {
            warn!("initialize: get_settings failed, continuing: {e}");
        }

        self.lifecycle.advance(SubStatus::SyncingTime, sink);
        if let Err(e) = self.set_device_time(Utc::now()).await {
            warn!("initialize: time sync failed, continuing: {e}");
        }

        self.lifecycle.advance(SubStatus::Ready, sink);
        self.lifecycle.connected(sink);
        info!(serial = %info.serial_number, firmware = %info.firmware_version, "device initialized");
        Ok(())
    }

    pub async fn disconnect(&self, sink: &StatusSink) {
        self.dispatcher.close().await;
        self.cache.invalidate_in_memory().await;
        self.lifecycle.disconnect(sink);
    }

    fn serial_or_unknown(&self) -> String {
        self.device_serial.lock().unwrap().clone().unwrap_or_else(|| "unknown".to_string())
    }

    pub async fn get_device_info(&self) -> Result<DeviceInfo, JensenError> {
        let cancel = CancelToken::new();
        let frame = self
            .dispatcher
            .send_and_await(CMD_GET_DEVICE_INFO, &[], self.config.command_timeout, &cancel)
            .await?;
        // product id/name are not carried on the wire response; 0/None fall
        // back to Model::Unknown until the USB descriptor is threaded
        // through by the caller.
        DeviceInfo::decode(&frame.body, 0, None)
    }

    pub async fn get_device_time(&self) -> Result<(u16, u8, u8, u8, u8, u8), JensenError> {
        let cancel = CancelToken::new();
        let frame = self
            .dispatcher
            .send_and_await(CMD_GET_DEVICE_TIME, &[], self.config.command_timeout, &cancel)
            .await?;
        if frame.body.len() < 7 {
            return Err(JensenError::Protocol("GetDeviceTime response too short".to_string()));
        }
        let bytes: [u8; 7] = frame.body[0..7].try_into().unwrap();
        Ok(bcd::decode_timestamp(&bytes))
    }

    pub async fn set_device_time(&self, when: DateTime<Utc>) -> Result<(), JensenError> {
        use chrono::{Datelike, Timelike};
        let body = bcd::encode_timestamp(
            when.year() as u16,
            when.month() as u8,
            when.day() as u8,
            when.hour() as u8,
            when.minute() as u8,
            when.second() as u8,
        );
        let cancel = CancelToken::new();
        let frame = self
            .dispatcher
            .send_and_await(CMD_SET_DEVICE_TIME, &body, self.config.command_timeout, &cancel)
            .await?;
        status_byte(&frame.body, "SetDeviceTime")
    }

    pub async fn get_file_count(&self) -> Result<u32, JensenError> {
        let cancel = CancelToken::new();
        let frame = self
            .dispatcher
            .send_and_await(CMD_GET_FILE_COUNT, &[], self.config.command_timeout, &cancel)
            .await?;
        if frame.body.len() < 4 {
            return Err(JensenError::Protocol("GetFileCount response too short".to_string()));
        }
        Ok(u32::from_be_bytes(frame.body[0..4].try_into().unwrap()))
    }

    pub async fn get_card_info(&self) -> Result<StorageInfo, JensenError> {
        let cancel = CancelToken::new();
        let frame = self
            .dispatcher
            .send_and_await(CMD_GET_CARD_INFO, &[], self.config.command_timeout, &cancel)
            .await?;
        let file_count = self.get_file_count().await.unwrap_or(0);
        let info = StorageInfo::decode(&frame.body, file_count)?;
        self.cache.bump_counters(info.file_count, info.used_bytes).await;
        Ok(info)
    }

    /// Cache-orchestrated listing: returns the cached entry when its
    /// `(file_count, used_bytes)` witness matches the device's current
    /// values, otherwise performs a full `GetFileList` stream and replaces
    /// the cache. On hard device failure (not merely "nothing changed"),
    /// degrades to an empty list rather than erroring, per the read-path
    /// degradation policy; a persisted copy is preferred over an empty
    /// result when both are available. `force_refresh` bypasses the
    /// cache-validity check entirely, always performing a full device
    /// fetch; `cancel` is polled between the file-list stream's packets the
    /// same way [`Client::download_file`] polls its own caller-supplied
    /// token.
    pub async fn list_recordings(
        &self,
        force_refresh: bool,
        cancel: &CancelToken,
        sink: &StatusSink,
    ) -> Result<Vec<Recording>, JensenError> {
        let serial = self.serial_or_unknown();

        let storage = match self.get_card_info().await {
            Ok(storage) => Some(storage),
            Err(e) => {
                warn!("list_recordings: get_card_info failed, falling back to cache policy: {e}");
                None
            }
        };

        if !force_refresh {
            if let Some(storage) = &storage {
                if let Some(entry) = self.cache.load(true).await {
                    if entry.is_valid_for(&serial, storage.file_count, storage.used_bytes) {
                        sink.emit(100, OperationStatus::Completed);
                        return Ok(entry.recordings);
                    }
                }
            } else if let Some(entry) = self.cache.load(true).await {
                sink.emit_event(
                    crate::status::StatusEvent::new("list_recordings", 100, OperationStatus::Completed)
                        .with_message("device unreachable, returning last known listing"),
                );
                return Ok(entry.recordings);
            }
        }

        let fetched = match self
            .dispatcher
            .send_for_stream(CMD_GET_FILE_LIST, &[], self.config.file_list_stream_timeout)
            .await
        {
            Ok(_) => {
                self.collect_file_list(cancel, sink).await
            }
            Err(e) => Err(e),
        };

        match fetched {
            Ok(recordings) => {
                if let Some(storage) = storage {
                    self.cache
                        .replace(CacheEntry {
                            recordings: recordings.clone(),
                            file_count: storage.file_count,
                            used_bytes: storage.used_bytes,
                            device_serial: serial,
                            timestamp: 0,
                        })
                        .await;
                }
                sink.emit(100, OperationStatus::Completed);
                Ok(recordings)
            }
            Err(e) => {
                warn!("list_recordings: stream fetch failed, degrading to empty list: {e}");
                sink.emit_event(
                    crate::status::StatusEvent::new("list_recordings", 0, OperationStatus::Error)
                        .with_message(e.to_string()),
                );
                Ok(Vec::new())
            }
        }
    }

    /// Drains the `GetFileList` stream and parses it into recordings,
    /// emitting the parsed files in batches as they're decoded. The
    /// dispatcher's own quiet-period collection already concatenates every
    /// packet sharing the command id, so a single incremental-parser pass
    /// over the full buffer is sufficient; `parse_incremental` is what makes
    /// that pass tolerant of a record split across packet boundaries.
    async fn collect_file_list(&self, cancel: &CancelToken, sink: &StatusSink) -> Result<Vec<Recording>, JensenError> {
        let raw = self
            .dispatcher
            .collect_stream(
                CMD_GET_FILE_LIST,
                self.config.file_list_stream_timeout,
                self.config.file_list_quiet_period,
                cancel,
                |_| {},
            )
            .await?;

        let result = filelist::parse_incremental(&raw, 0);
        if !result.leftover.is_empty() {
            warn!(bytes = result.leftover.len(), "collect_file_list: trailing unparsed bytes discarded");
        }

        let batch_count = filelist::batches(&result.files, crate::constants::FILE_LIST_BATCH_SIZE).count().max(1);
        for (i, batch) in filelist::batches(&result.files, crate::constants::FILE_LIST_BATCH_SIZE).enumerate() {
            sink.emit_event(
                crate::status::StatusEvent::new(
                    "list_recordings",
                    (((i + 1) * 100) / batch_count) as u8,
                    OperationStatus::Streaming,
                )
                .with_new_files(batch.to_vec()),
            );
        }

        Ok(result.files)
    }

    pub async fn download_file(
        &self,
        filename: &str,
        declared_size: u32,
        cancel: &CancelToken,
        sink: &StatusSink,
    ) -> Result<Vec<u8>, JensenError> {
        download::download_file(&self.dispatcher, filename, declared_size, cancel, sink).await
    }

    /// Deletes a file. Unlike `list_recordings`, failures are never
    /// swallowed: a delete the caller believes succeeded but didn't would
    /// silently diverge the cache from reality.
    pub async fn delete_file(&self, filename: &str) -> Result<(), JensenError> {
        let cancel = CancelToken::new();
        let body = filename.as_bytes().to_vec();
        let frame = self
            .dispatcher
            .send_and_await(CMD_DELETE_FILE, &body, self.config.command_timeout, &cancel)
            .await?;
        status_byte(&frame.body, "DeleteFile")?;
        // No eager cache mutation: the next list_recordings call observes the
        // device's new (file_count, used_bytes) and refetches.
        Ok(())
    }

    pub async fn request_firmware_upgrade(&self, size: u32, version: u32) -> Result<(), JensenError> {
        let mut body = Vec::with_capacity(8);
        body.extend_from_slice(&size.to_be_bytes());
        body.extend_from_slice(&version.to_be_bytes());
        let cancel = CancelToken::new();
        let frame = self
            .dispatcher
            .send_and_await(CMD_REQUEST_FIRMWARE_UPGRADE, &body, self.config.command_timeout, &cancel)
            .await?;
        status_byte(&frame.body, "RequestFirmwareUpgrade")
    }

    pub async fn firmware_upload(&self, chunk: &[u8]) -> Result<(), JensenError> {
        let cancel = CancelToken::new();
        let frame = self
            .dispatcher
            .send_and_await(CMD_FIRMWARE_UPLOAD, chunk, self.config.command_timeout, &cancel)
            .await?;
        status_byte(&frame.body, "FirmwareUpload")
    }

    pub async fn get_settings(&self) -> Result<Settings, JensenError> {
        let cancel = CancelToken::new();
        let frame = self
            .dispatcher
            .send_and_await(CMD_GET_SETTINGS, &[], self.config.command_timeout, &cancel)
            .await?;
        Settings::decode(&frame.body)
    }

    pub async fn set_setting(&self, field: SettingsField, enabled: bool) -> Result<(), JensenError> {
        let body = Settings::encode_single_change(field, enabled);
        let cancel = CancelToken::new();
        let frame = self
            .dispatcher
            .send_and_await(CMD_SET_SETTINGS, &body, self.config.command_timeout, &cancel)
            .await?;
        status_byte(&frame.body, "SetSettings")
    }

    /// Formats the storage card. Requires the confirmed destructive-command
    /// magic bytes as a deliberate guard against accidental invocation.
    pub async fn format_card(&self, confirm: [u8; 4]) -> Result<(), JensenError> {
        if confirm != DESTRUCTIVE_MAGIC {
            return Err(JensenError::Protocol("format_card requires the confirmation magic bytes".to_string()));
        }
        let cancel = CancelToken::new();
        let frame = self
            .dispatcher
            .send_and_await(CMD_FORMAT_CARD, &confirm, self.config.format_timeout, &cancel)
            .await?;
        status_byte(&frame.body, "FormatCard")?;
        self.cache.invalidate_in_memory().await;
        Ok(())
    }

    pub async fn get_recording_file(&self, filename: &str) -> Result<Bytes, JensenError> {
        let cancel = CancelToken::new();
        let body = filename.as_bytes().to_vec();
        let frame = self
            .dispatcher
            .send_and_await(CMD_GET_RECORDING_FILE, &body, self.config.command_timeout, &cancel)
            .await?;
        Ok(frame.body)
    }

    pub async fn restore_factory_settings(&self, confirm: [u8; 4]) -> Result<(), JensenError> {
        if confirm != DESTRUCTIVE_MAGIC {
            return Err(JensenError::Protocol(
                "restore_factory_settings requires the confirmation magic bytes".to_string(),
            ));
        }
        let cancel = CancelToken::new();
        let frame = self
            .dispatcher
            .send_and_await(CMD_RESTORE_FACTORY_SETTINGS, &confirm, self.config.command_timeout, &cancel)
            .await?;
        status_byte(&frame.body, "RestoreFactorySettings")
    }

    pub async fn send_schedule_info(&self, entries: &[ScheduleEntry]) -> Result<(), JensenError> {
        let body = crate::schedule::encode_schedule(entries);
        let cancel = CancelToken::new();
        let frame = self
            .dispatcher
            .send_and_await(CMD_SEND_SCHEDULE_INFO, &body, self.config.command_timeout, &cancel)
            .await?;
        status_byte(&frame.body, "SendScheduleInfo")
    }
}

/// True for connect failures worth another attempt: the device may simply
/// not have finished enumerating yet, or another process may release its
/// claim before the next attempt. A wrong interface/endpoint number or a
/// denied permission won't change between attempts, so those aren't retried.
fn is_connect_retryable(e: &JensenError) -> bool {
    matches!(
        e,
        JensenError::DeviceNotFound | JensenError::DeviceBusy | JensenError::Timeout | JensenError::ConnectionLost(_) | JensenError::Usb(_)
    )
}

impl<S: KeyValueStore> Client<NusbBackend, S> {
    /// Opens the first matching USB device and returns a client ready for
    /// [`Client::initialize`]. Retries a failed open up to
    /// `config.retry_policy.max_attempts` times, waiting `retry_delay`
    /// between attempts, for the subset of failures retrying can plausibly
    /// fix (see [`is_connect_retryable`]).
    pub async fn connect(config: ClientConfig, store: S) -> Result<Arc<Self>, JensenError> {
        let policy = config.retry_policy;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match NusbBackend::open(
                &config.usb_filters,
                config.interface_number,
                config.endpoint_out,
                config.endpoint_in,
                config.read_buffer_size,
            )
            .await
            {
                Ok(backend) => return Ok(Arc::new(Self::from_parts(backend, store, config))),
                Err(e) if attempt < policy.max_attempts && is_connect_retryable(&e) => {
                    warn!(attempt, max_attempts = policy.max_attempts, "connect attempt failed, retrying: {e}");
                    tokio::time::sleep(policy.retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Attempts to reconnect after an unsolicited disconnect (or at
    /// startup), as long as [`LifecycleState::should_suppress_auto_reconnect`]
    /// doesn't say otherwise. On success, the dispatcher's backend is
    /// swapped in place and the connect sequence re-runs; the client handle
    /// itself, and anything already holding it, stays valid throughout.
    pub async fn attempt_auto_reconnect(&self, sink: &StatusSink) -> Result<(), JensenError> {
        if self.lifecycle.should_suppress_auto_reconnect() {
            return Ok(());
        }
        match NusbBackend::open(
            &self.config.usb_filters,
            self.config.interface_number,
            self.config.endpoint_out,
            self.config.endpoint_in,
            self.config.read_buffer_size,
        )
        .await
        {
            Ok(backend) => {
                self.dispatcher.replace_backend(backend).await;
                self.initialize(sink).await
            }
            Err(e) => {
                self.lifecycle.failed(e.to_string(), sink);
                Err(e)
            }
        }
    }

    /// Polls connection health every `poll_interval` and drives
    /// [`Client::attempt_auto_reconnect`] whenever the client isn't
    /// currently connected. Intended to be spawned as a background task by
    /// a long-running host process; a one-shot CLI invocation has little
    /// use for it.
    pub async fn run_auto_reconnect_loop(self: Arc<Self>, sink: StatusSink, poll_interval: Duration) {
        loop {
            tokio::time::sleep(poll_interval).await;
            if self.connection_state() == ConnectionState::Connected {
                continue;
            }
            if let Err(e) = self.attempt_auto_reconnect(&sink).await {
                warn!("auto-reconnect attempt failed: {e}");
            }
        }
    }
}
