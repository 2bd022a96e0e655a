//! USB transport: device enumeration, interface claim, and bulk transfers.
//!
//! The Dispatcher talks to devices only through the [`UsbBackend`] trait so
//! the framing/correlation logic above it can be exercised in tests without
//! real hardware.

use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use nusb::Interface;
use nusb::io::{EndpointRead, EndpointWrite};
use nusb::transfer::Bulk;

use crate::error::JensenError;

/// A (vendor id, product id) pair used to filter device enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsbFilter {
    pub vendor_id: u16,
    pub product_id: u16,
}

/// Backend-agnostic USB operations the Dispatcher relies on.
///
/// Implemented with native async-fn-in-trait (edition 2024); the Dispatcher
/// is generic over `B: UsbBackend` rather than a trait object, since nothing
/// needs dynamic dispatch across backend types.
pub trait UsbBackend: Send {
    /// Performs a bulk OUT transfer, returning once fully written or erroring.
    async fn write(&mut self, data: &[u8], timeout: Duration) -> Result<(), JensenError>;

    /// Performs a bulk IN transfer of up to `max_len` bytes.
    async fn read(&mut self, max_len: usize, timeout: Duration) -> Result<Vec<u8>, JensenError>;

    /// Clears a halt condition on the affected endpoint, once. A second
    /// stall after a successful clear is surfaced as a protocol error
    /// rather than retried indefinitely.
    async fn clear_halt(&mut self) -> Result<(), JensenError>;

    /// Releases the interface and closes the device. Idempotent.
    async fn close(&mut self);

    /// Best-effort liveness check independent of transfer errors.
    fn is_connected(&self) -> bool;
}

/// `nusb`-backed implementation used outside of tests.
pub struct NusbBackend {
    interface: Interface,
    endpoint_in: u8,
    read_buffer_size: usize,
    reader: Option<EndpointRead<Bulk>>,
    writer: EndpointWrite<Bulk>,
    stalled_once: bool,
    connected: bool,
}

impl NusbBackend {
    /// Opens the first device matching any of `filters`, claims
    /// `interface_number`, and wires up persistent bulk endpoint I/O.
    pub async fn open(
        filters: &[UsbFilter],
        interface_number: u8,
        endpoint_out: u8,
        endpoint_in: u8,
        read_buffer_size: usize,
    ) -> Result<Self, JensenError> {
        let device_info = nusb::list_devices()
            .await
            .map_err(JensenError::Usb)?
            .find(|d| {
                filters
                    .iter()
                    .any(|f| f.vendor_id == d.vendor_id() && f.product_id == d.product_id())
            })
            .ok_or(JensenError::DeviceNotFound)?;

        info!(
            bus = device_info.bus_id(),
            address = device_info.device_address(),
            "found Jensen device"
        );

        let device = device_info.open().await.map_err(map_open_error)?;
        let interface = device.claim_interface(interface_number).await.map_err(JensenError::Usb)?;

        let ep_out = interface.endpoint::<Bulk, _>(endpoint_out).map_err(JensenError::Usb)?;
        let ep_in = interface.endpoint::<Bulk, _>(endpoint_in).map_err(JensenError::Usb)?;

        Ok(Self {
            writer: ep_out.writer(64).with_num_transfers(4),
            reader: Some(ep_in.reader(read_buffer_size).with_num_transfers(4)),
            interface,
            endpoint_in,
            read_buffer_size,
            stalled_once: false,
            connected: true,
        })
    }
}

fn map_open_error(e: nusb::Error) -> JensenError {
    match e.kind() {
        nusb::ErrorKind::PermissionDenied => JensenError::PermissionDenied,
        nusb::ErrorKind::Busy => JensenError::DeviceBusy,
        _ => JensenError::Usb(e),
    }
}

impl UsbBackend for NusbBackend {
    async fn write(&mut self, data: &[u8], t: Duration) -> Result<(), JensenError> {
        let result = async {
            self.writer.write_all(data).await?;
            self.writer.flush_end_async().await
        };
        match timeout(t, result).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::ConnectionReset => {
                warn!("bulk write stalled");
                Err(JensenError::TransportStalled)
            }
            Ok(Err(e)) => {
                self.connected = false;
                Err(JensenError::ConnectionLost(format!("bulk write failed: {e}")))
            }
            Err(_) => Err(JensenError::Timeout),
        }
    }

    async fn read(&mut self, max_len: usize, t: Duration) -> Result<Vec<u8>, JensenError> {
        let mut buffer = vec![0u8; max_len];
        let reader = self.reader.as_mut().expect("reader present outside of clear_halt");
        match timeout(t, reader.read(&mut buffer)).await {
            Ok(Ok(n)) => {
                buffer.truncate(n);
                Ok(buffer)
            }
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::ConnectionReset => {
                warn!("bulk read stalled");
                Err(JensenError::TransportStalled)
            }
            Ok(Err(e)) => {
                self.connected = false;
                Err(JensenError::ConnectionLost(format!("bulk read failed: {e}")))
            }
            Err(_) => Err(JensenError::Timeout),
        }
    }

    async fn clear_halt(&mut self) -> Result<(), JensenError> {
        if self.stalled_once {
            warn!("endpoint stalled again after clear_halt, giving up");
            return Err(JensenError::TransportStalled);
        }
        self.stalled_once = true;
        debug!(endpoint = self.endpoint_in, "clearing endpoint halt");
        let reader = self.reader.take().expect("reader present outside of clear_halt");
        let mut endpoint = reader.into_inner();
        let result = endpoint.clear_halt().await;
        self.reader = Some(
            endpoint
                .reader(self.read_buffer_size)
                .with_num_transfers(4),
        );
        result.map_err(JensenError::Usb)
    }

    async fn close(&mut self) {
        self.connected = false;
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}
