//! Bulk transport over an accessory-mode device
//!
//! Endpoint discovery, the blocking bulk read/write transport the channel
//! workers drive, and the connector that runs the whole discover, negotiate,
//! re-enumerate, reacquire sequence.

use super::aoa;
use super::device::{self, CandidateDevice};
use crate::config::UsbSettings;
use common::{Connector, Error, Result, StateSink, Transport};
use protocol::{ConnectionState, DeviceIdentity};
use rusb::{Context, Device, DeviceHandle, Direction, TransferType, UsbContext};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Per-read buffer for the bulk IN endpoint
const READ_CHUNK: usize = 64;
/// Upper bound on a single bulk OUT submission
const WRITE_CHUNK: usize = 512;

/// The claimed interface and its bulk endpoint addresses
///
/// Valid only while the owning handle stays open; endpoint addresses are
/// not stable across re-enumeration and are rediscovered on every connect.
#[derive(Debug, Clone, Copy)]
struct EndpointPair {
    interface: u8,
    bulk_in: u8,
    bulk_out: u8,
}

/// Find and claim an interface carrying bulk IN and OUT endpoints
///
/// Walks every configuration and interface, claiming interfaces that carry
/// any bulk endpoint and releasing those that do not yield both directions.
/// On success the returned pair's interface is left claimed on the handle.
fn discover_endpoints(
    device: &Device<Context>,
    handle: &DeviceHandle<Context>,
) -> Result<EndpointPair> {
    let descriptor = device
        .device_descriptor()
        .map_err(|e| Error::Transport(format!("device descriptor unreadable: {e}")))?;

    // Interfaces cannot be claimed until a configuration is active; a
    // freshly re-enumerated device may not have one yet
    if let Ok(config) = device.config_descriptor(0) {
        if let Err(e) = handle.set_active_configuration(config.number()) {
            debug!("set_active_configuration: {e}");
        }
    }

    for index in 0..descriptor.num_configurations() {
        let config = match device.config_descriptor(index) {
            Ok(c) => c,
            Err(e) => {
                debug!(index, "skipping unreadable configuration: {e}");
                continue;
            }
        };

        for interface in config.interfaces() {
            for desc in interface.descriptors() {
                let mut bulk_in = None;
                let mut bulk_out = None;
                for endpoint in desc.endpoint_descriptors() {
                    if endpoint.transfer_type() != TransferType::Bulk {
                        continue;
                    }
                    match endpoint.direction() {
                        Direction::In => bulk_in = Some(endpoint.address()),
                        Direction::Out => bulk_out = Some(endpoint.address()),
                    }
                }
                if bulk_in.is_none() && bulk_out.is_none() {
                    continue;
                }

                let number = desc.interface_number();
                device::detach_kernel_driver(handle, number);
                if let Err(e) = handle.claim_interface(number) {
                    debug!(interface = number, "claim failed: {e}");
                    continue;
                }

                if let (Some(bulk_in), Some(bulk_out)) = (bulk_in, bulk_out) {
                    debug!(
                        interface = number,
                        bulk_in = format!("{bulk_in:#04x}"),
                        bulk_out = format!("{bulk_out:#04x}"),
                        "bulk endpoint pair claimed"
                    );
                    return Ok(EndpointPair {
                        interface: number,
                        bulk_in,
                        bulk_out,
                    });
                }

                // One direction only; give the interface back
                if let Err(e) = handle.release_interface(number) {
                    debug!(interface = number, "release failed: {e}");
                }
            }
        }
    }

    Err(Error::Transport(
        "no interface with bulk IN and OUT endpoints".to_string(),
    ))
}

/// Blocking bulk transport over a claimed accessory interface
pub struct HostTransport {
    handle: DeviceHandle<Context>,
    endpoints: EndpointPair,
    write_timeout: Duration,
    closed: AtomicBool,
}

impl HostTransport {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(Error::Transport("transport closed".to_string()))
        } else {
            Ok(())
        }
    }
}

impl Transport for HostTransport {
    fn send(&self, data: &[u8]) -> Result<()> {
        self.ensure_open()?;
        let mut offset = 0;
        while offset < data.len() {
            self.ensure_open()?;
            let end = (offset + WRITE_CHUNK).min(data.len());
            let written = self
                .handle
                .write_bulk(self.endpoints.bulk_out, &data[offset..end], self.write_timeout)
                .map_err(|e| Error::Transport(format!("bulk write failed: {e}")))?;
            if written == 0 {
                return Err(Error::Transport("bulk write made no progress".to_string()));
            }
            offset += written;
        }
        Ok(())
    }

    fn receive(&self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        self.ensure_open()?;
        let mut buf = [0u8; READ_CHUNK];
        match self.handle.read_bulk(self.endpoints.bulk_in, &mut buf, timeout) {
            Ok(0) => Ok(None),
            Ok(n) => Ok(Some(buf[..n].to_vec())),
            Err(rusb::Error::Timeout) => Ok(None),
            Err(e) => Err(Error::Transport(format!("bulk read failed: {e}"))),
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl Drop for HostTransport {
    fn drop(&mut self) {
        if let Err(e) = self.handle.release_interface(self.endpoints.interface) {
            debug!("interface release on drop: {e}");
        }
    }
}

/// Connector driving the accessory negotiation sequence
///
/// An accessory-mode device already on the bus is used directly; otherwise
/// the first openable Android candidate is negotiated, and the connector
/// waits out the re-enumeration before reacquiring it under the accessory
/// IDs.
pub struct HostConnector {
    context: Context,
    identity: DeviceIdentity,
    usb: UsbSettings,
}

impl HostConnector {
    pub fn new(identity: DeviceIdentity, usb: UsbSettings) -> Result<Self> {
        let context = Context::new()
            .map_err(|e| Error::Transport(format!("libusb context init failed: {e}")))?;
        Ok(Self {
            context,
            identity,
            usb,
        })
    }

    fn control_timeout(&self) -> Duration {
        Duration::from_millis(self.usb.control_timeout_ms)
    }

    fn open_transport(&self, candidate: &CandidateDevice) -> Result<Box<dyn Transport>> {
        let handle = device::open_device(&candidate.device)?;
        let endpoints = discover_endpoints(&candidate.device, &handle)?;
        info!(
            vendor = format!("{:04x}", candidate.vendor_id),
            product = format!("{:04x}", candidate.product_id),
            "accessory transport ready"
        );
        Ok(Box::new(HostTransport {
            handle,
            endpoints,
            write_timeout: Duration::from_millis(self.usb.write_timeout_ms),
            closed: AtomicBool::new(false),
        }))
    }

    /// Negotiate accessory mode against the first candidate that opens
    fn negotiate_first_candidate(&self) -> Result<()> {
        let candidates = device::discover_candidates(&self.context)?;
        if candidates.is_empty() {
            return Err(Error::NotFound);
        }

        let mut first_error = None;
        for candidate in &candidates {
            let handle = match device::open_device(&candidate.device) {
                Ok(h) => h,
                Err(e) => {
                    debug!(
                        vendor = format!("{:04x}", candidate.vendor_id),
                        "candidate open failed: {e}"
                    );
                    first_error.get_or_insert(e);
                    continue;
                }
            };

            info!(
                vendor = format!("{:04x}", candidate.vendor_id),
                product = format!("{:04x}", candidate.product_id),
                "negotiating accessory mode"
            );
            aoa::negotiate(&handle, &self.identity, self.control_timeout())?;
            // Handle dropped here; the device is about to leave the bus
            return Ok(());
        }

        Err(first_error.unwrap_or(Error::NotFound))
    }

    /// Poll for the device to come back under the accessory IDs
    fn await_reenumeration(&self) -> Result<CandidateDevice> {
        let deadline = Instant::now() + Duration::from_millis(self.usb.reenumeration_timeout_ms);
        loop {
            if let Some(candidate) = device::find_accessory(&self.context)? {
                // The device needs a moment after enumeration before the
                // interface can be claimed reliably
                thread::sleep(Duration::from_millis(self.usb.settle_delay_ms));
                return Ok(candidate);
            }
            if Instant::now() >= deadline {
                return Err(Error::NotFound);
            }
            thread::sleep(Duration::from_millis(self.usb.poll_interval_ms));
        }
    }
}

impl Connector for HostConnector {
    fn connect(&mut self, sink: StateSink<'_>) -> Result<Box<dyn Transport>> {
        sink(ConnectionState::Searching);

        if let Some(accessory) = device::find_accessory(&self.context)? {
            debug!("device already in accessory mode");
            return self.open_transport(&accessory);
        }

        self.negotiate_first_candidate()?;

        let accessory = self.await_reenumeration().map_err(|e| {
            warn!("device did not re-enumerate as an accessory");
            e
        })?;
        self.open_transport(&accessory)
    }
}
