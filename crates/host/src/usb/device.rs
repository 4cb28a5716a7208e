//! Candidate device discovery and opening
//!
//! Finds Android devices worth negotiating with, and accessory-mode devices
//! ready to use directly. Opening detaches kernel drivers so the bulk
//! interface can be claimed.

use super::aoa;
use common::{Error, Result};
use rusb::{Context, Device, DeviceHandle, UsbContext};
use tracing::{debug, warn};

/// Vendor IDs of known Android device manufacturers
///
/// Used to narrow the bus scan before the protocol version probe; the probe
/// itself is what decides whether a device actually speaks the protocol.
pub const ANDROID_VENDOR_IDS: [u16; 14] = [
    0x18D1, // Google
    0x04E8, // Samsung
    0x22B8, // Motorola
    0x0BB4, // HTC
    0x0FCE, // Sony
    0x1004, // LG
    0x12D1, // Huawei
    0x2717, // Xiaomi
    0x2A70, // OnePlus
    0x19D2, // ZTE
    0x17EF, // Lenovo
    0x0B05, // Asus
    0x0955, // Nvidia
    0x2916, // Yota
];

/// A discovered device with its cached descriptor IDs
pub struct CandidateDevice {
    pub device: Device<Context>,
    pub vendor_id: u16,
    pub product_id: u16,
}

impl CandidateDevice {
    pub fn is_accessory(&self) -> bool {
        aoa::is_accessory(self.vendor_id, self.product_id)
    }
}

/// Enumerate the bus and keep accessory-mode and Android-vendor devices
///
/// Accessory-mode devices sort first so an already-switched device is
/// preferred over renegotiating a fresh one.
pub fn discover_candidates(context: &Context) -> Result<Vec<CandidateDevice>> {
    let devices = context
        .devices()
        .map_err(|e| Error::Transport(format!("bus enumeration failed: {e}")))?;

    let mut candidates = Vec::new();
    for device in devices.iter() {
        let descriptor = match device.device_descriptor() {
            Ok(d) => d,
            Err(e) => {
                debug!(
                    bus = device.bus_number(),
                    address = device.address(),
                    "skipping unreadable descriptor: {e}"
                );
                continue;
            }
        };

        let vendor_id = descriptor.vendor_id();
        let product_id = descriptor.product_id();
        if aoa::is_accessory(vendor_id, product_id) || ANDROID_VENDOR_IDS.contains(&vendor_id)
        {
            debug!(
                vendor = format!("{vendor_id:04x}"),
                product = format!("{product_id:04x}"),
                "candidate device"
            );
            candidates.push(CandidateDevice {
                device,
                vendor_id,
                product_id,
            });
        }
    }

    candidates.sort_by_key(|c| !c.is_accessory());
    Ok(candidates)
}

/// Find a device already in accessory mode, if one is attached
pub fn find_accessory(context: &Context) -> Result<Option<CandidateDevice>> {
    Ok(discover_candidates(context)?
        .into_iter()
        .find(CandidateDevice::is_accessory))
}

/// Open a device handle, mapping the access failure to a permission fault
pub fn open_device(device: &Device<Context>) -> Result<DeviceHandle<Context>> {
    device.open().map_err(|e| match e {
        rusb::Error::Access => Error::PermissionDenied,
        rusb::Error::NoDevice | rusb::Error::NotFound => Error::NotFound,
        other => Error::Transport(format!("failed to open device: {other}")),
    })
}

/// Detach the kernel driver from an interface if one is bound
///
/// Failure to detach is reported but not fatal; the following claim will
/// fail with a clearer error if the driver is actually in the way.
pub fn detach_kernel_driver(handle: &DeviceHandle<Context>, interface: u8) {
    match handle.kernel_driver_active(interface) {
        Ok(true) => {
            debug!(interface, "detaching kernel driver");
            if let Err(e) = handle.detach_kernel_driver(interface) {
                warn!(interface, "failed to detach kernel driver: {e}");
            }
        }
        Ok(false) => {}
        Err(e) => debug!(interface, "kernel driver query failed: {e}"),
    }
}
