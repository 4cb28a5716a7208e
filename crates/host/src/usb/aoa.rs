//! Android Open Accessory control-transfer negotiation
//!
//! The three vendor requests that switch an Android device into accessory
//! mode: probe the protocol version, hand over the identity strings, then
//! command the switch. After a successful `start`, the device drops off the
//! bus and re-enumerates under the accessory vendor/product IDs.

use common::{Error, Result};
use protocol::DeviceIdentity;
use rusb::{Context, DeviceHandle, Direction, Recipient, RequestType, request_type};
use std::time::Duration;
use tracing::{debug, info};

/// Vendor request: read the accessory protocol version the device speaks
pub const ACCESSORY_GET_PROTOCOL: u8 = 51;
/// Vendor request: send one identity string, selected by the value index
pub const ACCESSORY_SEND_STRING: u8 = 52;
/// Vendor request: switch the device into accessory mode
pub const ACCESSORY_START: u8 = 53;

/// Vendor ID a device re-enumerates under once in accessory mode
pub const ACCESSORY_VID: u16 = 0x18D1;
/// Product IDs for accessory mode, with and without ADB alongside
pub const ACCESSORY_PIDS: [u16; 2] = [0x2D00, 0x2D01];

/// Whether a vendor/product pair is an accessory-mode device
pub fn is_accessory(vendor_id: u16, product_id: u16) -> bool {
    vendor_id == ACCESSORY_VID && ACCESSORY_PIDS.contains(&product_id)
}

/// Read the device's accessory protocol version
///
/// Version 0 means the device does not implement the accessory protocol.
pub fn read_protocol_version(
    handle: &DeviceHandle<Context>,
    timeout: Duration,
) -> Result<u16> {
    let mut buf = [0u8; 2];
    let read = handle
        .read_control(
            request_type(Direction::In, RequestType::Vendor, Recipient::Device),
            ACCESSORY_GET_PROTOCOL,
            0,
            0,
            &mut buf,
            timeout,
        )
        .map_err(|e| Error::Transport(format!("protocol version query failed: {e}")))?;
    if read < 2 {
        return Err(Error::Transport(format!(
            "short protocol version response: {read} bytes"
        )));
    }
    Ok(u16::from_le_bytes(buf))
}

/// Run the full accessory negotiation against an opened device
///
/// The handle is unusable afterwards; the caller must rediscover the device
/// under the accessory IDs once it re-enumerates.
pub fn negotiate(
    handle: &DeviceHandle<Context>,
    identity: &DeviceIdentity,
    timeout: Duration,
) -> Result<()> {
    let version = read_protocol_version(handle, timeout)?;
    if version == 0 {
        return Err(Error::UnsupportedDevice);
    }
    debug!(version, "device supports accessory protocol");

    for (index, value) in identity.fields() {
        send_identity_string(handle, index, value, timeout)?;
    }

    handle
        .write_control(
            request_type(Direction::Out, RequestType::Vendor, Recipient::Device),
            ACCESSORY_START,
            0,
            0,
            &[],
            timeout,
        )
        .map_err(|e| Error::Transport(format!("accessory start failed: {e}")))?;

    info!("accessory mode start sent, device will re-enumerate");
    Ok(())
}

/// Send one NUL-terminated identity string at the given string index
fn send_identity_string(
    handle: &DeviceHandle<Context>,
    index: u16,
    value: &str,
    timeout: Duration,
) -> Result<()> {
    let mut data = Vec::with_capacity(value.len() + 1);
    data.extend_from_slice(value.as_bytes());
    data.push(0);

    handle
        .write_control(
            request_type(Direction::Out, RequestType::Vendor, Recipient::Device),
            ACCESSORY_SEND_STRING,
            0,
            index,
            &data,
            timeout,
        )
        .map_err(|e| Error::Transport(format!("identity string {index} rejected: {e}")))?;
    Ok(())
}
