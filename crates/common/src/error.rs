//! Common error types
//!
//! The shared fault taxonomy for both roles. Faults local to one frame
//! (framing errors, UTF-8 decode errors) are absorbed inside the message
//! channel and never appear here; faults that invalidate the transport are
//! `Transport` and are handled by the reconnect supervisor rather than
//! surfaced to callers.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// No candidate device, or no accessory after negotiation. Expected
    /// during discovery, not fatal.
    #[error("no matching device found")]
    NotFound,

    /// User or OS declined access; requires a fresh connect
    #[error("USB access denied")]
    PermissionDenied,

    /// Device reported accessory protocol version 0
    #[error("device does not support accessory mode")]
    UnsupportedDevice,

    /// I/O error on an open transport handle
    #[error("transport failure: {0}")]
    Transport(String),

    /// Operation on a disposed message channel
    #[error("channel disposed")]
    Disposed,

    #[error("protocol error: {0}")]
    Protocol(#[from] protocol::ProtocolError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
