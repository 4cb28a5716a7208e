//! Transport seam between the message channel and role-specific USB plumbing
//!
//! The host role (manual endpoint and control-transfer work over `rusb`) and
//! the accessory role (a single pre-negotiated stream handle) both reduce to
//! this narrow interface, so the channel logic is written once and is
//! transport-agnostic.

use crate::error::Result;
use protocol::ConnectionState;
use std::time::Duration;

/// Raw byte-level duplex transport
///
/// Methods take `&self` because the sender and receiver workers drive the
/// two directions concurrently over one handle.
pub trait Transport: Send + Sync {
    /// Write all of `data` to the peer
    fn send(&self, data: &[u8]) -> Result<()>;

    /// Read whatever bytes arrived within `timeout`
    ///
    /// `Ok(None)` is the normal idle condition, not a fault. `Err` means
    /// the transport is no longer usable and the connection is lost.
    fn receive(&self, timeout: Duration) -> Result<Option<Vec<u8>>>;

    /// Mark the transport unusable
    ///
    /// In-flight operations fail after this. OS resources are released when
    /// the last reference drops; the reconnect supervisor waits for that
    /// before opening a replacement handle.
    fn close(&self);
}

/// Sink for intermediate connection states emitted while connecting
pub type StateSink<'a> = &'a dyn Fn(ConnectionState);

/// Factory that produces a connected transport
pub trait Connector: Send {
    /// Drive the role-specific connect sequence to a ready transport
    ///
    /// Emits intermediate states (`Searching`, and `PermissionRequested`
    /// where consent is involved) through `sink`; the channel itself emits
    /// the terminal `Connected` or `Error`.
    fn connect(&mut self, sink: StateSink<'_>) -> Result<Box<dyn Transport>>;

    /// Whether a lost connection should be re-established automatically
    ///
    /// True for the host role. The accessory role returns false: the
    /// platform renegotiates and redelivers the accessory after a detach.
    fn reconnects(&self) -> bool {
        true
    }
}
