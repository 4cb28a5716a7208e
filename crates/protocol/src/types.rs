//! Shared connection types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of one message channel
///
/// Exactly one current value per channel; transitions are the only
/// externally observable lifecycle signal. Channels are created at
/// [`ConnectionState::Disconnected`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionState {
    /// No transport open, no activity in progress
    Disconnected,
    /// Enumerating or waiting for a matching device
    Searching,
    /// Waiting on explicit user/OS consent
    PermissionRequested,
    /// Transport open, duplex traffic possible
    Connected,
    /// Connect failed or access was denied; a fresh connect is required
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Searching => "searching",
            ConnectionState::PermissionRequested => "permissionRequested",
            ConnectionState::Connected => "connected",
            ConnectionState::Error => "error",
        };
        f.write_str(name)
    }
}
