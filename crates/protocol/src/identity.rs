//! Accessory device identity
//!
//! The six identity strings advertised during accessory-mode negotiation.
//! The accessory-side platform routes the re-enumerated device to an
//! application by matching these strings against its declared filter, so
//! both roles must be configured with the same values.

use serde::{Deserialize, Serialize};

/// Identity strings sent to the device during negotiation
///
/// Immutable once negotiation starts; each field is written with its own
/// control transfer, indexed positionally in the order below.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub manufacturer: String,
    pub model: String,
    pub description: String,
    pub version: String,
    pub uri: String,
    pub serial: String,
}

impl DeviceIdentity {
    /// Identity fields paired with their negotiation string index
    ///
    /// The order is fixed by the accessory protocol: manufacturer (0),
    /// model (1), description (2), version (3), uri (4), serial (5).
    pub fn fields(&self) -> [(u16, &str); 6] {
        [
            (0, self.manufacturer.as_str()),
            (1, self.model.as_str()),
            (2, self.description.as_str()),
            (3, self.version.as_str()),
            (4, self.uri.as_str()),
            (5, self.serial.as_str()),
        ]
    }
}

impl Default for DeviceIdentity {
    fn default() -> Self {
        Self {
            manufacturer: "StiffSockets".to_string(),
            model: "USBDataExchange".to_string(),
            description: "USB Data Exchange Accessory".to_string(),
            version: "1.0".to_string(),
            uri: "https://github.com/StiffSockets".to_string(),
            serial: "0000000012345678".to_string(),
        }
    }
}
