//! Host-side USB plumbing
//!
//! Device discovery, accessory-mode negotiation, and the bulk transport the
//! message channel runs over.

pub mod aoa;
pub mod device;
pub mod transport;

pub use transport::HostConnector;
