//! Shared channel engine for both accessory-link roles
//!
//! The message channel, the transport seam it runs over, the common fault
//! taxonomy, and logging setup. Role crates supply a [`Connector`] and get a
//! full duplex message channel with reconnect supervision in return.

pub mod channel;
pub mod error;
pub mod logging;
pub mod test_utils;
pub mod transport;

pub use channel::{ChannelConfig, ChannelEvent, MessageChannel};
pub use error::{Error, Result};
pub use logging::setup_logging;
pub use transport::{Connector, StateSink, Transport};
