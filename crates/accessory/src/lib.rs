//! Accessory-side transport for the framed USB message link
//!
//! The platform negotiates accessory mode and hands over a duplex
//! descriptor; this crate turns it into a [`common::MessageChannel`]
//! transport.

pub mod stream;

pub use stream::{AccessoryConnector, AccessoryStream};
