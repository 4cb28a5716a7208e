//! Protocol library for accessory-kit
//!
//! Defines the wire framing shared by the USB-host and USB-accessory roles,
//! the identity record used during accessory-mode negotiation, and the
//! connection lifecycle states. This crate is pure: no I/O, no threads.
//!
//! # Example
//!
//! ```
//! use protocol::{encode_frame, FrameDecoder, MAX_PAYLOAD_LEN};
//!
//! let frame = encode_frame(b"hello").unwrap();
//!
//! let mut decoder = FrameDecoder::new(MAX_PAYLOAD_LEN);
//! let mut out = None;
//! for byte in &frame {
//!     if let Some(payload) = decoder.push(*byte).unwrap() {
//!         out = Some(payload);
//!     }
//! }
//! assert_eq!(out.unwrap().as_ref(), b"hello");
//! ```

pub mod codec;
pub mod error;
pub mod identity;
pub mod types;

pub use codec::{EOT, FrameDecoder, MAX_FRAME_PAYLOAD, MAX_PAYLOAD_LEN, SOH, encode_frame};
pub use error::{ProtocolError, Result};
pub use identity::DeviceIdentity;
pub use types::ConnectionState;
