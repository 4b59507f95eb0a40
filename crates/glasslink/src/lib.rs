//! Protocol engine for BLE smart glasses.
//!
//! glasslink encodes display and configuration commands into the glasses'
//! binary frame format, writes them in MTU-sized pieces under the
//! peripheral's flow control, and reassembles notification fragments into
//! responses matched to their requests.
//!
//! # Crate Structure
//!
//! - [`transport`]: BLE write/notify abstraction, GATT identifiers, a recording test double
//! - [`frame`]: frame codec, typed commands, response decoding and the resumable parser
//! - [`channel`]: chunked sender, command queue and correlation of responses

/// Re-export transport types.
pub mod transport {
    pub use glasslink_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use glasslink_frame::*;
}

/// Re-export channel types.
pub mod channel {
    pub use glasslink_channel::*;
}
