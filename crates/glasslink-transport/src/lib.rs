//! BLE transport abstraction for the glasslink protocol engine.
//!
//! The engine never talks to a Bluetooth stack directly. It writes to and
//! subscribes on characteristics through the [`BleTransport`] trait:
//! - [`RecordingTransport`] records writes in memory (dry runs, tests)
//! - `BtleplugTransport` drives a connected `btleplug` peripheral
//!   (feature `btleplug`)
//!
//! Scanning, connecting and service discovery stay with the caller.

pub mod error;
pub mod gatt;
pub mod recording;
pub mod traits;

#[cfg(feature = "btleplug")]
pub mod peripheral;

pub use error::{Result, TransportError};
pub use gatt::{
    CharacteristicRef, FlowControlSignal, FLOW_CONTROL_UUID, GLASSES_SERVICE_UUID, RX_UUID,
    TX_UUID,
};
pub use recording::{RecordedWrite, RecordingTransport};
pub use traits::{BleTransport, NotificationStream, WriteKind};

#[cfg(feature = "btleplug")]
pub use peripheral::BtleplugTransport;
