use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures_core::Stream;

use crate::error::{Result, TransportError};
use crate::gatt::CharacteristicRef;

/// Stream of notification values from one characteristic.
pub type NotificationStream = Pin<Box<dyn Stream<Item = Bytes> + Send>>;

/// GATT write mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteKind {
    /// Acknowledged write; completes once the peripheral confirms.
    WithResponse,
    /// Unacknowledged write command.
    WithoutResponse,
}

impl WriteKind {
    pub fn from_with_response(with_response: bool) -> Self {
        if with_response {
            Self::WithResponse
        } else {
            Self::WithoutResponse
        }
    }
}

/// A connected BLE peripheral as seen by the protocol engine.
///
/// Implementations must complete every issued write before resolving; the
/// engine never has more than one write in flight per characteristic.
#[async_trait]
pub trait BleTransport: Send + Sync {
    /// Write `data` to a characteristic.
    async fn write(&self, characteristic: &CharacteristicRef, data: &[u8], kind: WriteKind)
        -> Result<()>;

    /// Subscribe to notifications on a characteristic.
    async fn subscribe(&self, characteristic: &CharacteristicRef) -> Result<NotificationStream>;

    /// Ask the peripheral for a larger MTU. Returns the negotiated value.
    async fn request_mtu(&self, _mtu: u16) -> Result<u16> {
        Err(TransportError::Unsupported("mtu negotiation"))
    }
}
