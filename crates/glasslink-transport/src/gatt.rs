//! GATT layout of the glasses service.

use uuid::Uuid;

/// Primary service exposed by the glasses.
pub const GLASSES_SERVICE_UUID: Uuid = Uuid::from_u128(0x0783b03e_8535_b5a0_7140_a304d2495cb7);

/// Glasses to host notifications (responses, events).
pub const TX_UUID: Uuid = Uuid::from_u128(0x0783b03e_8535_b5a0_7140_a304d2495cb8);

/// Flow control notifications.
pub const FLOW_CONTROL_UUID: Uuid = Uuid::from_u128(0x0783b03e_8535_b5a0_7140_a304d2495cb9);

/// Host to glasses writes (commands).
pub const RX_UUID: Uuid = Uuid::from_u128(0x0783b03e_8535_b5a0_7140_a304d2495cba);

/// A characteristic within a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CharacteristicRef {
    pub service: Uuid,
    pub characteristic: Uuid,
}

impl CharacteristicRef {
    pub const fn new(service: Uuid, characteristic: Uuid) -> Self {
        Self {
            service,
            characteristic,
        }
    }

    /// The command write characteristic.
    pub const fn rx() -> Self {
        Self::new(GLASSES_SERVICE_UUID, RX_UUID)
    }

    /// The response notification characteristic.
    pub const fn tx() -> Self {
        Self::new(GLASSES_SERVICE_UUID, TX_UUID)
    }

    /// The flow control notification characteristic.
    pub const fn flow_control() -> Self {
        Self::new(GLASSES_SERVICE_UUID, FLOW_CONTROL_UUID)
    }
}

/// A value notified on the flow control characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowControlSignal {
    /// The peripheral accepts data.
    On,
    /// The peripheral's receive buffer is full.
    Off,
    /// The peripheral reported a flow control error. Does not move the gate.
    Error,
}

impl FlowControlSignal {
    /// Read a signal from the first byte of a notification.
    pub fn parse(value: &[u8]) -> Option<Self> {
        match value.first()? {
            0x01 => Some(Self::On),
            0x02 => Some(Self::Off),
            0x03 => Some(Self::Error),
            _ => None,
        }
    }

    /// The gate state this signal requests, if any.
    pub fn gate(self) -> Option<bool> {
        match self {
            Self::On => Some(true),
            Self::Off => Some(false),
            Self::Error => None,
        }
    }
}
