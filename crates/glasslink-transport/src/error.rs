use uuid::Uuid;

/// Errors that can occur in BLE transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The peripheral is not connected.
    #[error("peripheral not connected")]
    NotConnected,

    /// The characteristic is not exposed by the connected peripheral.
    #[error("characteristic {0} not found")]
    CharacteristicNotFound(Uuid),

    /// The operation is not supported by this transport.
    #[error("operation not supported: {0}")]
    Unsupported(&'static str),

    /// The peripheral rejected a write.
    #[error("write to {characteristic} rejected: {reason}")]
    WriteRejected { characteristic: Uuid, reason: String },

    /// Error reported by the underlying BLE stack.
    #[error("ble backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

pub type Result<T> = std::result::Result<T, TransportError>;
