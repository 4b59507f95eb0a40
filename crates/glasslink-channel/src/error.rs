use std::sync::Arc;
use std::time::Duration;

use glasslink_frame::FrameError;
use glasslink_transport::TransportError;

/// Errors that can occur in channel operations.
///
/// Cloneable: one failure is delivered to every affected listener.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ChannelError {
    /// Command could not be encoded.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// A write or subscription failed.
    #[error("transport error: {0}")]
    Transport(Arc<TransportError>),

    /// The channel has been disconnected and accepts no more commands.
    #[error("channel not connected")]
    NotConnected,

    /// The peripheral disconnected while the operation was outstanding.
    #[error("peripheral disconnected")]
    Disconnected,

    /// The send was cancelled by the caller.
    #[error("send cancelled")]
    Cancelled,

    /// No response arrived in time.
    #[error("no response after {0:?}")]
    Timeout(Duration),

    /// The channel was dropped while waiting.
    #[error("channel closed")]
    Closed,
}

impl From<TransportError> for ChannelError {
    fn from(err: TransportError) -> Self {
        Self::Transport(Arc::new(err))
    }
}

pub type Result<T> = std::result::Result<T, ChannelError>;
