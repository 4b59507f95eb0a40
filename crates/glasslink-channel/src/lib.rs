//! Flow-controlled command channel for BLE smart glasses.
//!
//! Commands are encoded into frames, queued in submission order and
//! written in MTU-sized pieces by a [`ChunkedSender`] that honours the
//! peripheral's flow control. Responses are reassembled from notifications
//! and matched to waiting requests by correlation id.
//!
//! One [`CommandChannel`] per connected peripheral. Requires a tokio runtime.

pub mod batch;
pub mod channel;
pub mod config;
pub mod correlation;
pub mod error;
mod inbound;
pub mod payload;
pub mod progress;
pub mod sender;
mod sync;

pub use channel::{ChannelEvent, CommandChannel, SendOptions};
pub use config::{ChannelConfig, SenderConfig, DEFAULT_MTU};
pub use correlation::{PendingReplies, ReplyWaiter};
pub use error::{ChannelError, Result};
pub use payload::SendBuffer;
pub use progress::{progress_fn, ProgressCallback, ProgressUpdate};
pub use sender::{ChunkedSender, SenderEvent, SenderHook};
