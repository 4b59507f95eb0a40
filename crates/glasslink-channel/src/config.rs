use std::time::Duration;

/// Write size used until a larger MTU is negotiated.
pub const DEFAULT_MTU: usize = 20;

/// Configuration for a [`ChunkedSender`](crate::ChunkedSender).
#[derive(Debug, Clone)]
pub struct SenderConfig {
    /// Largest single write in bytes. Default: 20.
    pub mtu: usize,
    /// Bytes taken from the buffer per top-level slice. Default: the MTU.
    pub slice_size: Option<usize>,
    /// Pause after every write and between slices. Default: none.
    pub write_timeout: Duration,
    /// Use acknowledged writes. Default: true.
    pub send_with_response: bool,
}

impl SenderConfig {
    pub fn slice_size(&self) -> usize {
        self.slice_size.unwrap_or(self.mtu).max(1)
    }
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            mtu: DEFAULT_MTU,
            slice_size: None,
            write_timeout: Duration::ZERO,
            send_with_response: true,
        }
    }
}

/// Configuration for a [`CommandChannel`](crate::CommandChannel).
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub sender: SenderConfig,
    /// Reply timeout when a request does not set one. `None` waits forever.
    pub reply_timeout: Option<Duration>,
    /// Subscribe to the flow control characteristic on attach.
    pub flow_control: bool,
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            sender: SenderConfig::default(),
            reply_timeout: Some(Duration::from_secs(5)),
            flow_control: true,
            event_capacity: 64,
        }
    }
}
